// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/compliance.rs - 合规结果与响应解析
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::preprocess::NormalizedRect;

const MAX_SCORE: u8 = 100;

#[derive(Error, Debug)]
pub enum ResponseParseError {
  #[error("响应中没有 JSON 对象")]
  NoJsonBlock,
  #[error("JSON 解析失败: {0}")]
  Json(#[from] serde_json::Error),
}

/// 违规类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationKind {
  /// 箱体上的零售品牌
  Packaging,
  /// 胶带上的零售品牌
  Tape,
}

impl ViolationKind {
  /// 模型输出的类别标签；除箱体外一律按胶带处理
  pub fn from_label(label: &str) -> Self {
    match label.trim().to_lowercase().as_str() {
      "box" | "packaging" | "package" => ViolationKind::Packaging,
      _ => ViolationKind::Tape,
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      ViolationKind::Packaging => "box",
      ViolationKind::Tape => "tape",
    }
  }
}

/// 单条违规
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
  pub kind: ViolationKind,
  pub description: String,
  pub brand: String,
  /// 上游给出的区域，形状不对时为 None
  pub region: Option<NormalizedRect>,
}

/// 一张图像的合规分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceResult {
  pub score: u8,
  pub compliant: bool,
  pub violations: Vec<Violation>,
  pub summary: String,
}

impl ComplianceResult {
  /// 任何失败都折算为 0 分、不合规、无违规
  pub fn degraded(reason: impl std::fmt::Display) -> Self {
    Self {
      score: 0,
      compliant: false,
      violations: Vec::new(),
      summary: format!("Error processing image: {}", reason),
    }
  }

  /// 只有不合规且带有违规条目时才需要标注
  pub fn needs_annotation(&self) -> bool {
    !self.compliant && !self.violations.is_empty()
  }

  /// 从模型的自由文本回复中解析
  pub fn from_response_text(text: &str) -> Result<Self, ResponseParseError> {
    let block = extract_json_block(text)?;
    let raw: RawCompliance = serde_json::from_str(block)?;
    Ok(raw.into())
  }
}

#[derive(Deserialize)]
struct RawCompliance {
  #[serde(default)]
  compliance_score: Value,
  #[serde(default)]
  is_compliant: Value,
  #[serde(default)]
  violations: Value,
  #[serde(default)]
  summary: Value,
}

impl From<RawCompliance> for ComplianceResult {
  fn from(raw: RawCompliance) -> Self {
    let violations = match raw.violations {
      Value::Array(items) => items.iter().map(parse_violation).collect(),
      _ => Vec::new(),
    };

    Self {
      score: parse_score(&raw.compliance_score),
      compliant: parse_bool(&raw.is_compliant),
      violations,
      summary: parse_text(&raw.summary),
    }
  }
}

fn parse_score(value: &Value) -> u8 {
  let score = match value {
    Value::Number(n) => n.as_f64().unwrap_or(0.0),
    Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
    _ => 0.0,
  };
  if score.is_finite() {
    score.round().clamp(0.0, MAX_SCORE as f64) as u8
  } else {
    0
  }
}

fn parse_bool(value: &Value) -> bool {
  match value {
    Value::Bool(b) => *b,
    Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
    _ => false,
  }
}

fn parse_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

fn parse_region(value: Option<&Value>) -> Option<NormalizedRect> {
  let Some(Value::Array(items)) = value else {
    return None;
  };
  let coords = items
    .iter()
    .map(|v| v.as_f64().map(|f| f as f32))
    .collect::<Option<Vec<_>>>()?;
  NormalizedRect::from_slice(&coords)
}

// 每个条目都计数；非对象条目保留为没有区域的违规，文本作为描述
fn parse_violation(value: &Value) -> Violation {
  let Value::Object(map) = value else {
    debug!("非对象的违规条目: {}", value);
    return Violation {
      kind: ViolationKind::from_label(""),
      description: parse_text(value),
      brand: String::new(),
      region: None,
    };
  };

  let label = map.get("type").and_then(Value::as_str).unwrap_or("");
  let region = parse_region(map.get("bounding_box"));
  if region.is_none() {
    debug!("违规条目缺少有效区域: {:?}", map.get("bounding_box"));
  }

  Violation {
    kind: ViolationKind::from_label(label),
    description: map.get("description").map(parse_text).unwrap_or_default(),
    brand: map
      .get("brand_detected")
      .map(parse_text)
      .unwrap_or_default(),
    region,
  }
}

/// 从回复中取出 JSON 文本：优先 ```json 围栏，其次普通围栏，最后取首个 `{` 到末个 `}`
pub fn extract_json_block(response: &str) -> Result<&str, ResponseParseError> {
  let trimmed = response.trim();

  if let Some(start) = trimmed.find("```json") {
    let after_fence = &trimmed[start + 7..];
    if let Some(end) = after_fence.find("```") {
      return Ok(after_fence[..end].trim());
    }
  }

  if let Some(start) = trimmed.find("```") {
    let after_fence = &trimmed[start + 3..];
    if let Some(end) = after_fence.find("```") {
      let block = after_fence[..end].trim();
      if block.starts_with('{') {
        return Ok(block);
      }
    }
  }

  if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
    if start < end {
      return Ok(&trimmed[start..=end]);
    }
  }

  Err(ResponseParseError::NoJsonBlock)
}
