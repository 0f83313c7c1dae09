// 该文件是 Xiangjian （箱检） 项目的一部分。
// tests/common/mod.rs - 测试用的脚本化分析后端
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

#![allow(dead_code)]

use std::{
  io::Cursor,
  sync::atomic::{AtomicUsize, Ordering},
};

use image::{ImageFormat, Rgb, RgbImage};
use xiangjian::{
  analysis::{AnalysisError, AnalysisImage, AnalysisSource, Analyzer},
  compliance::{ComplianceResult, Violation, ViolationKind},
  input::InputImage,
  preprocess::NormalizedRect,
};

/// 按文件名前缀决定回复：
/// `ok_` 合规，`bad_` 不合规并带一条违规，`mixed_` 判为合规却仍列出一条违规，
/// `fail_` 返回 503，`panic_` 直接崩溃
pub struct ScriptedAnalyzer {
  source: AnalysisSource,
  pub calls: AtomicUsize,
}

impl ScriptedAnalyzer {
  pub fn new() -> Self {
    Self::with_source(AnalysisSource::Processed)
  }

  pub fn with_source(source: AnalysisSource) -> Self {
    Self {
      source,
      calls: AtomicUsize::new(0),
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Analyzer for ScriptedAnalyzer {
  fn name(&self) -> &'static str {
    "scripted"
  }

  fn source(&self) -> AnalysisSource {
    self.source
  }

  fn analyze(&self, image: &AnalysisImage<'_>) -> Result<ComplianceResult, AnalysisError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let name = image.filename;

    if name.starts_with("ok_") {
      Ok(ComplianceResult {
        score: 100,
        compliant: true,
        violations: Vec::new(),
        summary: "No retail branding found".to_string(),
      })
    } else if name.starts_with("bad_") {
      Ok(ComplianceResult {
        score: 30,
        compliant: false,
        violations: vec![logo_violation()],
        summary: "Branded box".to_string(),
      })
    } else if name.starts_with("mixed_") {
      Ok(ComplianceResult {
        score: 85,
        compliant: true,
        violations: vec![logo_violation()],
        summary: "Minor branding, acceptable".to_string(),
      })
    } else if name.starts_with("panic_") {
      panic!("scripted crash for {}", name);
    } else {
      Err(AnalysisError::Status {
        status: 503,
        body: "service unavailable".to_string(),
      })
    }
  }
}

fn logo_violation() -> Violation {
  Violation {
    kind: ViolationKind::Packaging,
    description: "Retailer logo on the lid".to_string(),
    brand: "Acme Mart".to_string(),
    region: Some(NormalizedRect::new(0.25, 0.25, 0.75, 0.75)),
  }
}

pub fn sample_image() -> RgbImage {
  RgbImage::from_fn(64, 48, |x, y| {
    Rgb([(x * 3) as u8, (y * 4) as u8, ((x + y) * 2) as u8])
  })
}

pub fn encode_png(image: &RgbImage) -> Vec<u8> {
  let mut buffer = Cursor::new(Vec::new());
  image.write_to(&mut buffer, ImageFormat::Png).unwrap();
  buffer.into_inner()
}

pub fn png_item(name: &str) -> InputImage {
  InputImage::new(name, encode_png(&sample_image()))
}
