// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/analysis.rs - 合规分析后端
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

use std::{io::Cursor, str::FromStr, time::Duration};

use base64::Engine;
use image::{ImageFormat, RgbImage};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl,
  compliance::{ComplianceResult, ResponseParseError},
  preprocess::PreprocessResult,
};

pub mod prompt;

#[cfg(feature = "backend_claude")]
mod claude;
#[cfg(feature = "backend_claude")]
pub use self::claude::ClaudeAnalyzer;

#[cfg(feature = "backend_gemini")]
mod gemini;
#[cfg(feature = "backend_gemini")]
pub use self::gemini::GeminiAnalyzer;

#[cfg(feature = "backend_gpt4o")]
mod gpt4o;
#[cfg(feature = "backend_gpt4o")]
pub use self::gpt4o::Gpt4oAnalyzer;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_MAX_TOKENS: u32 = 1000;

#[derive(Error, Debug)]
pub enum AnalysisError {
  #[error("HTTP 请求失败: {0}")]
  Http(#[from] reqwest::Error),
  #[error("后端返回错误状态 {status}: {body}")]
  Status { status: u16, body: String },
  #[error("后端响应中没有文本内容")]
  EmptyResponse,
  #[error("后端响应解析失败: {0}")]
  Parse(#[from] ResponseParseError),
  #[error("图像编码失败: {0}")]
  Encode(#[from] image::ImageError),
  #[error("不支持的分析后端: {0}")]
  UnsupportedBackend(String),
  #[error("缺少 {0} 的 API 密钥")]
  MissingApiKey(&'static str),
  #[error("后端配置无效: {0}")]
  InvalidConfig(String),
}

/// 后端实际消费的图像
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisSource {
  /// 预处理后的图像（增强并裁剪）
  Processed,
  /// 上传的原始字节
  Original,
}

/// 交给后端的一张图像，同时携带原始字节和预处理结果
#[derive(Debug, Clone, Copy)]
pub struct AnalysisImage<'a> {
  pub filename: &'a str,
  pub raw: &'a [u8],
  pub preprocessed: &'a PreprocessResult,
}

impl<'a> AnalysisImage<'a> {
  pub fn new(filename: &'a str, raw: &'a [u8], preprocessed: &'a PreprocessResult) -> Self {
    Self {
      filename,
      raw,
      preprocessed,
    }
  }

  /// 与 `source` 对应的解码图像，标注时使用
  pub fn image_for(&self, source: AnalysisSource) -> &RgbImage {
    match source {
      AnalysisSource::Processed => &self.preprocessed.processed,
      AnalysisSource::Original => &self.preprocessed.original,
    }
  }

  /// 按 `source` 给出待上传的 (MIME, 字节)
  pub fn payload(&self, source: AnalysisSource) -> Result<(&'static str, Vec<u8>), AnalysisError> {
    match source {
      AnalysisSource::Processed => {
        let mut buffer = Cursor::new(Vec::new());
        self
          .preprocessed
          .processed
          .write_to(&mut buffer, ImageFormat::Png)?;
        Ok((ImageFormat::Png.to_mime_type(), buffer.into_inner()))
      }
      AnalysisSource::Original => {
        let mime = image::guess_format(self.raw)
          .map(|f| f.to_mime_type())
          .unwrap_or("image/jpeg");
        Ok((mime, self.raw.to_vec()))
      }
    }
  }

  /// base64 编码后的 (MIME, 数据)
  pub fn payload_base64(
    &self,
    source: AnalysisSource,
  ) -> Result<(&'static str, String), AnalysisError> {
    let (mime, bytes) = self.payload(source)?;
    Ok((mime, base64::engine::general_purpose::STANDARD.encode(bytes)))
  }
}

/// 合规分析能力
pub trait Analyzer: Send + Sync {
  fn name(&self) -> &'static str;

  /// 后端消费哪一幅图像；返回的违规坐标也相对于这幅图像
  fn source(&self) -> AnalysisSource {
    AnalysisSource::Processed
  }

  fn analyze(&self, image: &AnalysisImage<'_>) -> Result<ComplianceResult, AnalysisError>;
}

/// 支持的后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
  Gemini,
  Gpt4o,
  Claude,
}

impl BackendKind {
  pub fn scheme(&self) -> &'static str {
    match self {
      BackendKind::Gemini => "gemini",
      BackendKind::Gpt4o => "gpt4o",
      BackendKind::Claude => "claude",
    }
  }

  pub fn default_model(&self) -> &'static str {
    match self {
      BackendKind::Gemini => "gemini-1.5-pro",
      BackendKind::Gpt4o => "gpt-4o",
      BackendKind::Claude => "claude-3-5-sonnet-latest",
    }
  }

  /// 惯用的 API 密钥环境变量，只在程序启动时读取
  pub fn api_key_env(&self) -> &'static str {
    match self {
      BackendKind::Gemini => "GOOGLE_API_KEY",
      BackendKind::Gpt4o => "OPENAI_API_KEY",
      BackendKind::Claude => "ANTHROPIC_API_KEY",
    }
  }
}

impl FromStr for BackendKind {
  type Err = AnalysisError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "gemini" => Ok(BackendKind::Gemini),
      "gpt4o" | "gpt-4o" | "openai" => Ok(BackendKind::Gpt4o),
      "claude" | "anthropic" => Ok(BackendKind::Claude),
      other => Err(AnalysisError::UnsupportedBackend(other.to_string())),
    }
  }
}

impl std::fmt::Display for BackendKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.scheme())
  }
}

/// 后端配置，启动时显式构造后传给后端
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
  pub backend: BackendKind,
  pub model: String,
  pub api_key: String,
  pub endpoint: Option<Url>,
  pub timeout: Duration,
  pub temperature: f32,
  pub max_tokens: u32,
}

impl AnalyzerConfig {
  pub fn new(backend: BackendKind) -> Self {
    Self {
      backend,
      model: backend.default_model().to_string(),
      api_key: String::new(),
      endpoint: None,
      timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
      temperature: DEFAULT_TEMPERATURE,
      max_tokens: DEFAULT_MAX_TOKENS,
    }
  }

  pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
    self.api_key = api_key.into();
    self
  }

  pub fn with_model(mut self, model: impl Into<String>) -> Self {
    self.model = model.into();
    self
  }

  pub fn with_endpoint(mut self, endpoint: Url) -> Self {
    self.endpoint = Some(endpoint);
    self
  }

  /// 显式给出的密钥优先，否则读取后端惯用的环境变量；只应在启动时调用
  pub fn resolve_api_key(self, explicit: Option<String>) -> Self {
    let key = explicit
      .filter(|k| !k.trim().is_empty())
      .or_else(|| std::env::var(self.backend.api_key_env()).ok());
    match key {
      Some(key) => self.with_api_key(key),
      None => self,
    }
  }

  fn require_api_key(&self) -> Result<&str, AnalysisError> {
    if self.api_key.trim().is_empty() {
      return Err(AnalysisError::MissingApiKey(self.backend.scheme()));
    }
    Ok(&self.api_key)
  }

  fn http_client(&self) -> Result<reqwest::blocking::Client, AnalysisError> {
    Ok(
      reqwest::blocking::Client::builder()
        .timeout(self.timeout)
        .build()?,
    )
  }

  fn endpoint_or(&self, default: &str) -> Result<Url, AnalysisError> {
    match &self.endpoint {
      Some(url) => Ok(url.clone()),
      None => Url::parse(default).map_err(|e| AnalysisError::InvalidConfig(e.to_string())),
    }
  }
}

/// 形如 `gemini://gemini-1.5-flash?timeout=60&temperature=0.1&max_tokens=800&endpoint=...`
impl FromUrl for AnalyzerConfig {
  type Error = AnalysisError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let backend = BackendKind::from_str(url.scheme())?;
    let mut config = AnalyzerConfig::new(backend);

    if let Some(model) = url.host_str().filter(|h| !h.is_empty()) {
      config.model = model.to_string();
    }

    for (key, value) in url.query_pairs() {
      let invalid = |e: &dyn std::fmt::Display| {
        AnalysisError::InvalidConfig(format!("参数 {} 无效: {}", key, e))
      };
      match key.as_ref() {
        "timeout" => {
          let secs = value.parse::<u64>().map_err(|e| invalid(&e))?;
          config.timeout = Duration::from_secs(secs);
        }
        "temperature" => config.temperature = value.parse().map_err(|e| invalid(&e))?,
        "max_tokens" => config.max_tokens = value.parse().map_err(|e| invalid(&e))?,
        "endpoint" => config.endpoint = Some(Url::parse(&value).map_err(|e| invalid(&e))?),
        other => debug!("忽略未知的后端参数: {}", other),
      }
    }

    Ok(config)
  }
}

/// 编译进来的后端集合
pub enum AnalyzerWrapper {
  #[cfg(feature = "backend_gemini")]
  Gemini(GeminiAnalyzer),
  #[cfg(feature = "backend_gpt4o")]
  Gpt4o(Gpt4oAnalyzer),
  #[cfg(feature = "backend_claude")]
  Claude(ClaudeAnalyzer),
}

impl AnalyzerWrapper {
  pub fn from_config(config: AnalyzerConfig) -> Result<Self, AnalysisError> {
    match config.backend {
      #[cfg(feature = "backend_gemini")]
      BackendKind::Gemini => Ok(AnalyzerWrapper::Gemini(GeminiAnalyzer::new(config)?)),
      #[cfg(feature = "backend_gpt4o")]
      BackendKind::Gpt4o => Ok(AnalyzerWrapper::Gpt4o(Gpt4oAnalyzer::new(config)?)),
      #[cfg(feature = "backend_claude")]
      BackendKind::Claude => Ok(AnalyzerWrapper::Claude(ClaudeAnalyzer::new(config)?)),
      #[allow(unreachable_patterns)]
      other => Err(AnalysisError::UnsupportedBackend(other.to_string())),
    }
  }
}

impl Analyzer for AnalyzerWrapper {
  fn name(&self) -> &'static str {
    match self {
      #[cfg(feature = "backend_gemini")]
      AnalyzerWrapper::Gemini(a) => a.name(),
      #[cfg(feature = "backend_gpt4o")]
      AnalyzerWrapper::Gpt4o(a) => a.name(),
      #[cfg(feature = "backend_claude")]
      AnalyzerWrapper::Claude(a) => a.name(),
    }
  }

  fn source(&self) -> AnalysisSource {
    match self {
      #[cfg(feature = "backend_gemini")]
      AnalyzerWrapper::Gemini(a) => a.source(),
      #[cfg(feature = "backend_gpt4o")]
      AnalyzerWrapper::Gpt4o(a) => a.source(),
      #[cfg(feature = "backend_claude")]
      AnalyzerWrapper::Claude(a) => a.source(),
    }
  }

  fn analyze(&self, image: &AnalysisImage<'_>) -> Result<ComplianceResult, AnalysisError> {
    match self {
      #[cfg(feature = "backend_gemini")]
      AnalyzerWrapper::Gemini(a) => a.analyze(image),
      #[cfg(feature = "backend_gpt4o")]
      AnalyzerWrapper::Gpt4o(a) => a.analyze(image),
      #[cfg(feature = "backend_claude")]
      AnalyzerWrapper::Claude(a) => a.analyze(image),
    }
  }
}

// 发送 JSON 请求并解析 JSON 响应，非 2xx 状态转为错误
#[cfg(any(
  feature = "backend_gemini",
  feature = "backend_gpt4o",
  feature = "backend_claude"
))]
fn post_json<B, R>(request: reqwest::blocking::RequestBuilder, body: &B) -> Result<R, AnalysisError>
where
  B: Serialize,
  R: DeserializeOwned,
{
  let response = request.json(body).send()?;

  let status = response.status();
  if !status.is_success() {
    let body = response.text().unwrap_or_default();
    return Err(AnalysisError::Status {
      status: status.as_u16(),
      body,
    });
  }

  Ok(response.json()?)
}
