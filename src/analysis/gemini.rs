// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/analysis/gemini.rs - Gemini 分析后端
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

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::{
  analysis::{
    AnalysisError, AnalysisImage, Analyzer, AnalyzerConfig, post_json,
    prompt::COMPLIANCE_PROMPT,
  },
  compliance::ComplianceResult,
};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/";

pub struct GeminiAnalyzer {
  client: Client,
  endpoint: Url,
  config: AnalyzerConfig,
}

#[derive(Serialize, Debug)]
struct GenerateRequest {
  contents: Vec<Content>,
  #[serde(rename = "generationConfig")]
  generation_config: GenerationConfig,
}

#[derive(Serialize, Debug)]
struct Content {
  parts: Vec<Part>,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
enum Part {
  Text { text: String },
  Image { inline_data: InlineData },
}

#[derive(Serialize, Debug)]
struct InlineData {
  mime_type: String,
  data: String,
}

#[derive(Serialize, Debug)]
struct GenerationConfig {
  temperature: f32,
  #[serde(rename = "maxOutputTokens")]
  max_output_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
  #[serde(default)]
  candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
  content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
  #[serde(default)]
  parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
  text: Option<String>,
}

impl GeminiAnalyzer {
  pub fn new(config: AnalyzerConfig) -> Result<Self, AnalysisError> {
    config.require_api_key()?;
    let endpoint = config.endpoint_or(DEFAULT_ENDPOINT)?;
    let client = config.http_client()?;
    info!("使用 Gemini 后端，模型 {}", config.model);
    Ok(Self {
      client,
      endpoint,
      config,
    })
  }

  fn request_url(&self) -> Result<Url, AnalysisError> {
    let path = format!("v1beta/models/{}:generateContent", self.config.model);
    let mut url = self
      .endpoint
      .join(&path)
      .map_err(|e| AnalysisError::InvalidConfig(e.to_string()))?;
    url.query_pairs_mut().append_pair("key", &self.config.api_key);
    Ok(url)
  }
}

fn build_request(config: &AnalyzerConfig, mime: &str, data: String) -> GenerateRequest {
  GenerateRequest {
    contents: vec![Content {
      parts: vec![
        Part::Text {
          text: COMPLIANCE_PROMPT.to_string(),
        },
        Part::Image {
          inline_data: InlineData {
            mime_type: mime.to_string(),
            data,
          },
        },
      ],
    }],
    generation_config: GenerationConfig {
      temperature: config.temperature,
      max_output_tokens: config.max_tokens,
    },
  }
}

fn response_text(response: GenerateResponse) -> Result<String, AnalysisError> {
  let text = response
    .candidates
    .into_iter()
    .next()
    .and_then(|c| c.content)
    .map(|c| {
      c.parts
        .into_iter()
        .filter_map(|p| p.text)
        .collect::<Vec<_>>()
        .join("")
    })
    .unwrap_or_default();

  if text.trim().is_empty() {
    return Err(AnalysisError::EmptyResponse);
  }
  Ok(text)
}

impl Analyzer for GeminiAnalyzer {
  fn name(&self) -> &'static str {
    "gemini"
  }

  fn analyze(&self, image: &AnalysisImage<'_>) -> Result<ComplianceResult, AnalysisError> {
    let (mime, data) = image.payload_base64(self.source())?;
    let body = build_request(&self.config, mime, data);
    debug!("向 Gemini 提交 {}", image.filename);

    let response: GenerateResponse = post_json(self.client.post(self.request_url()?), &body)?;
    let text = response_text(response)?;
    Ok(ComplianceResult::from_response_text(&text)?)
  }
}
