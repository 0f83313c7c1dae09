// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/analysis/claude.rs - Claude 分析后端
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
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use crate::{
  analysis::{
    AnalysisError, AnalysisImage, Analyzer, AnalyzerConfig, post_json,
    prompt::{COMPLIANCE_PROMPT, SYSTEM_PROMPT},
  },
  compliance::ComplianceResult,
};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/";
const API_VERSION: &str = "2023-06-01";

pub struct ClaudeAnalyzer {
  client: Client,
  endpoint: Url,
  config: AnalyzerConfig,
}

#[derive(Serialize, Debug)]
struct MessagesRequest {
  model: String,
  max_tokens: u32,
  temperature: f32,
  system: &'static str,
  messages: Vec<Value>,
}

#[derive(Deserialize, Debug)]
struct MessagesResponse {
  #[serde(default)]
  content: Vec<ContentBlock>,
}

#[derive(Deserialize, Debug)]
struct ContentBlock {
  #[serde(rename = "type")]
  kind: String,
  text: Option<String>,
}

impl ClaudeAnalyzer {
  pub fn new(config: AnalyzerConfig) -> Result<Self, AnalysisError> {
    config.require_api_key()?;
    let endpoint = config
      .endpoint_or(DEFAULT_ENDPOINT)?
      .join("v1/messages")
      .map_err(|e| AnalysisError::InvalidConfig(e.to_string()))?;
    let client = config.http_client()?;
    info!("使用 Claude 后端，模型 {}", config.model);
    Ok(Self {
      client,
      endpoint,
      config,
    })
  }
}

fn build_request(config: &AnalyzerConfig, mime: &str, data: String) -> MessagesRequest {
  MessagesRequest {
    model: config.model.clone(),
    max_tokens: config.max_tokens,
    temperature: config.temperature,
    system: SYSTEM_PROMPT,
    messages: vec![json!({
      "role": "user",
      "content": [
        {
          "type": "image",
          "source": { "type": "base64", "media_type": mime, "data": data }
        },
        { "type": "text", "text": COMPLIANCE_PROMPT }
      ]
    })],
  }
}

fn response_text(response: MessagesResponse) -> Result<String, AnalysisError> {
  let text = response
    .content
    .into_iter()
    .filter(|b| b.kind == "text")
    .filter_map(|b| b.text)
    .collect::<Vec<_>>()
    .join("\n");

  if text.trim().is_empty() {
    return Err(AnalysisError::EmptyResponse);
  }
  Ok(text)
}

impl Analyzer for ClaudeAnalyzer {
  fn name(&self) -> &'static str {
    "claude"
  }

  fn analyze(&self, image: &AnalysisImage<'_>) -> Result<ComplianceResult, AnalysisError> {
    let (mime, data) = image.payload_base64(self.source())?;
    let body = build_request(&self.config, mime, data);
    debug!("向 Claude 提交 {}", image.filename);

    let request = self
      .client
      .post(self.endpoint.clone())
      .header("x-api-key", &self.config.api_key)
      .header("anthropic-version", API_VERSION);
    let response: MessagesResponse = post_json(request, &body)?;
    let text = response_text(response)?;
    Ok(ComplianceResult::from_response_text(&text)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::analysis::{AnalysisSource, BackendKind};

  fn config() -> AnalyzerConfig {
    AnalyzerConfig::new(BackendKind::Claude).with_api_key("key")
  }

  #[test]
  fn request_sends_image_before_prompt() {
    let body = serde_json::to_value(build_request(&config(), "image/png", "Zm9v".into())).unwrap();
    assert_eq!(body["system"], SYSTEM_PROMPT);
    let content = &body["messages"][0]["content"];
    assert_eq!(content[0]["source"]["media_type"], "image/png");
    assert_eq!(content[0]["source"]["data"], "Zm9v");
    assert_eq!(content[1]["text"], COMPLIANCE_PROMPT);
  }

  #[test]
  fn custom_endpoint_is_respected() {
    let config = config().with_endpoint(Url::parse("http://127.0.0.1:8080/proxy/").unwrap());
    let analyzer = ClaudeAnalyzer::new(config).unwrap();
    assert_eq!(
      analyzer.endpoint.as_str(),
      "http://127.0.0.1:8080/proxy/v1/messages"
    );
    assert_eq!(analyzer.source(), AnalysisSource::Processed);
  }

  #[test]
  fn only_text_blocks_are_read() {
    let response: MessagesResponse = serde_json::from_str(
      r#"{"content":[{"type":"tool_use","id":"x"},{"type":"text","text":"{\"compliance_score\": 75}"}]}"#,
    )
    .unwrap();
    let result = ComplianceResult::from_response_text(&response_text(response).unwrap()).unwrap();
    assert_eq!(result.score, 75);
  }
}
