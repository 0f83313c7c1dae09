// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/analysis/gpt4o.rs - GPT-4o 分析后端
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
    AnalysisError, AnalysisImage, AnalysisSource, Analyzer, AnalyzerConfig, post_json,
    prompt::{COMPLIANCE_PROMPT, SYSTEM_PROMPT},
  },
  compliance::ComplianceResult,
};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/";

/// OpenAI chat completions 后端
///
/// 上传的是原始字节而不是预处理图像，所以返回的坐标相对于原图。
pub struct Gpt4oAnalyzer {
  client: Client,
  endpoint: Url,
  config: AnalyzerConfig,
}

#[derive(Serialize, Debug)]
struct ChatRequest {
  model: String,
  messages: Vec<Value>,
  temperature: f32,
  max_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
  #[serde(default)]
  choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
  message: ChatMessage,
}

#[derive(Deserialize, Debug)]
struct ChatMessage {
  content: Option<String>,
}

impl Gpt4oAnalyzer {
  pub fn new(config: AnalyzerConfig) -> Result<Self, AnalysisError> {
    config.require_api_key()?;
    let endpoint = config
      .endpoint_or(DEFAULT_ENDPOINT)?
      .join("v1/chat/completions")
      .map_err(|e| AnalysisError::InvalidConfig(e.to_string()))?;
    let client = config.http_client()?;
    info!("使用 GPT-4o 后端，模型 {}", config.model);
    Ok(Self {
      client,
      endpoint,
      config,
    })
  }
}

fn build_request(config: &AnalyzerConfig, mime: &str, data: &str) -> ChatRequest {
  let data_url = format!("data:{};base64,{}", mime, data);
  ChatRequest {
    model: config.model.clone(),
    messages: vec![
      json!({ "role": "system", "content": SYSTEM_PROMPT }),
      json!({
        "role": "user",
        "content": [
          { "type": "text", "text": COMPLIANCE_PROMPT },
          { "type": "image_url", "image_url": { "url": data_url } }
        ]
      }),
    ],
    temperature: config.temperature,
    max_tokens: config.max_tokens,
  }
}

fn response_text(response: ChatResponse) -> Result<String, AnalysisError> {
  response
    .choices
    .into_iter()
    .next()
    .and_then(|c| c.message.content)
    .filter(|t| !t.trim().is_empty())
    .ok_or(AnalysisError::EmptyResponse)
}

impl Analyzer for Gpt4oAnalyzer {
  fn name(&self) -> &'static str {
    "gpt4o"
  }

  fn source(&self) -> AnalysisSource {
    AnalysisSource::Original
  }

  fn analyze(&self, image: &AnalysisImage<'_>) -> Result<ComplianceResult, AnalysisError> {
    let (mime, data) = image.payload_base64(self.source())?;
    let body = build_request(&self.config, mime, &data);
    debug!("向 GPT-4o 提交 {} ({})", image.filename, mime);

    let request = self
      .client
      .post(self.endpoint.clone())
      .bearer_auth(&self.config.api_key);
    let response: ChatResponse = post_json(request, &body)?;
    let text = response_text(response)?;
    Ok(ComplianceResult::from_response_text(&text)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::analysis::BackendKind;

  fn config() -> AnalyzerConfig {
    AnalyzerConfig::new(BackendKind::Gpt4o).with_api_key("sk-test")
  }

  #[test]
  fn request_embeds_data_url() {
    let body = serde_json::to_value(build_request(&config(), "image/jpeg", "QUJD")).unwrap();
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["max_tokens"], 1000);
    assert_eq!(body["messages"][0]["role"], "system");
    let content = &body["messages"][1]["content"];
    assert_eq!(content[0]["text"], COMPLIANCE_PROMPT);
    assert_eq!(content[1]["image_url"]["url"], "data:image/jpeg;base64,QUJD");
  }

  #[test]
  fn endpoint_is_chat_completions() {
    let analyzer = Gpt4oAnalyzer::new(config()).unwrap();
    assert_eq!(
      analyzer.endpoint.as_str(),
      "https://api.openai.com/v1/chat/completions"
    );
    assert_eq!(analyzer.source(), AnalysisSource::Original);
  }

  #[test]
  fn first_choice_is_used() {
    let response: ChatResponse = serde_json::from_str(
      r#"{"choices":[{"message":{"content":"```json\n{\"is_compliant\": true}\n```"}}]}"#,
    )
    .unwrap();
    let result = ComplianceResult::from_response_text(&response_text(response).unwrap()).unwrap();
    assert!(result.compliant);
  }

  #[test]
  fn missing_content_is_an_error() {
    let response: ChatResponse =
      serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
    assert!(matches!(
      response_text(response),
      Err(AnalysisError::EmptyResponse)
    ));
  }
}
