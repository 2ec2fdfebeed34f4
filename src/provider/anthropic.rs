//! Anthropic 어댑터 - Messages API
//!
//! ref: https://docs.anthropic.com/en/api/messages
//!
//! Anthropic은 임베딩 API를 제공하지 않으므로 생성 모델만 구현합니다.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{join_url, HttpTransport};
use super::{
    construction_error, split_system, ChatMessage, Credentials, GenerationProvider, ModelConfig,
    ModelKind, ModelOptions, Role,
};
use crate::error::RagResult;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Claude 채팅 모델
#[derive(Debug)]
pub struct AnthropicChat {
    transport: HttpTransport,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl AnthropicChat {
    pub fn from_config(config: &ModelConfig, options: &ModelOptions) -> RagResult<Self> {
        let credentials = config.credentials();
        let api_key = Credentials::require(
            &credentials.anthropic_api_key,
            ModelKind::Anthropic,
            "ANTHROPIC_API_KEY",
        )?;
        let transport = HttpTransport::new(options.timeout, options.retry)
            .map_err(|e| construction_error(ModelKind::Anthropic, e))?;

        Ok(Self {
            transport,
            api_key: api_key.to_string(),
            base_url: credentials
                .anthropic_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.model_name().to_string(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        })
    }
}

#[async_trait]
impl GenerationProvider for AnthropicChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let (system, rest) = split_system(messages);
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system,
            messages: rest
                .into_iter()
                .map(|m| WireMessage {
                    role: if m.role == Role::Assistant {
                        "assistant"
                    } else {
                        "user"
                    },
                    content: &m.content,
                })
                .collect(),
        };
        let url = join_url(&self.base_url, "messages");

        let response: MessagesResponse = self
            .transport
            .send_json("Anthropic", |client| {
                client
                    .post(&url)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", API_VERSION)
                    .json(&request)
            })
            .await?;

        let text: String = response
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();

        if text.is_empty() {
            anyhow::bail!("Anthropic response contained no text blocks");
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RetryPolicy;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_messages_request_moves_system_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant"))
            .and(header("anthropic-version", API_VERSION))
            .and(body_partial_json(json!({
                "system": "only use the context",
                "messages": [{"role": "user", "content": "question"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "answer"}]
            })))
            .mount(&server)
            .await;

        let config = ModelConfig::new(
            ModelKind::Anthropic,
            "claude-3-5-haiku-latest",
            Credentials {
                anthropic_api_key: Some("sk-ant".into()),
                anthropic_base_url: Some(format!("{}/v1", server.uri())),
                ..Default::default()
            },
        );
        let options = ModelOptions {
            retry: RetryPolicy::none(),
            ..Default::default()
        };
        let chat = AnthropicChat::from_config(&config, &options).unwrap();

        let answer = chat
            .complete(&[
                ChatMessage::system("only use the context"),
                ChatMessage::user("question"),
            ])
            .await
            .unwrap();
        assert_eq!(answer, "answer");
    }
}
