//! OpenAI 어댑터 - Chat Completions / Embeddings API
//!
//! ref: https://platform.openai.com/docs/api-reference
//!
//! `OPENAI_BASE_URL`로 호환 엔드포인트(Azure, 로컬 프록시 등)를 지정할 수 있습니다.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{join_url, HttpTransport};
use super::{
    construction_error, ChatMessage, Credentials, EmbeddingProvider, GenerationProvider,
    ModelConfig, ModelKind, ModelOptions,
};
use crate::error::RagResult;

/// 기본 API 엔드포인트
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// text-embedding-3-small 기본 차원
pub const DEFAULT_DIMENSION: usize = 1536;

/// 임베딩 요청 하나에 담는 최대 입력 수
pub const MAX_INPUTS_PER_REQUEST: usize = 256;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

fn resolve(config: &ModelConfig) -> RagResult<(String, String)> {
    let credentials = config.credentials();
    let api_key = Credentials::require(&credentials.openai_api_key, ModelKind::OpenAi, "OPENAI_API_KEY")?;
    let base_url = credentials
        .openai_base_url
        .clone()
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    Ok((api_key.to_string(), base_url))
}

// ============================================================================
// OpenAiChat
// ============================================================================

/// OpenAI 채팅 모델
#[derive(Debug)]
pub struct OpenAiChat {
    transport: HttpTransport,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiChat {
    pub fn from_config(config: &ModelConfig, options: &ModelOptions) -> RagResult<Self> {
        let (api_key, base_url) = resolve(config)?;
        let transport = HttpTransport::new(options.timeout, options.retry)
            .map_err(|e| construction_error(ModelKind::OpenAi, e))?;

        Ok(Self {
            transport,
            api_key,
            base_url,
            model: config.model_name().to_string(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let url = join_url(&self.base_url, "chat/completions");

        let response: ChatResponse = self
            .transport
            .send_json("OpenAI", |client| {
                client.post(&url).bearer_auth(&self.api_key).json(&request)
            })
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("OpenAI response contained no message content")
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// OpenAiEmbedding
// ============================================================================

/// OpenAI 임베딩 모델
#[derive(Debug)]
pub struct OpenAiEmbedding {
    transport: HttpTransport,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedding {
    pub fn from_config(config: &ModelConfig, options: &ModelOptions) -> RagResult<Self> {
        let (api_key, base_url) = resolve(config)?;
        let transport = HttpTransport::new(options.timeout, options.retry)
            .map_err(|e| construction_error(ModelKind::OpenAi, e))?;

        Ok(Self {
            transport,
            api_key,
            base_url,
            model: config.model_name().to_string(),
            dimension: options.embedding_dimension.unwrap_or(DEFAULT_DIMENSION),
        })
    }

    /// 요청 하나로 임베딩 (입력 수는 호출자가 제한)
    async fn embed_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
            dimensions: self.requested_dimension(),
        };
        let url = join_url(&self.base_url, "embeddings");

        let response: EmbedResponse = self
            .transport
            .send_json("OpenAI", |client| {
                client.post(&url).bearer_auth(&self.api_key).json(&request)
            })
            .await?;

        if response.data.len() != texts.len() {
            anyhow::bail!(
                "OpenAI returned {} embeddings for {} inputs",
                response.data.len(),
                texts.len()
            );
        }

        // 응답 순서는 보장되지 않으므로 index로 정렬
        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    /// text-embedding-3 계열만 `dimensions` 파라미터를 지원
    fn requested_dimension(&self) -> Option<usize> {
        self.model
            .starts_with("text-embedding-3")
            .then_some(self.dimension)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().context("OpenAI returned no embedding")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_INPUTS_PER_REQUEST) {
            results.extend(self.embed_request(batch).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_batch_size(&self) -> usize {
        MAX_INPUTS_PER_REQUEST
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RetryPolicy;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, model: &str) -> ModelConfig {
        ModelConfig::new(
            ModelKind::OpenAi,
            model,
            Credentials {
                openai_api_key: Some("sk-test".to_string()),
                openai_base_url: Some(format!("{}/v1", server.uri())),
                ..Default::default()
            },
        )
    }

    fn options() -> ModelOptions {
        ModelOptions {
            retry: RetryPolicy::none(),
            embedding_dimension: Some(3),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "grounded answer"}}]
            })))
            .mount(&server)
            .await;

        let chat = OpenAiChat::from_config(&config(&server, "gpt-4o-mini"), &options()).unwrap();
        let answer = chat
            .complete(&[ChatMessage::system("rules"), ChatMessage::user("q")])
            .await
            .unwrap();
        assert_eq!(answer, "grounded answer");
        assert_eq!(chat.model_name(), "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_embed_batch_sorted_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                    {"index": 0, "embedding": [1.0, 0.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let embedder =
            OpenAiEmbedding::from_config(&config(&server, "text-embedding-3-small"), &options()).unwrap();
        let vectors = embedder
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0, 0.0]);
        assert_eq!(embedder.requested_dimension(), Some(3));
    }

    #[tokio::test]
    async fn test_embed_blank_text_skips_request() {
        let server = MockServer::start().await;
        let embedder =
            OpenAiEmbedding::from_config(&config(&server, "text-embedding-ada-002"), &options()).unwrap();
        assert_eq!(embedder.embed("   ").await.unwrap(), vec![0.0; 3]);
        assert_eq!(embedder.requested_dimension(), None);
    }

    #[tokio::test]
    async fn test_embed_batch_splits_large_input() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(|request: &wiremock::Request| {
                let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
                let inputs = body["input"].as_array().unwrap().len();
                assert!(inputs <= MAX_INPUTS_PER_REQUEST);

                let data: Vec<_> = (0..inputs)
                    .map(|i| json!({"index": i, "embedding": [1.0, 0.0, 0.0]}))
                    .collect();
                ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
            })
            .expect(2)
            .mount(&server)
            .await;

        let embedder =
            OpenAiEmbedding::from_config(&config(&server, "text-embedding-3-small"), &options()).unwrap();
        let texts: Vec<String> = (0..MAX_INPUTS_PER_REQUEST + 10).map(|i| format!("chunk {i}")).collect();

        let vectors = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), texts.len());
        assert_eq!(embedder.max_batch_size(), MAX_INPUTS_PER_REQUEST);
    }
}
