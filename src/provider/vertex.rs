//! Vertex / Gemini 어댑터 - generateContent / embedContent API
//!
//! ref: https://ai.google.dev/gemini-api/docs/embeddings
//!
//! API 키는 URL이 아닌 `x-goog-api-key` 헤더로 전송합니다.
//! `VERTEX_BASE_URL`로 Vertex AI 엔드포인트를 지정할 수 있습니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{join_url, HttpTransport, RateLimiter};
use super::{
    construction_error, split_system, ChatMessage, Credentials, EmbeddingProvider,
    GenerationProvider, ModelConfig, ModelKind, ModelOptions, Role,
};
use crate::error::RagResult;

/// Gemini API 기본 엔드포인트
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Rate Limiter 설정 (Gemini 무료 티어: 60 RPM)
const RATE_LIMIT_RPM: u32 = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// 호출 간 최소 딜레이 (1000ms = 60 RPM 준수)
const MIN_DELAY_MS: u64 = 1000;

/// 출력 차원 지정이 가능한 값 (gemini-embedding-001 MRL)
const SUPPORTED_DIMENSIONS: [usize; 3] = [768, 1536, 3072];

/// 기본 출력 차원
pub const DEFAULT_DIMENSION: usize = 768;

fn resolve(config: &ModelConfig) -> RagResult<(String, String)> {
    let credentials = config.credentials();
    let api_key = Credentials::require(&credentials.google_api_key, ModelKind::Vertex, "GEMINI_API_KEY")?;
    let base_url = credentials
        .vertex_base_url
        .clone()
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    Ok((api_key.to_string(), base_url))
}

/// `models/` 접두사 정규화
fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// Gemini API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
    #[serde(rename = "taskType")]
    task_type: &'static str,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

// ============================================================================
// VertexChat
// ============================================================================

/// Gemini 채팅 모델
#[derive(Debug)]
pub struct VertexChat {
    transport: HttpTransport,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl VertexChat {
    pub fn from_config(config: &ModelConfig, options: &ModelOptions) -> RagResult<Self> {
        let (api_key, base_url) = resolve(config)?;
        let transport = HttpTransport::new(options.timeout, options.retry)
            .map_err(|e| construction_error(ModelKind::Vertex, e))?;

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
impl GenerationProvider for VertexChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let (system, rest) = split_system(messages);
        let system = system.unwrap_or_default();

        let request = GenerateRequest {
            system_instruction: (!system.is_empty()).then(|| Content {
                role: None,
                parts: vec![Part { text: &system }],
            }),
            contents: rest
                .into_iter()
                .map(|m| Content {
                    role: Some(if m.role == Role::Assistant { "model" } else { "user" }),
                    parts: vec![Part { text: &m.content }],
                })
                .collect(),
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };
        let url = join_url(
            &self.base_url,
            &format!("{}:generateContent", model_path(&self.model)),
        );

        let response: GenerateResponse = self
            .transport
            .send_json("Gemini", |client| {
                client
                    .post(&url)
                    .header("x-goog-api-key", &self.api_key)
                    .json(&request)
            })
            .await?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .context("Gemini response contained no candidates")?
            .content
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();

        if text.is_empty() {
            anyhow::bail!("Gemini response contained no text parts");
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// VertexEmbedding
// ============================================================================

/// Gemini 임베딩 구현체
///
/// Gemini는 배치 API가 없으므로 순차 처리하며, Rate Limiter가 호출 간격을 조절합니다.
#[derive(Debug)]
pub struct VertexEmbedding {
    transport: HttpTransport,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

impl VertexEmbedding {
    pub fn from_config(config: &ModelConfig, options: &ModelOptions) -> RagResult<Self> {
        let dimension = options.embedding_dimension.unwrap_or(DEFAULT_DIMENSION);
        // 유효한 차원 확인
        if !SUPPORTED_DIMENSIONS.contains(&dimension) {
            return Err(crate::error::ConfigError::Invalid(format!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            ))
            .into());
        }

        let (api_key, base_url) = resolve(config)?;
        let transport = HttpTransport::new(options.timeout, options.retry)
            .map_err(|e| construction_error(ModelKind::Vertex, e))?
            .with_rate_limiter(RateLimiter::new(
                RATE_LIMIT_RPM,
                RATE_LIMIT_WINDOW,
                Duration::from_millis(MIN_DELAY_MS),
            ));

        Ok(Self {
            transport,
            api_key,
            base_url,
            model: config.model_name().to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for VertexEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let model = model_path(&self.model);
        let request = EmbedRequest {
            model: model.clone(),
            content: Content {
                role: None,
                parts: vec![Part { text }],
            },
            task_type: "RETRIEVAL_DOCUMENT",
            output_dimensionality: Some(self.dimension),
        };
        let url = join_url(&self.base_url, &format!("{}:embedContent", model));

        let response: EmbedResponse = self
            .transport
            .send_json("Gemini", |client| {
                client
                    .post(&url)
                    .header("x-goog-api-key", &self.api_key)
                    .json(&request)
            })
            .await?;

        Ok(response.embedding.values)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        for (i, text) in texts.iter().enumerate() {
            tracing::debug!("Embedding batch {}/{}", i + 1, texts.len());
            results.push(self.embed(text).await?);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
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
    use crate::error::{ConfigError, RagError};
    use crate::provider::RetryPolicy;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: Option<String>) -> ModelConfig {
        ModelConfig::new(
            ModelKind::Vertex,
            "gemini-embedding-001",
            Credentials {
                google_api_key: Some("fake_key".into()),
                vertex_base_url: base_url,
                ..Default::default()
            },
        )
    }

    fn options(dimension: usize) -> ModelOptions {
        ModelOptions {
            retry: RetryPolicy::none(),
            embedding_dimension: Some(dimension),
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_dimension() {
        let result = VertexEmbedding::from_config(&config(None), &options(999));
        assert!(matches!(
            result,
            Err(RagError::Config(ConfigError::Invalid(msg))) if msg.contains("Invalid dimension")
        ));
    }

    #[test]
    fn test_valid_dimensions() {
        for dim in [768, 1536, 3072] {
            assert!(VertexEmbedding::from_config(&config(None), &options(dim)).is_ok());
        }
    }

    #[test]
    fn test_model_path() {
        assert_eq!(model_path("gemini-1.5-flash"), "models/gemini-1.5-flash");
        assert_eq!(model_path("models/x"), "models/x");
    }

    #[tokio::test]
    async fn test_embed_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-embedding-001:embedContent"))
            .and(header("x-goog-api-key", "fake_key"))
            .and(body_partial_json(json!({"outputDimensionality": 768})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embedding": {"values": vec![0.25; 768]}
            })))
            .mount(&server)
            .await;

        let embedder = VertexEmbedding::from_config(&config(Some(server.uri())), &options(768)).unwrap();
        let vector = embedder.embed("hello").await.unwrap();
        assert_eq!(vector.len(), 768);
    }

    #[tokio::test]
    async fn test_generate_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash:generateContent"))
            .and(body_partial_json(json!({
                "systemInstruction": {"parts": [{"text": "rules"}]},
                "contents": [{"role": "user", "parts": [{"text": "q"}]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "a"}, {"text": "b"}]}}]
            })))
            .mount(&server)
            .await;

        let config = ModelConfig::new(
            ModelKind::Vertex,
            "gemini-1.5-flash",
            Credentials {
                google_api_key: Some("fake_key".into()),
                vertex_base_url: Some(server.uri()),
                ..Default::default()
            },
        );
        let chat = VertexChat::from_config(&config, &options(768)).unwrap();
        let answer = chat
            .complete(&[ChatMessage::system("rules"), ChatMessage::user("q")])
            .await
            .unwrap();
        assert_eq!(answer, "ab");
    }
}
