//! 모델 프로바이더 - 임베딩/생성 모델 핸들 생성
//!
//! OpenAI, Anthropic, Bedrock, Vertex(Gemini) 네 가지 프로바이더를
//! `ModelKind` 열거형으로 분기합니다. 임베딩과 생성은 별도 팩토리로 분리되어
//! 배포 환경에서 프로바이더를 섞어 쓸 수 있습니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let config = ModelConfig::new(ModelKind::OpenAi, "gpt-4o-mini", credentials);
//! let model = create_generation_model(&config, &ModelOptions::default())?;
//! let answer = model.complete(&[ChatMessage::user("Hello")]).await?;
//! ```

pub mod anthropic;
pub mod bedrock;
pub mod http;
pub mod openai;
pub mod vertex;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RagError, RagResult};

pub use anthropic::AnthropicChat;
pub use bedrock::{BedrockChat, BedrockEmbedding};
pub use http::{HttpTransport, RetryPolicy};
pub use openai::{OpenAiChat, OpenAiEmbedding};
pub use vertex::{VertexChat, VertexEmbedding};

// ============================================================================
// Capability Traits
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
/// 같은 모델 버전에서는 결정적이어야 합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// `embed_batch` 한 번에 보낼 최대 텍스트 수
    ///
    /// 호출자는 이 크기 단위로 나누어 호출마다 타임아웃을 겁니다.
    /// 기본값 1은 텍스트마다 요청 하나인 프로바이더용입니다.
    fn max_batch_size(&self) -> usize {
        1
    }

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

/// 생성(채팅) 프로바이더 트레이트
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// 메시지 목록으로 응답 생성 (요청/응답, 스트리밍 없음)
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// 모델 이름
    fn model_name(&self) -> &str;
}

/// 채팅 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 채팅 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// 시스템 메시지와 나머지 대화 분리 (Anthropic, Bedrock, Gemini 형식용)
pub(crate) fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let rest = messages.iter().filter(|m| m.role != Role::System).collect();

    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, rest)
}

// ============================================================================
// Model Configuration
// ============================================================================

/// 모델 프로바이더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Bedrock,
    Vertex,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::OpenAi => "openai",
            ModelKind::Anthropic => "anthropic",
            ModelKind::Bedrock => "bedrock",
            ModelKind::Vertex => "vertex",
        }
    }

    /// 폴백 체인에서 사용하는 기본 생성 모델
    pub fn default_generation_model(&self) -> &'static str {
        match self {
            ModelKind::OpenAi => "gpt-3.5-turbo",
            ModelKind::Anthropic => "claude-3-5-haiku-latest",
            ModelKind::Bedrock => "anthropic.claude-3-haiku-20240307-v1:0",
            ModelKind::Vertex => "gemini-1.5-flash",
        }
    }

    /// 기본 임베딩 차원 (각 기본 임베딩 모델이 허용하는 값)
    pub fn default_embedding_dimension(&self) -> Option<usize> {
        match self {
            ModelKind::OpenAi => Some(openai::DEFAULT_DIMENSION),
            ModelKind::Anthropic => None,
            ModelKind::Bedrock => Some(bedrock::DEFAULT_DIMENSION),
            ModelKind::Vertex => Some(vertex::DEFAULT_DIMENSION),
        }
    }

    /// 기본 임베딩 모델 (Anthropic은 임베딩 API 없음)
    pub fn default_embedding_model(&self) -> Option<&'static str> {
        match self {
            ModelKind::OpenAi => Some("text-embedding-3-small"),
            ModelKind::Anthropic => None,
            ModelKind::Bedrock => Some("amazon.titan-embed-text-v2:0"),
            ModelKind::Vertex => Some("gemini-embedding-001"),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ModelKind::OpenAi),
            "anthropic" => Ok(ModelKind::Anthropic),
            "bedrock" => Ok(ModelKind::Bedrock),
            "vertex" => Ok(ModelKind::Vertex),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// 모델 기능 (에러 메시지용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Embedding,
    Generation,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Embedding => f.write_str("embedding"),
            Capability::Generation => f.write_str("generation"),
        }
    }
}

/// 프로바이더별 인증 정보 묶음
///
/// 각 팩토리는 자신이 필요한 항목만 읽습니다. 누락 시 `MissingCredential`.
#[derive(Clone, Default, PartialEq)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: Option<String>,
    /// Bedrock API 키 (Bearer 토큰)
    pub bedrock_api_key: Option<String>,
    pub aws_region: Option<String>,
    /// Google AI / Vertex API 키
    pub google_api_key: Option<String>,
    pub vertex_base_url: Option<String>,
}

// API 키가 로그에 남지 않도록 직접 구현
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn mask(v: &Option<String>) -> &'static str {
            if v.is_some() {
                "<set>"
            } else {
                "<unset>"
            }
        }

        f.debug_struct("Credentials")
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("anthropic_api_key", &mask(&self.anthropic_api_key))
            .field("anthropic_base_url", &self.anthropic_base_url)
            .field("bedrock_api_key", &mask(&self.bedrock_api_key))
            .field("aws_region", &self.aws_region)
            .field("google_api_key", &mask(&self.google_api_key))
            .field("vertex_base_url", &self.vertex_base_url)
            .finish()
    }
}

impl Credentials {
    /// 필수 인증 정보 조회
    pub(crate) fn require<'a>(
        value: &'a Option<String>,
        provider: ModelKind,
        name: &'static str,
    ) -> std::result::Result<&'a str, ConfigError> {
        value
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingCredential { provider, name })
    }
}

/// 모델 설정 (생성 후 읽기 전용)
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    provider: ModelKind,
    model_name: String,
    credentials: Credentials,
}

impl ModelConfig {
    pub fn new(provider: ModelKind, model_name: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            provider,
            model_name: model_name.into(),
            credentials,
        }
    }

    pub fn provider(&self) -> ModelKind {
        self.provider
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

/// 모델 호출 옵션
#[derive(Debug, Clone)]
pub struct ModelOptions {
    /// 요청 타임아웃
    pub timeout: Duration,
    /// 생성 온도 (근거 기반 답변은 0 권장)
    pub temperature: f32,
    /// 최대 출력 토큰
    pub max_tokens: u32,
    /// 임베딩 차원 (None이면 프로바이더 기본값)
    pub embedding_dimension: Option<usize>,
    pub retry: RetryPolicy,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            timeout: http::DEFAULT_TIMEOUT,
            temperature: 0.0,
            max_tokens: 1024,
            embedding_dimension: None,
            retry: RetryPolicy::default(),
        }
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 임베딩 모델 생성
///
/// Anthropic은 임베딩 API가 없으므로 `UnsupportedProvider`를 반환합니다.
pub fn create_embedding_model(
    config: &ModelConfig,
    options: &ModelOptions,
) -> RagResult<Arc<dyn EmbeddingProvider>> {
    let model: Arc<dyn EmbeddingProvider> = match config.provider() {
        ModelKind::OpenAi => Arc::new(OpenAiEmbedding::from_config(config, options)?),
        ModelKind::Bedrock => Arc::new(BedrockEmbedding::from_config(config, options)?),
        ModelKind::Vertex => Arc::new(VertexEmbedding::from_config(config, options)?),
        ModelKind::Anthropic => {
            return Err(ConfigError::UnsupportedProvider {
                provider: ModelKind::Anthropic,
                capability: Capability::Embedding,
            }
            .into())
        }
    };

    tracing::info!(
        "Using {} embedding model {} (dimension: {})",
        config.provider(),
        config.model_name(),
        model.dimension()
    );
    Ok(model)
}

/// 생성 모델 생성
pub fn create_generation_model(
    config: &ModelConfig,
    options: &ModelOptions,
) -> RagResult<Arc<dyn GenerationProvider>> {
    let model: Arc<dyn GenerationProvider> = match config.provider() {
        ModelKind::OpenAi => Arc::new(OpenAiChat::from_config(config, options)?),
        ModelKind::Anthropic => Arc::new(AnthropicChat::from_config(config, options)?),
        ModelKind::Bedrock => Arc::new(BedrockChat::from_config(config, options)?),
        ModelKind::Vertex => Arc::new(VertexChat::from_config(config, options)?),
    };

    tracing::info!(
        "Using {} generation model {}",
        config.provider(),
        config.model_name()
    );
    Ok(model)
}

/// 어댑터 생성 중 발생한 anyhow 에러를 설정 에러로 변환
pub(crate) fn construction_error(provider: ModelKind, err: anyhow::Error) -> RagError {
    ConfigError::Invalid(format!("failed to construct {} client: {:#}", provider, err)).into()
}

// ============================================================================
// Fallback Chain
// ============================================================================

/// 폴백 우선순위 (OpenAI → Anthropic → Vertex)
pub const FALLBACK_ORDER: [ModelKind; 3] = [ModelKind::OpenAi, ModelKind::Anthropic, ModelKind::Vertex];

/// 폴백 시도 기록
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackAttempt {
    pub provider: ModelKind,
    /// 실패 사유 (성공 시 None)
    pub error: Option<String>,
}

/// 폴백 결과
pub struct FallbackOutcome<T> {
    pub model: T,
    pub provider: ModelKind,
    /// 시도 순서대로의 기록 (마지막이 성공한 시도)
    pub attempts: Vec<FallbackAttempt>,
}

impl<T> FallbackOutcome<T> {
    /// 실패한 시도 수
    pub fn failures(&self) -> usize {
        self.attempts.iter().filter(|a| a.error.is_some()).count()
    }
}

/// 순서대로 시도하여 첫 번째 성공을 반환
///
/// 각 실패는 경고로 기록되고 다음 프로바이더로 넘어갑니다.
/// 모두 실패하면 `NoAvailableModel`.
pub fn first_available<T, F>(order: &[ModelKind], mut build: F) -> RagResult<FallbackOutcome<T>>
where
    F: FnMut(ModelKind) -> RagResult<T>,
{
    let mut attempts = Vec::with_capacity(order.len());

    for &provider in order {
        match build(provider) {
            Ok(model) => {
                attempts.push(FallbackAttempt {
                    provider,
                    error: None,
                });
                return Ok(FallbackOutcome {
                    model,
                    provider,
                    attempts,
                });
            }
            Err(e) => {
                tracing::warn!("Failed to initialize {} chat model: {}", provider, e);
                attempts.push(FallbackAttempt {
                    provider,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    Err(RagError::NoAvailableModel {
        attempted: attempts.iter().map(|a| a.provider.to_string()).collect(),
    })
}

/// 폴백 체인으로 채팅 모델 생성
///
/// 시도마다 새 `ModelConfig`를 만들며 기존 설정은 변경하지 않습니다.
pub fn create_chat_model_with_fallback(
    credentials: &Credentials,
    options: &ModelOptions,
) -> RagResult<FallbackOutcome<Arc<dyn GenerationProvider>>> {
    first_available(&FALLBACK_ORDER, |provider| {
        let config = ModelConfig::new(
            provider,
            provider.default_generation_model(),
            credentials.clone(),
        );
        create_generation_model(&config, options)
    })
}

// ============================================================================
// Tests
// ============================================================================
