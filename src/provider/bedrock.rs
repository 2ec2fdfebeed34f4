//! AWS Bedrock 어댑터 - Converse / InvokeModel API
//!
//! ref: https://docs.aws.amazon.com/bedrock/latest/APIReference/API_runtime_Converse.html
//!
//! Bedrock API 키(`AWS_BEARER_TOKEN_BEDROCK`)로 Bearer 인증합니다.
//! 임베딩은 Titan Text Embeddings 요청 형식을 사용합니다.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use super::http::HttpTransport;
use super::{
    construction_error, split_system, ChatMessage, Credentials, EmbeddingProvider,
    GenerationProvider, ModelConfig, ModelKind, ModelOptions, Role,
};
use crate::error::{ConfigError, RagResult};

const DEFAULT_REGION: &str = "us-east-1";

/// Titan v2 기본 출력 차원
pub const DEFAULT_DIMENSION: usize = 1024;

/// Titan v2가 허용하는 출력 차원
const TITAN_V2_DIMENSIONS: [usize; 3] = [256, 512, 1024];

/// Titan v1 고정 차원
const TITAN_V1_DIMENSION: usize = 1536;

fn is_titan_v2(model: &str) -> bool {
    model.contains("titan-embed-text-v2")
}

/// 리전별 런타임 엔드포인트
fn runtime_endpoint(region: &str) -> String {
    format!("https://bedrock-runtime.{}.amazonaws.com", region)
}

/// `{endpoint}/model/{model_id}/{action}` (모델 ID는 경로 세그먼트로 인코딩)
fn model_url(endpoint: &str, model_id: &str, action: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint).context("Invalid Bedrock endpoint")?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("Bedrock endpoint cannot be a base URL"))?
        .pop_if_empty()
        .extend(["model", model_id, action]);
    Ok(url)
}

fn resolve(config: &ModelConfig) -> RagResult<(String, String)> {
    let credentials = config.credentials();
    let token = Credentials::require(
        &credentials.bedrock_api_key,
        ModelKind::Bedrock,
        "AWS_BEARER_TOKEN_BEDROCK",
    )?;
    let region = credentials
        .aws_region
        .clone()
        .unwrap_or_else(|| DEFAULT_REGION.to_string());
    Url::parse(&runtime_endpoint(&region))
        .map_err(|e| ConfigError::Invalid(format!("invalid AWS region '{}': {}", region, e)))?;
    Ok((token.to_string(), runtime_endpoint(&region)))
}

// ============================================================================
// Converse (Generation)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConverseRequest<'a> {
    messages: Vec<ConverseMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<TextBlock<'a>>,
    inference_config: InferenceConfig,
}

#[derive(Debug, Serialize)]
struct ConverseMessage<'a> {
    role: &'static str,
    content: Vec<TextBlock<'a>>,
}

#[derive(Debug, Serialize)]
struct TextBlock<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InferenceConfig {
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ConverseResponse {
    output: ConverseOutput,
}

#[derive(Debug, Deserialize)]
struct ConverseOutput {
    message: OutputMessage,
}

#[derive(Debug, Deserialize)]
struct OutputMessage {
    content: Vec<OutputBlock>,
}

#[derive(Debug, Deserialize)]
struct OutputBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Bedrock 채팅 모델 (Converse API)
#[derive(Debug)]
pub struct BedrockChat {
    transport: HttpTransport,
    token: String,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl BedrockChat {
    pub fn from_config(config: &ModelConfig, options: &ModelOptions) -> RagResult<Self> {
        let (token, endpoint) = resolve(config)?;
        let transport = HttpTransport::new(options.timeout, options.retry)
            .map_err(|e| construction_error(ModelKind::Bedrock, e))?;

        Ok(Self {
            transport,
            token,
            endpoint,
            model: config.model_name().to_string(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        })
    }

    /// 엔드포인트 재지정 (VPC 엔드포인트, 테스트용)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl GenerationProvider for BedrockChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let (system, rest) = split_system(messages);
        let system_text = system.unwrap_or_default();

        let request = ConverseRequest {
            messages: rest
                .into_iter()
                .map(|m| ConverseMessage {
                    role: if m.role == Role::Assistant {
                        "assistant"
                    } else {
                        "user"
                    },
                    content: vec![TextBlock { text: &m.content }],
                })
                .collect(),
            system: if system_text.is_empty() {
                vec![]
            } else {
                vec![TextBlock { text: &system_text }]
            },
            inference_config: InferenceConfig {
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            },
        };
        let url = model_url(&self.endpoint, &self.model, "converse")?;

        let response: ConverseResponse = self
            .transport
            .send_json("Bedrock", |client| {
                client
                    .post(url.clone())
                    .bearer_auth(&self.token)
                    .json(&request)
            })
            .await?;

        let text: String = response
            .output
            .message
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect();

        if text.is_empty() {
            anyhow::bail!("Bedrock response contained no text content");
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// InvokeModel (Embedding)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TitanEmbedRequest<'a> {
    input_text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TitanEmbedResponse {
    embedding: Vec<f32>,
}

/// Bedrock 임베딩 모델 (Titan)
#[derive(Debug)]
pub struct BedrockEmbedding {
    transport: HttpTransport,
    token: String,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl BedrockEmbedding {
    pub fn from_config(config: &ModelConfig, options: &ModelOptions) -> RagResult<Self> {
        let model = config.model_name().to_string();
        let dimension = if is_titan_v2(&model) {
            let dimension = options.embedding_dimension.unwrap_or(DEFAULT_DIMENSION);
            if !TITAN_V2_DIMENSIONS.contains(&dimension) {
                return Err(ConfigError::Invalid(format!(
                    "Invalid dimension: {}. Titan v2 supports 256, 512, or 1024",
                    dimension
                ))
                .into());
            }
            dimension
        } else {
            options.embedding_dimension.unwrap_or(TITAN_V1_DIMENSION)
        };

        let (token, endpoint) = resolve(config)?;
        let transport = HttpTransport::new(options.timeout, options.retry)
            .map_err(|e| construction_error(ModelKind::Bedrock, e))?;

        Ok(Self {
            transport,
            token,
            endpoint,
            model,
            dimension,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for BedrockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        // Titan v2만 출력 차원 지정 지원
        let request = TitanEmbedRequest {
            input_text: text,
            dimensions: is_titan_v2(&self.model).then_some(self.dimension),
        };
        let url = model_url(&self.endpoint, &self.model, "invoke")?;

        let response: TitanEmbedResponse = self
            .transport
            .send_json("Bedrock", |client| {
                client
                    .post(url.clone())
                    .bearer_auth(&self.token)
                    .json(&request)
            })
            .await?;

        Ok(response.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}
