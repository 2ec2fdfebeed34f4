//! 설정 - 기본값 → TOML 파일 → .env / 환경 변수 순으로 적용
//!
//! `main`에서 한 번 만들어 각 컴포넌트에 넘깁니다 (전역 싱글톤 없음).
//!
//! ## 설정 파일
//! `RAG_CONFIG` 경로, 없으면 현재 폴더의 `rag.toml`을 읽습니다.
//! ```toml
//! embedding_provider = "openai"
//! generation_provider = "anthropic"
//! generation_model = "claude-3-5-haiku-latest"
//! vector_backend = "lance"
//! similarity_threshold = 0.75
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, RagResult};
use crate::generation::PromptTemplate;
use crate::knowledge::{get_data_dir, ChunkConfig, VectorBackend, DEFAULT_SEARCH_K};
use crate::provider::{Credentials, ModelConfig, ModelKind, ModelOptions, RetryPolicy};
use crate::retrieval::{RetrievalOptions, ScoreOrder, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_TOP_K};

/// 설정 파일 경로 환경 변수
pub const CONFIG_ENV: &str = "RAG_CONFIG";
/// 기본 설정 파일
pub const DEFAULT_CONFIG_FILE: &str = "rag.toml";

/// 런타임 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // 모델
    pub embedding_provider: ModelKind,
    /// 비우면 프로바이더 기본 모델
    pub embedding_model: Option<String>,
    /// 비우면 프로바이더 기본 차원
    pub embedding_dimension: Option<usize>,
    pub generation_provider: ModelKind,
    pub generation_model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,

    // 저장소
    pub vector_backend: VectorBackend,
    pub vector_store_directory: PathBuf,
    pub knowledge_base_directory: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,

    // 검색
    pub top_k: usize,
    pub search_k: usize,
    pub similarity_threshold: f32,
    pub score_order: ScoreOrder,

    // 타임아웃 (초)
    pub request_timeout_secs: u64,
    pub store_timeout_secs: u64,

    pub prompt_template_path: Option<PathBuf>,
    pub eval_concurrency: usize,

    /// 인증 정보는 환경 변수로만 받음
    #[serde(skip)]
    pub credentials: Credentials,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            embedding_provider: ModelKind::OpenAi,
            embedding_model: None,
            embedding_dimension: None,
            generation_provider: ModelKind::OpenAi,
            generation_model: None,
            temperature: 0.0,
            max_tokens: 1024,
            vector_backend: VectorBackend::default(),
            vector_store_directory: get_data_dir().join("vectors"),
            knowledge_base_directory: PathBuf::from("data/knowledge"),
            chunk_size: crate::knowledge::DEFAULT_CHUNK_SIZE,
            chunk_overlap: crate::knowledge::DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            search_k: DEFAULT_SEARCH_K,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            score_order: ScoreOrder::default(),
            request_timeout_secs: 30,
            store_timeout_secs: 30,
            prompt_template_path: None,
            eval_concurrency: crate::evaluation::DEFAULT_CONCURRENCY,
            credentials: Credentials::default(),
        }
    }
}

impl Settings {
    /// 프로세스 환경에서 설정 로드
    pub fn load() -> RagResult<Self> {
        // .env는 선택 사항
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("Loaded environment from {:?}", path),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!("Failed to read .env: {}", e),
        }

        let config_file = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
        };

        Self::load_with(config_file.as_deref(), |key| std::env::var(key).ok())
    }

    /// 설정 파일과 환경 변수 조회 함수로 로드
    pub fn load_with<F>(config_file: Option<&Path>, env: F) -> RagResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match config_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    ConfigError::Invalid(format!("cannot read config file {:?}: {}", path, e))
                })?;
                tracing::info!("Loaded configuration from {:?}", path);
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };

        settings.apply_env(|key| env(key).filter(|v| !v.trim().is_empty()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Invalid(format!("invalid config file: {}", e)))
    }

    fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env("EMBEDDING_MODEL_TYPE") {
            self.embedding_provider = v.parse()?;
        }
        if let Some(v) = env("EMBEDDING_MODEL_NAME") {
            self.embedding_model = Some(v);
        }
        if let Some(v) = env("EMBEDDING_DIMENSION") {
            self.embedding_dimension = Some(parse_env("EMBEDDING_DIMENSION", &v)?);
        }
        if let Some(v) = env("GENERATION_MODEL_TYPE") {
            self.generation_provider = v.parse()?;
        }
        if let Some(v) = env("GENERATION_MODEL_NAME") {
            self.generation_model = Some(v);
        }
        if let Some(v) = env("VECTOR_BACKEND") {
            self.vector_backend = v.parse()?;
        }
        if let Some(v) = env("VECTOR_STORE_DIRECTORY") {
            self.vector_store_directory = PathBuf::from(v);
        }
        if let Some(v) = env("KNOWLEDGE_BASE_DIRECTORY") {
            self.knowledge_base_directory = PathBuf::from(v);
        }
        if let Some(v) = env("CHUNK_SIZE") {
            self.chunk_size = parse_env("CHUNK_SIZE", &v)?;
        }
        if let Some(v) = env("CHUNK_OVERLAP") {
            self.chunk_overlap = parse_env("CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = env("TOP_K") {
            self.top_k = parse_env("TOP_K", &v)?;
        }
        if let Some(v) = env("SEARCH_K") {
            self.search_k = parse_env("SEARCH_K", &v)?;
        }
        if let Some(v) = env("SIMILARITY_THRESHOLD") {
            self.similarity_threshold = parse_env("SIMILARITY_THRESHOLD", &v)?;
        }
        if let Some(v) = env("SCORE_ORDER") {
            self.score_order = v.parse()?;
        }
        if let Some(v) = env("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_env("REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = env("STORE_TIMEOUT_SECS") {
            self.store_timeout_secs = parse_env("STORE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = env("PROMPT_TEMPLATE_PATH") {
            self.prompt_template_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("EVAL_CONCURRENCY") {
            self.eval_concurrency = parse_env("EVAL_CONCURRENCY", &v)?;
        }

        self.credentials = Credentials {
            openai_api_key: env("OPENAI_API_KEY"),
            openai_base_url: env("OPENAI_BASE_URL"),
            anthropic_api_key: env("ANTHROPIC_API_KEY"),
            anthropic_base_url: env("ANTHROPIC_BASE_URL"),
            bedrock_api_key: env("AWS_BEARER_TOKEN_BEDROCK"),
            aws_region: env("AWS_REGION"),
            google_api_key: env("GEMINI_API_KEY").or_else(|| env("GOOGLE_AI_API_KEY")),
            vertex_base_url: env("VERTEX_BASE_URL"),
        };

        Ok(())
    }

    /// 값 검증
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunk_config()?;

        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be positive".into()));
        }
        if self.search_k == 0 {
            return Err(ConfigError::Invalid("search_k must be positive".into()));
        }
        if !self.similarity_threshold.is_finite() {
            return Err(ConfigError::Invalid("similarity_threshold must be finite".into()));
        }
        if self.embedding_dimension == Some(0) {
            return Err(ConfigError::Invalid("embedding_dimension must be positive".into()));
        }
        if self.request_timeout_secs == 0 || self.store_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid("temperature must be within 0.0..=2.0".into()));
        }

        let credentials = &self.credentials;
        for (name, value) in [
            ("OPENAI_BASE_URL", &credentials.openai_base_url),
            ("ANTHROPIC_BASE_URL", &credentials.anthropic_base_url),
            ("VERTEX_BASE_URL", &credentials.vertex_base_url),
        ] {
            if let Some(url) = value {
                Url::parse(url)
                    .map_err(|e| ConfigError::Invalid(format!("{} is not a valid URL: {}", name, e)))?;
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Derived configuration
    // ------------------------------------------------------------------------

    /// 임베딩 모델 설정
    pub fn embedding_model_config(&self) -> Result<ModelConfig, ConfigError> {
        let name = match &self.embedding_model {
            Some(name) => name.clone(),
            None => self
                .embedding_provider
                .default_embedding_model()
                .ok_or(ConfigError::UnsupportedProvider {
                    provider: self.embedding_provider,
                    capability: crate::provider::Capability::Embedding,
                })?
                .to_string(),
        };
        Ok(ModelConfig::new(self.embedding_provider, name, self.credentials.clone()))
    }

    /// 생성 모델 설정
    pub fn generation_model_config(&self) -> ModelConfig {
        let name = self
            .generation_model
            .clone()
            .unwrap_or_else(|| self.generation_provider.default_generation_model().to_string());
        ModelConfig::new(self.generation_provider, name, self.credentials.clone())
    }

    pub fn model_options(&self) -> ModelOptions {
        ModelOptions {
            timeout: self.request_timeout(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            embedding_dimension: self.embedding_dimension,
            retry: RetryPolicy::default(),
        }
    }

    pub fn chunk_config(&self) -> Result<ChunkConfig, ConfigError> {
        ChunkConfig::new(self.chunk_size, self.chunk_overlap)
    }

    pub fn retrieval_options(&self) -> RetrievalOptions {
        RetrievalOptions {
            top_k: self.top_k,
            threshold: self.similarity_threshold,
            score_order: self.score_order,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// 프롬프트 템플릿 (파일 지정 시 검증 후 로드)
    pub fn prompt_template(&self) -> Result<PromptTemplate, ConfigError> {
        match &self.prompt_template_path {
            Some(path) => PromptTemplate::from_file(path),
            None => Ok(PromptTemplate::default()),
        }
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{}='{}': {}", key, value, e)))
}

// ============================================================================
// Tests
// ============================================================================
