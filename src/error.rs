//! 에러 타입 - 파이프라인 경계의 타입 에러
//!
//! 어댑터 내부(HTTP, LanceDB, 파일 시스템)는 `anyhow::Result`를 그대로 쓰고,
//! 컴포넌트 경계에서 아래 타입으로 변환합니다. 원인은 항상 `source`로 보존합니다.

use thiserror::Error;

use crate::provider::{Capability, ModelKind};

/// 설정 에러 (생성 시점에 치명적, 재시도하지 않음)
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 알 수 없는 프로바이더 문자열
    #[error("unknown model provider '{0}' (expected openai, anthropic, bedrock or vertex)")]
    UnknownProvider(String),

    /// 해당 기능을 지원하지 않는 프로바이더
    #[error("provider {provider} does not support {capability} models")]
    UnsupportedProvider {
        provider: ModelKind,
        capability: Capability,
    },

    /// 필수 인증 정보 누락
    #[error("missing credential {name} for provider {provider}")]
    MissingCredential {
        provider: ModelKind,
        name: &'static str,
    },

    /// 잘못된 설정 값
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 폴백 체인의 모든 프로바이더가 실패
    #[error("no generation model available (tried: {})", .attempted.join(", "))]
    NoAvailableModel { attempted: Vec<String> },

    /// 벡터 저장소 생성/열기 실패
    #[error("failed to initialize vector store at {location}")]
    StoreInitialization {
        location: String,
        #[source]
        source: anyhow::Error,
    },

    /// 문서 로딩 실패 (폴더, 시드 파일)
    #[error("failed to load documents from {path}")]
    Ingestion {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// 벡터 저장소 검색/추가 실패
    #[error("retrieval failed during {operation}")]
    Retrieval {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// 모델 호출 실패
    #[error("generation failed with model {model}")]
    Generation {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    /// 파이프라인 경계 래퍼
    #[error("pipeline query failed")]
    Pipeline(#[source] Box<RagError>),

    /// 평가 데이터셋/판정 응답 처리 실패
    #[error("evaluation failed: {message}")]
    Evaluation {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RagError {
    pub(crate) fn retrieval(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Retrieval { operation, source }
    }

    pub(crate) fn ingestion(path: &std::path::Path, source: anyhow::Error) -> Self {
        Self::Ingestion {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn evaluation(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Evaluation {
            message: message.into(),
            source,
        }
    }

    /// 파이프라인 경계로 감싸기 (이미 감싸진 경우 그대로)
    pub(crate) fn into_pipeline(self) -> Self {
        match self {
            Self::Pipeline(_) => self,
            other => Self::Pipeline(Box::new(other)),
        }
    }
}

pub type RagResult<T> = std::result::Result<T, RagError>;
