//! Answer Generator - 근거 기반 답변 생성
//!
//! 대화형 경로(`generate`)는 모델 호출 실패 시 고정 안내 문구를 반환하고,
//! 배치/평가 경로(`try_generate`)는 `Generation` 에러를 그대로 전파합니다.

mod prompt;

use std::sync::Arc;
use std::time::Duration;

use crate::error::{RagError, RagResult};
use crate::provider::GenerationProvider;

pub use prompt::{is_empty_context, PromptTemplate, SYSTEM_PROMPT, USER_TEMPLATE};

/// 생성 실패 시 대화형 경로의 응답
pub const GENERATION_FALLBACK: &str =
    "답변 생성 중 오류가 발생했습니다. 잠시 후 다시 시도해 주세요.";

/// 답변 생성기
pub struct AnswerGenerator {
    model: Arc<dyn GenerationProvider>,
    prompt: PromptTemplate,
    timeout: Option<Duration>,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn GenerationProvider>) -> Self {
        Self {
            model,
            prompt: PromptTemplate::default(),
            timeout: None,
        }
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    /// 전체 호출 타임아웃 (HTTP 재시도 포함)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// 답변 생성 (실패 시 안내 문구)
    pub async fn generate(&self, question: &str, context: &str) -> String {
        match self.try_generate(question, context).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!("Answer generation failed: {}", error_chain(&e));
                GENERATION_FALLBACK.to_string()
            }
        }
    }

    /// 답변 생성 (실패 전파)
    pub async fn try_generate(&self, question: &str, context: &str) -> RagResult<String> {
        if is_empty_context(context) {
            tracing::debug!("No relevant context; model is expected to decline");
        }

        let messages = self.prompt.render(question, context);
        let call = self.model.complete(&messages);

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("timed out after {:?}", limit)),
            },
            None => call.await,
        };

        result
            .map(|answer| answer.trim().to_string())
            .map_err(|source| RagError::Generation {
                model: self.model.model_name().to_string(),
                source,
            })
    }
}

/// 에러와 원인 체인을 한 줄로
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
