//! 근거 기반 답변 프롬프트
//!
//! 시스템 지시문은 모델이 주어진 컨텍스트만 사용하도록 강제합니다.
//! 사용자 턴 템플릿은 파일로 교체할 수 있으며 `{question}`, `{context}`
//! 자리표시자가 모두 있어야 합니다.

use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::ConfigError;
use crate::provider::ChatMessage;
use crate::retrieval::NO_RELEVANT_INFORMATION;

/// 시스템 지시문
pub const SYSTEM_PROMPT: &str = "당신은 고성능 질의응답 시스템입니다.
다음 지침을 엄격히 따라 답변을 생성하세요:

1. 주어진 컨텍스트의 정보\"만\" 사용하세요
2. 컨텍스트에 명시적으로 포함되지 않은 정보는 옳다고 생각되더라도 \"절대로\" 사용하지 마세요
3. 질문과 직접 관련된 정보만 포함하세요
4. 간결하고 명확하게 답변하세요
5. 질문의 의도를 정확히 파악하고 그에 맞게 답변하세요
6. 컨텍스트의 정보를 바꿔 말할 때도 원래 의미를 엄격히 유지하세요
7. 컨텍스트에 없는 정보를 추측이나 일반화로 보충하지 마세요
8. 컨텍스트가 \"관련 정보를 찾을 수 없습니다\"이면 답할 수 없다고 안내하세요

답변의 모든 부분이 반드시 컨텍스트의 특정 부분에 근거하는지 확인하세요.";

/// 사용자 턴 기본 템플릿
pub const USER_TEMPLATE: &str = "질문: {question}

사용 가능한 컨텍스트:
{context}

위 컨텍스트만 사용하여 질문에 대한 답변을 생성하세요.
컨텍스트에 포함되지 않은 정보는 일절 포함하지 마세요.";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(question|context)\}").expect("valid placeholder regex"))
}

/// 프롬프트 템플릿
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    system: String,
    user: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            system: SYSTEM_PROMPT.to_string(),
            user: USER_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    /// 사용자 턴 템플릿 지정 (자리표시자 검증)
    pub fn with_user_template(template: impl Into<String>) -> Result<Self, ConfigError> {
        let user = template.into();
        for placeholder in ["{question}", "{context}"] {
            if !user.contains(placeholder) {
                return Err(ConfigError::Invalid(format!(
                    "prompt template is missing the {} placeholder",
                    placeholder
                )));
            }
        }

        Ok(Self {
            user,
            ..Self::default()
        })
    }

    /// 파일에서 사용자 턴 템플릿 로드
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let template = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Invalid(format!("cannot read prompt template {:?}: {}", path, e))
        })?;
        tracing::info!("Loaded prompt template from {:?}", path);
        Self::with_user_template(template)
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    /// 메시지 렌더링
    ///
    /// 자리표시자는 한 번에 치환하므로 질문에 `{context}`가 들어 있어도
    /// 다시 치환되지 않습니다.
    pub fn render(&self, question: &str, context: &str) -> Vec<ChatMessage> {
        let user = placeholder_re().replace_all(&self.user, |caps: &Captures| {
            if &caps[1] == "question" {
                question.to_string()
            } else {
                context.to_string()
            }
        });

        vec![
            ChatMessage::system(self.system.as_str()),
            ChatMessage::user(user.into_owned()),
        ]
    }
}

/// 컨텍스트가 "관련 정보 없음" 문구인지
pub fn is_empty_context(context: &str) -> bool {
    context.trim() == NO_RELEVANT_INFORMATION
}
