//! 평가 지표 - LLM 판정 기반
//!
//! - faithfulness: 답변 진술 중 컨텍스트가 뒷받침하는 비율
//! - answer_relevancy: 답변에서 역생성한 질문과 원 질문의 평균 코사인 유사도
//! - context_precision: 컨텍스트별 유용성 판정의 평균 정밀도 (순위 반영)
//! - context_recall: 정답 문장 중 컨텍스트로 뒷받침되는 비율
//!
//! 모든 점수는 [0, 1]로 고정되며, 진술이나 컨텍스트가 없으면 0입니다.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::dataset::EvaluationRecord;
use crate::error::{RagError, RagResult};
use crate::knowledge::cosine_similarity;
use crate::provider::{ChatMessage, EmbeddingProvider, GenerationProvider};

/// 역생성 질문 수
const REVERSE_QUESTIONS: usize = 3;

const JUDGE_SYSTEM: &str =
    "당신은 RAG 시스템의 답변 품질을 평가하는 엄격한 평가자입니다. 반드시 JSON 객체 하나만 출력하세요.";

// ============================================================================
// Scores
// ============================================================================

/// 지표별 점수
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricScores {
    pub faithfulness: f64,
    pub answer_relevancy: f64,
    pub context_precision: f64,
    pub context_recall: f64,
}

impl MetricScores {
    /// 지표 이름 → 점수
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            ("faithfulness", self.faithfulness),
            ("answer_relevancy", self.answer_relevancy),
            ("context_precision", self.context_precision),
            ("context_recall", self.context_recall),
        ])
    }

    /// 레코드 점수 평균 (비어 있으면 0)
    pub fn mean(scores: &[MetricScores]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }
        let n = scores.len() as f64;
        let sum = |f: fn(&MetricScores) -> f64| scores.iter().map(f).sum::<f64>() / n;

        Self {
            faithfulness: sum(|s| s.faithfulness),
            answer_relevancy: sum(|s| s.answer_relevancy),
            context_precision: sum(|s| s.context_precision),
            context_recall: sum(|s| s.context_recall),
        }
    }
}

/// NaN/무한대는 0, 나머지는 [0, 1]로
fn clamp_score(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn ratio(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        clamp_score(hits as f64 / total as f64)
    }
}

// ============================================================================
// MetricsEngine Trait
// ============================================================================

/// 평가 지표 엔진
#[async_trait]
pub trait MetricsEngine: Send + Sync {
    /// 레코드 하나 채점
    async fn score(&self, record: &EvaluationRecord) -> RagResult<MetricScores>;
}

// ============================================================================
// Judge Responses
// ============================================================================

#[derive(Debug, Deserialize)]
struct StatementVerdicts {
    #[serde(default)]
    statements: Vec<StatementVerdict>,
}

#[derive(Debug, Deserialize)]
struct StatementVerdict {
    #[serde(default)]
    supported: bool,
}

#[derive(Debug, Deserialize)]
struct ReverseQuestions {
    #[serde(default)]
    questions: Vec<String>,
    #[serde(default)]
    noncommittal: bool,
}

#[derive(Debug, Deserialize)]
struct ContextVerdicts {
    #[serde(default)]
    verdicts: Vec<ContextVerdict>,
}

#[derive(Debug, Deserialize)]
struct ContextVerdict {
    index: usize,
    #[serde(default)]
    useful: bool,
}

#[derive(Debug, Deserialize)]
struct SentenceAttributions {
    #[serde(default)]
    sentences: Vec<SentenceAttribution>,
}

#[derive(Debug, Deserialize)]
struct SentenceAttribution {
    #[serde(default)]
    attributed: bool,
}

/// 판정 응답에서 JSON 객체 추출 (코드 펜스, 앞뒤 설명 무시)
fn parse_judge_json<T: DeserializeOwned>(raw: &str) -> anyhow::Result<T> {
    let start = raw.find('{').context("judge response contains no JSON object")?;
    let end = raw.rfind('}').context("judge response contains no JSON object")?;
    if end < start {
        anyhow::bail!("judge response contains no JSON object");
    }
    serde_json::from_str(&raw[start..=end]).context("judge response is not valid JSON")
}

fn numbered(contexts: &[String]) -> String {
    contexts
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ============================================================================
// LlmJudgeMetrics
// ============================================================================

/// LLM 판정 + 임베딩 기반 지표 엔진
pub struct LlmJudgeMetrics {
    judge: Arc<dyn GenerationProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl LlmJudgeMetrics {
    pub fn new(judge: Arc<dyn GenerationProvider>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { judge, embedder }
    }

    async fn ask<T: DeserializeOwned>(&self, metric: &'static str, prompt: String) -> RagResult<T> {
        let messages = [ChatMessage::system(JUDGE_SYSTEM), ChatMessage::user(prompt)];
        let raw = self
            .judge
            .complete(&messages)
            .await
            .map_err(|e| RagError::evaluation(format!("{} judge call failed", metric), e))?;

        tracing::debug!("{} judge response: {}", metric, raw);
        parse_judge_json(&raw)
            .map_err(|e| RagError::evaluation(format!("malformed {} judge response", metric), e))
    }

    async fn faithfulness(&self, record: &EvaluationRecord) -> RagResult<f64> {
        if record.retrieved_contexts.is_empty() || record.generated_answer.trim().is_empty() {
            return Ok(0.0);
        }

        let prompt = format!(
            "답변을 독립적인 사실 진술들로 나누고, 각 진술이 컨텍스트로 직접 뒷받침되는지 판정하세요.\n\
             출력 형식: {{\"statements\": [{{\"statement\": \"...\", \"supported\": true}}]}}\n\n\
             질문: {}\n\n답변: {}\n\n컨텍스트:\n{}",
            record.question,
            record.generated_answer,
            numbered(&record.retrieved_contexts)
        );

        let verdicts: StatementVerdicts = self.ask("faithfulness", prompt).await?;
        let supported = verdicts.statements.iter().filter(|s| s.supported).count();
        Ok(ratio(supported, verdicts.statements.len()))
    }

    async fn answer_relevancy(&self, record: &EvaluationRecord) -> RagResult<f64> {
        if record.generated_answer.trim().is_empty() {
            return Ok(0.0);
        }

        let prompt = format!(
            "다음 답변만 보고 이 답변이 대답하고 있을 질문을 {}개 만드세요. \
             답변이 회피적이거나 모호하면(예: \"모르겠습니다\", \"답할 수 없습니다\") noncommittal을 true로 하세요.\n\
             출력 형식: {{\"questions\": [\"...\"], \"noncommittal\": false}}\n\n답변: {}",
            REVERSE_QUESTIONS, record.generated_answer
        );

        let generated: ReverseQuestions = self.ask("answer_relevancy", prompt).await?;
        if generated.noncommittal || generated.questions.is_empty() {
            return Ok(0.0);
        }

        let question_embedding = self
            .embedder
            .embed(&record.question)
            .await
            .map_err(|e| RagError::evaluation("cannot embed question", e))?;
        let generated_embeddings = self
            .embedder
            .embed_batch(&generated.questions)
            .await
            .map_err(|e| RagError::evaluation("cannot embed generated questions", e))?;

        let total: f64 = generated_embeddings
            .iter()
            .map(|e| cosine_similarity(&question_embedding, e) as f64)
            .sum();
        Ok(clamp_score(total / generated_embeddings.len().max(1) as f64))
    }

    async fn context_precision(&self, record: &EvaluationRecord) -> RagResult<f64> {
        if record.retrieved_contexts.is_empty() {
            return Ok(0.0);
        }

        let prompt = format!(
            "각 컨텍스트가 정답에 도달하는 데 유용했는지 번호별로 판정하세요.\n\
             출력 형식: {{\"verdicts\": [{{\"index\": 1, \"useful\": true}}]}}\n\n\
             질문: {}\n\n정답: {}\n\n컨텍스트:\n{}",
            record.question,
            record.ground_truth,
            numbered(&record.retrieved_contexts)
        );

        let response: ContextVerdicts = self.ask("context_precision", prompt).await?;

        // 순위 순서의 유용성 (누락된 번호는 유용하지 않음)
        let mut useful = vec![false; record.retrieved_contexts.len()];
        for verdict in response.verdicts {
            if let Some(slot) = verdict.index.checked_sub(1).and_then(|i| useful.get_mut(i)) {
                *slot = verdict.useful;
            }
        }

        Ok(average_precision(&useful))
    }

    async fn context_recall(&self, record: &EvaluationRecord) -> RagResult<f64> {
        if record.retrieved_contexts.is_empty() || record.ground_truth.trim().is_empty() {
            return Ok(0.0);
        }

        let prompt = format!(
            "정답을 문장 단위로 나누고, 각 문장이 컨텍스트로 뒷받침되는지 판정하세요.\n\
             출력 형식: {{\"sentences\": [{{\"sentence\": \"...\", \"attributed\": true}}]}}\n\n\
             정답: {}\n\n컨텍스트:\n{}",
            record.ground_truth,
            numbered(&record.retrieved_contexts)
        );

        let response: SentenceAttributions = self.ask("context_recall", prompt).await?;
        let attributed = response.sentences.iter().filter(|s| s.attributed).count();
        Ok(ratio(attributed, response.sentences.len()))
    }
}

/// 평균 정밀도: 유용한 위치 k에서의 precision@k 평균
fn average_precision(useful: &[bool]) -> f64 {
    let mut hits = 0usize;
    let mut sum = 0.0;
    for (k, &is_useful) in useful.iter().enumerate() {
        if is_useful {
            hits += 1;
            sum += hits as f64 / (k + 1) as f64;
        }
    }
    if hits == 0 {
        0.0
    } else {
        clamp_score(sum / hits as f64)
    }
}

#[async_trait]
impl MetricsEngine for LlmJudgeMetrics {
    async fn score(&self, record: &EvaluationRecord) -> RagResult<MetricScores> {
        let (faithfulness, answer_relevancy, context_precision, context_recall) = futures::try_join!(
            self.faithfulness(record),
            self.answer_relevancy(record),
            self.context_precision(record),
            self.context_recall(record),
        )?;

        Ok(MetricScores {
            faithfulness,
            answer_relevancy,
            context_precision,
            context_recall,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
