//! Evaluator - 정답 데이터셋으로 파이프라인 평가
//!
//! 질문마다 검색 → 생성 → 레코드 조립 후 지표 엔진으로 채점합니다.
//! 레코드는 제한된 동시성으로 처리되며 결과 순서는 입력 순서와 같습니다.

mod dataset;
mod metrics;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;

use crate::error::{RagError, RagResult};
use crate::pipeline::RagPipeline;

pub use dataset::{load_labeled_questions, EvaluationDataset, EvaluationRecord, LabeledQuestion};
pub use metrics::{LlmJudgeMetrics, MetricScores, MetricsEngine};

/// 기본 동시 평가 수
pub const DEFAULT_CONCURRENCY: usize = 4;

/// 레코드별 점수
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordScores {
    pub record: EvaluationRecord,
    pub scores: MetricScores,
}

/// 평가 리포트
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    /// 레코드 평균
    pub aggregate: MetricScores,
    /// 입력 순서의 레코드별 점수
    pub records: Vec<RecordScores>,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationReport {
    fn from_records(records: Vec<RecordScores>) -> Self {
        let scores: Vec<MetricScores> = records.iter().map(|r| r.scores).collect();
        Self {
            aggregate: MetricScores::mean(&scores),
            records,
            evaluated_at: Utc::now(),
        }
    }

    /// 집계 점수 (지표 이름 → 점수)
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        self.aggregate.to_map()
    }

    /// 평가에 사용된 레코드 묶음
    pub fn dataset(&self) -> EvaluationDataset {
        self.records.iter().map(|r| r.record.clone()).collect()
    }
}

/// 파이프라인 평가기
pub struct Evaluator {
    pipeline: Arc<RagPipeline>,
    metrics: Arc<dyn MetricsEngine>,
    concurrency: usize,
}

impl Evaluator {
    pub fn new(pipeline: Arc<RagPipeline>, metrics: Arc<dyn MetricsEngine>) -> Self {
        Self {
            pipeline,
            metrics,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// 질문 하나를 파이프라인에 통과시켜 레코드 생성 (생성 실패는 전파)
    pub async fn collect_record(&self, item: &LabeledQuestion) -> RagResult<EvaluationRecord> {
        let trace = self.pipeline.query_strict(&item.question).await?;
        Ok(EvaluationRecord {
            question: item.question.clone(),
            ground_truth: item.ground_truth.clone(),
            generated_answer: trace.answer,
            retrieved_contexts: trace.contexts,
        })
    }

    async fn evaluate_item(&self, item: &LabeledQuestion) -> RagResult<RecordScores> {
        let record = self.collect_record(item).await?;
        let scores = self.metrics.score(&record).await?;
        tracing::debug!("Scored '{}': {:?}", record.question, scores);
        Ok(RecordScores { record, scores })
    }

    /// 단일 질문 평가
    pub async fn evaluate_response(&self, question: &str, ground_truth: &str) -> RagResult<EvaluationReport> {
        let item = LabeledQuestion::new(question, ground_truth);
        let scored = self.evaluate_item(&item).await?;
        Ok(EvaluationReport::from_records(vec![scored]))
    }

    /// 데이터셋 전체 평가
    pub async fn evaluate_dataset(&self, items: &[LabeledQuestion]) -> RagResult<EvaluationReport> {
        if items.is_empty() {
            return Err(RagError::evaluation(
                "dataset is empty",
                anyhow::anyhow!("no labeled questions to evaluate"),
            ));
        }

        tracing::info!(
            "Evaluating {} questions (concurrency: {})",
            items.len(),
            self.concurrency
        );

        // buffered: 동시 실행하되 입력 순서로 결과 수집
        let records: Vec<RecordScores> = stream::iter(items)
            .map(|item| self.evaluate_item(item))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let report = EvaluationReport::from_records(records);
        tracing::info!("Evaluation complete: {:?}", report.to_map());
        Ok(report)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::AnswerGenerator;
    use crate::knowledge::{Document, EmbeddingStore, MemoryVectorStore};
    use crate::retrieval::{RetrievalOptions, Retriever};
    use crate::testing::{FailingChat, KeywordEmbedder, ScriptedChat};

    const KEYWORDS: [&str; 4] = ["rag", "llm", "ai", "장점"];

    async fn pipeline_with(model: Arc<dyn crate::provider::GenerationProvider>) -> Arc<RagPipeline> {
        let embedder = Arc::new(KeywordEmbedder::new(&KEYWORDS));
        let store = Arc::new(EmbeddingStore::new(embedder, Arc::new(MemoryVectorStore::new())));
        store
            .add_documents(vec![
                Document::new("rag 장점: 환각 감소와 최신 정보 활용"),
                Document::new("llm 종류: GPT, Claude, PaLM"),
                Document::new("ai 응용: 의료, 금융, 제조"),
            ])
            .await
            .unwrap();

        Arc::new(RagPipeline::new(
            Arc::new(Retriever::new(store, RetrievalOptions::default())),
            Arc::new(AnswerGenerator::new(model)),
        ))
    }

    fn questions() -> Vec<LabeledQuestion> {
        vec![
            LabeledQuestion::new("rag 장점은?", "환각 감소와 최신 정보 활용"),
            LabeledQuestion::new("llm 종류는?", "GPT, Claude, PaLM"),
            LabeledQuestion::new("ai 응용 분야는?", "의료, 금융, 제조"),
        ]
    }

    fn metrics() -> Arc<dyn MetricsEngine> {
        Arc::new(LlmJudgeMetrics::new(
            Arc::new(metrics::tests::scripted_judge()),
            Arc::new(KeywordEmbedder::new(&KEYWORDS)),
        ))
    }

    #[tokio::test]
    async fn test_evaluate_dataset_three_questions() {
        let pipeline = pipeline_with(Arc::new(ScriptedChat::replying("rag는 환각을 줄입니다."))).await;
        let evaluator = Evaluator::new(pipeline, metrics()).with_concurrency(2);

        let report = evaluator.evaluate_dataset(&questions()).await.unwrap();

        assert_eq!(report.records.len(), 3);
        for (record, item) in report.records.iter().zip(questions()) {
            assert_eq!(record.record.question, item.question);
            assert_eq!(record.record.retrieved_contexts.len(), 1);
        }

        let map = report.to_map();
        for name in ["faithfulness", "answer_relevancy", "context_precision", "context_recall"] {
            let value = map[name];
            assert!(value.is_finite() && (0.0..=1.0).contains(&value), "{name} = {value}");
        }
        assert_eq!(report.dataset().len(), 3);
    }

    #[tokio::test]
    async fn test_evaluate_response_single_record() {
        let pipeline = pipeline_with(Arc::new(ScriptedChat::replying("GPT, Claude, PaLM"))).await;
        let evaluator = Evaluator::new(pipeline, metrics());

        let report = evaluator
            .evaluate_response("llm 종류는?", "GPT, Claude, PaLM")
            .await
            .unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].record.retrieved_contexts, vec!["llm 종류: GPT, Claude, PaLM"]);
        assert_eq!(report.aggregate, report.records[0].scores);
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let pipeline = pipeline_with(Arc::new(FailingChat)).await;
        let evaluator = Evaluator::new(pipeline, metrics());

        let err = evaluator.evaluate_dataset(&questions()).await.unwrap_err();
        match err {
            RagError::Pipeline(inner) => assert!(matches!(*inner, RagError::Generation { .. })),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_dataset() {
        let pipeline = pipeline_with(Arc::new(ScriptedChat::replying("x"))).await;
        let evaluator = Evaluator::new(pipeline, metrics());
        assert!(matches!(
            evaluator.evaluate_dataset(&[]).await,
            Err(RagError::Evaluation { .. })
        ));
    }
}
