//! Retriever - 임계값 필터 검색 + 컨텍스트 조립
//!
//! 1. 상위 `top_k` 후보를 점수와 함께 검색
//! 2. 임계값을 통과한 후보만 순위 순서대로 유지
//! 3. 남은 것이 없으면 고정 문구 [`NO_RELEVANT_INFORMATION`]
//! 4. 있으면 본문을 `"\n\n"`으로 연결

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RagResult};
use crate::knowledge::{Document, EmbeddingStore, ScoredDocument};

/// 통과한 문서가 없을 때의 컨텍스트
pub const NO_RELEVANT_INFORMATION: &str = "관련 정보를 찾을 수 없습니다";

/// 기본 후보 수
pub const DEFAULT_TOP_K: usize = 3;

/// 기본 유사도 임계값
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

/// 컨텍스트 구분자
pub const CONTEXT_SEPARATOR: &str = "\n\n";

// ============================================================================
// Score Order
// ============================================================================

/// 점수 비교 방향
///
/// 유사도 점수는 높을수록, 거리 점수는 낮을수록 관련성이 높습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreOrder {
    #[default]
    HigherIsBetter,
    LowerIsBetter,
}

impl ScoreOrder {
    /// 임계값 통과 여부 (경계값 포함)
    pub fn passes(&self, score: f32, threshold: f32) -> bool {
        match self {
            ScoreOrder::HigherIsBetter => score >= threshold,
            ScoreOrder::LowerIsBetter => score <= threshold,
        }
    }
}

impl fmt::Display for ScoreOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreOrder::HigherIsBetter => f.write_str("higher_is_better"),
            ScoreOrder::LowerIsBetter => f.write_str("lower_is_better"),
        }
    }
}

impl FromStr for ScoreOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "higher_is_better" | "higher" | "similarity" => Ok(ScoreOrder::HigherIsBetter),
            "lower_is_better" | "lower" | "distance" => Ok(ScoreOrder::LowerIsBetter),
            other => Err(ConfigError::Invalid(format!(
                "unknown score order '{}' (expected higher_is_better or lower_is_better)",
                other
            ))),
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// 검색 옵션
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub threshold: f32,
    pub score_order: ScoreOrder,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            score_order: ScoreOrder::default(),
        }
    }
}

/// 임계값을 통과한 검색 결과 (순위 순서)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    documents: Vec<ScoredDocument>,
}

impl RetrievalResult {
    pub fn documents(&self) -> &[ScoredDocument] {
        &self.documents
    }

    pub fn into_documents(self) -> Vec<ScoredDocument> {
        self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// 개별 컨텍스트 본문 (순위 순서)
    pub fn contexts(&self) -> Vec<String> {
        self.documents
            .iter()
            .map(|d| d.document.content().to_string())
            .collect()
    }

    /// 조립된 컨텍스트 (비어 있으면 고정 문구)
    pub fn context(&self) -> String {
        if self.documents.is_empty() {
            return NO_RELEVANT_INFORMATION.to_string();
        }
        self.contexts().join(CONTEXT_SEPARATOR)
    }
}

// ============================================================================
// Retriever
// ============================================================================

/// 임계값 필터 검색기
pub struct Retriever {
    store: Arc<EmbeddingStore>,
    options: RetrievalOptions,
}

impl Retriever {
    pub fn new(store: Arc<EmbeddingStore>, options: RetrievalOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> RetrievalOptions {
        self.options
    }

    /// 기본 옵션으로 컨텍스트 검색
    pub async fn retrieve(&self, query: &str) -> RagResult<String> {
        self.retrieve_with(query, self.options.top_k, self.options.threshold)
            .await
    }

    /// `top_k`, 임계값을 지정하여 컨텍스트 검색
    pub async fn retrieve_with(&self, query: &str, top_k: usize, threshold: f32) -> RagResult<String> {
        Ok(self
            .retrieve_documents_with(query, top_k, threshold)
            .await?
            .context())
    }

    /// 기본 옵션으로 문서 검색
    pub async fn retrieve_documents(&self, query: &str) -> RagResult<RetrievalResult> {
        self.retrieve_documents_with(query, self.options.top_k, self.options.threshold)
            .await
    }

    pub async fn retrieve_documents_with(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> RagResult<RetrievalResult> {
        if top_k == 0 {
            return Ok(RetrievalResult::default());
        }

        let candidates = self.store.search_with_score(query, top_k).await?;
        let total = candidates.len();

        // 순위 순서 유지 (재정렬 없음)
        let documents: Vec<ScoredDocument> = candidates
            .into_iter()
            .filter(|c| self.options.score_order.passes(c.score, threshold))
            .collect();

        tracing::info!(
            "Retrieved {}/{} documents above threshold {} ({})",
            documents.len(),
            total,
            threshold,
            self.options.score_order
        );

        Ok(RetrievalResult { documents })
    }

    /// 문서 추가 (반환 전에 영속화 완료)
    pub async fn add_documents(&self, documents: Vec<Document>) -> RagResult<usize> {
        self.store.add_documents(documents).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use crate::knowledge::{MemoryVectorStore, VectorStore};
    use crate::testing::{FailingStore, FixedScoreStore, KeywordEmbedder};

    fn retriever_over(store: Arc<dyn VectorStore>, options: RetrievalOptions) -> Retriever {
        let embedder = Arc::new(KeywordEmbedder::new(&["rag", "llm", "vector"]));
        Retriever::new(Arc::new(EmbeddingStore::new(embedder, store)), options)
    }

    fn fixed(results: &[(&str, f32)]) -> Retriever {
        retriever_over(Arc::new(FixedScoreStore::new(results)), RetrievalOptions::default())
    }

    #[tokio::test]
    async fn test_threshold_filters_low_scores() {
        let retriever = fixed(&[("high", 0.8), ("low", 0.6)]);

        let context = retriever.retrieve_with("q", 3, 0.7).await.unwrap();
        assert_eq!(context, "high");

        let context = retriever.retrieve_with("q", 3, 0.9).await.unwrap();
        assert_eq!(context, NO_RELEVANT_INFORMATION);
    }

    #[tokio::test]
    async fn test_context_preserves_rank_order() {
        let retriever = fixed(&[("first", 0.95), ("second", 0.9), ("third", 0.85)]);
        let context = retriever.retrieve("q").await.unwrap();
        assert_eq!(context, "first\n\nsecond\n\nthird");
    }

    #[tokio::test]
    async fn test_no_sub_threshold_leakage() {
        let retriever = fixed(&[("a", 0.99), ("b", 0.71), ("c", 0.7), ("d", 0.69), ("e", 0.1)]);
        let result = retriever.retrieve_documents_with("q", 5, 0.7).await.unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.documents().iter().all(|d| d.score >= 0.7));
        assert_eq!(result.contexts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_top_k_limits_candidates() {
        let retriever = fixed(&[("a", 0.99), ("b", 0.98), ("c", 0.97), ("d", 0.96)]);
        let result = retriever.retrieve_documents("q").await.unwrap();
        assert_eq!(result.len(), DEFAULT_TOP_K);

        let context = retriever.retrieve_with("q", 0, 0.0).await.unwrap();
        assert_eq!(context, NO_RELEVANT_INFORMATION);
    }

    #[tokio::test]
    async fn test_lower_is_better() {
        let options = RetrievalOptions {
            threshold: 0.6,
            score_order: ScoreOrder::LowerIsBetter,
            ..Default::default()
        };
        let retriever = retriever_over(
            Arc::new(FixedScoreStore::new(&[("near", 0.2), ("mid", 0.5), ("far", 0.9)])),
            options,
        );
        assert_eq!(retriever.retrieve("q").await.unwrap(), "near\n\nmid");
    }

    #[tokio::test]
    async fn test_retrieve_is_idempotent() {
        let retriever = fixed(&[("a", 0.9), ("b", 0.8)]);
        let first = retriever.retrieve("q").await.unwrap();
        let second = retriever.retrieve("q").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_added_document_is_retrievable() {
        let retriever = retriever_over(Arc::new(MemoryVectorStore::new()), RetrievalOptions::default());
        assert_eq!(retriever.retrieve("vector").await.unwrap(), NO_RELEVANT_INFORMATION);

        retriever
            .add_documents(vec![Document::new("vector databases store embeddings")])
            .await
            .unwrap();

        let context = retriever.retrieve("vector").await.unwrap();
        assert_eq!(context, "vector databases store embeddings");
    }

    #[tokio::test]
    async fn test_add_documents_persists_before_returning() {
        let store = Arc::new(FixedScoreStore::new(&[]));
        let embedder = Arc::new(KeywordEmbedder::new(&["rag"]));
        let retriever = Retriever::new(
            Arc::new(EmbeddingStore::new(embedder, store.clone())),
            RetrievalOptions::default(),
        );

        retriever.add_documents(vec![Document::new("rag")]).await.unwrap();
        assert_eq!(store.persist_calls(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_retrieval_error() {
        let retriever = retriever_over(Arc::new(FailingStore), RetrievalOptions::default());

        let err = retriever.retrieve("q").await.unwrap_err();
        assert!(matches!(err, RagError::Retrieval { .. }));

        let err = retriever
            .add_documents(vec![Document::new("rag")])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Retrieval { .. }));
    }

    #[test]
    fn test_score_order_parse() {
        assert_eq!("distance".parse::<ScoreOrder>().unwrap(), ScoreOrder::LowerIsBetter);
        assert_eq!("HIGHER_IS_BETTER".parse::<ScoreOrder>().unwrap(), ScoreOrder::HigherIsBetter);
        assert!("sideways".parse::<ScoreOrder>().is_err());
        assert!(ScoreOrder::HigherIsBetter.passes(0.7, 0.7));
        assert!(ScoreOrder::LowerIsBetter.passes(0.7, 0.7));
    }
}
