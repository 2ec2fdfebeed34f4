//! RAG 파이프라인 - Retriever → AnswerGenerator

use std::sync::Arc;

use serde::Serialize;

use crate::error::RagResult;
use crate::generation::AnswerGenerator;
use crate::retrieval::Retriever;

/// 질의 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    /// 조립된 컨텍스트 (또는 "관련 정보 없음" 문구)
    pub context: String,
}

/// 평가용 상세 질의 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryTrace {
    pub answer: String,
    pub context: String,
    /// 임계값을 통과한 개별 컨텍스트 (순위 순서)
    pub contexts: Vec<String>,
}

/// RAG 파이프라인
pub struct RagPipeline {
    retriever: Arc<Retriever>,
    generator: Arc<AnswerGenerator>,
}

impl RagPipeline {
    pub fn new(retriever: Arc<Retriever>, generator: Arc<AnswerGenerator>) -> Self {
        Self {
            retriever,
            generator,
        }
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    /// 질문에 대한 답변 생성
    ///
    /// 생성 실패는 안내 문구로 대체되고, 검색 실패는 `Pipeline` 에러로 반환됩니다.
    pub async fn query(&self, question: &str) -> RagResult<QueryOutcome> {
        tracing::info!("Query: {}", question);

        let context = self
            .retriever
            .retrieve(question)
            .await
            .map_err(|e| e.into_pipeline())?;
        let answer = self.generator.generate(question, &context).await;

        Ok(QueryOutcome { answer, context })
    }

    /// 생성 실패까지 전파하는 질의 (배치/평가 경로)
    pub async fn query_strict(&self, question: &str) -> RagResult<QueryTrace> {
        let result = self
            .retriever
            .retrieve_documents(question)
            .await
            .map_err(|e| e.into_pipeline())?;
        let context = result.context();

        let answer = self
            .generator
            .try_generate(question, &context)
            .await
            .map_err(|e| e.into_pipeline())?;

        Ok(QueryTrace {
            answer,
            context,
            contexts: result.contexts(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use crate::generation::GENERATION_FALLBACK;
    use crate::knowledge::{EmbeddingStore, VectorStore};
    use crate::provider::GenerationProvider;
    use crate::retrieval::{RetrievalOptions, NO_RELEVANT_INFORMATION};
    use crate::testing::{FailingChat, FailingStore, FixedScoreStore, KeywordEmbedder, ScriptedChat};

    fn pipeline(store: Arc<dyn VectorStore>, model: Arc<dyn GenerationProvider>) -> RagPipeline {
        let embedder = Arc::new(KeywordEmbedder::new(&["rag"]));
        let store = Arc::new(EmbeddingStore::new(embedder, store));
        RagPipeline::new(
            Arc::new(Retriever::new(store, RetrievalOptions::default())),
            Arc::new(AnswerGenerator::new(model)),
        )
    }

    #[tokio::test]
    async fn test_query_returns_answer_and_context() {
        let pipeline = pipeline(
            Arc::new(FixedScoreStore::new(&[("RAG는 검색 증강 생성", 0.9), ("무관한 문서", 0.2)])),
            Arc::new(ScriptedChat::replying("검색 증강 생성입니다.")),
        );

        let outcome = pipeline.query("RAG란?").await.unwrap();
        assert_eq!(outcome.answer, "검색 증강 생성입니다.");
        assert_eq!(outcome.context, "RAG는 검색 증강 생성");
    }

    #[tokio::test]
    async fn test_query_with_no_relevant_documents() {
        let pipeline = pipeline(
            Arc::new(FixedScoreStore::new(&[("무관한 문서", 0.1)])),
            Arc::new(ScriptedChat::replying("관련 정보가 없어 답변할 수 없습니다.")),
        );

        let outcome = pipeline.query("q").await.unwrap();
        assert_eq!(outcome.context, NO_RELEVANT_INFORMATION);
    }

    #[tokio::test]
    async fn test_retrieval_failure_is_wrapped() {
        let pipeline = pipeline(Arc::new(FailingStore), Arc::new(ScriptedChat::replying("x")));

        match pipeline.query("q").await.unwrap_err() {
            RagError::Pipeline(inner) => assert!(matches!(*inner, RagError::Retrieval { .. })),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generation_failure_degrades_or_propagates() {
        let pipeline = pipeline(
            Arc::new(FixedScoreStore::new(&[("doc", 0.9)])),
            Arc::new(FailingChat),
        );

        let outcome = pipeline.query("q").await.unwrap();
        assert_eq!(outcome.answer, GENERATION_FALLBACK);

        match pipeline.query_strict("q").await.unwrap_err() {
            RagError::Pipeline(inner) => assert!(matches!(*inner, RagError::Generation { .. })),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_query_strict_returns_contexts() {
        let pipeline = pipeline(
            Arc::new(FixedScoreStore::new(&[("a", 0.95), ("b", 0.75), ("c", 0.3)])),
            Arc::new(ScriptedChat::replying("answer")),
        );

        let trace = pipeline.query_strict("q").await.unwrap();
        assert_eq!(trace.contexts, vec!["a", "b"]);
        assert_eq!(trace.context, "a\n\nb");
        assert_eq!(trace.answer, "answer");
    }
}
