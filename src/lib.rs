//! grounded-rag - 컨텍스트 기반 RAG 파이프라인
//!
//! 임계값 필터 벡터 검색으로 컨텍스트를 조립하고, 주어진 컨텍스트만
//! 사용하도록 강제한 프롬프트로 답변을 생성합니다.
//! 정답 데이터셋으로 faithfulness / answer relevancy /
//! context precision / context recall을 평가합니다.

pub mod cli;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod generation;
pub mod knowledge;
pub mod pipeline;
pub mod provider;
pub mod retrieval;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use config::Settings;
pub use error::{ConfigError, RagError, RagResult};
pub use evaluation::{
    EvaluationDataset, EvaluationRecord, EvaluationReport, Evaluator, LabeledQuestion,
    LlmJudgeMetrics, MetricScores, MetricsEngine,
};
pub use generation::{AnswerGenerator, PromptTemplate, GENERATION_FALLBACK};
pub use knowledge::{
    Chunker, ChunkConfig, Document, EmbeddingStore, LanceVectorStore, MemoryVectorStore,
    RecursiveChunker, ScoredDocument, VectorBackend, VectorStore,
};
pub use pipeline::{QueryOutcome, QueryTrace, RagPipeline};
pub use provider::{
    create_chat_model_with_fallback, create_embedding_model, create_generation_model,
    ChatMessage, EmbeddingProvider, GenerationProvider, ModelConfig, ModelKind,
};
pub use retrieval::{RetrievalOptions, RetrievalResult, Retriever, ScoreOrder, NO_RELEVANT_INFORMATION};
