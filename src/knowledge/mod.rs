//! Knowledge 모듈 - 문서 저장 및 벡터 검색
//!
//! - Document: 불변 문서 + 스칼라 메타데이터
//! - VectorStore: LanceDB (ANN) / 인메모리 (JSON 스냅샷)
//! - Chunker: 재귀 문자 분할 (오버랩 유지)
//! - Loader: .gitignore 인식 텍스트 수집 + 시드 JSON
//! - EmbeddingStore: 임베딩 모델과 벡터 저장소를 묶은 수집/검색 진입점

mod chunker;
mod document;
mod lance;
mod loader;
mod memory;
mod store;
mod vector;

// Re-exports
pub use chunker::{ChunkConfig, Chunker, RecursiveChunker, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use document::{Document, Metadata, MetadataValue, ScoredDocument};
pub use lance::LanceVectorStore;
pub use loader::{load_seed_documents, DocumentLoader, LoaderConfig};
pub use memory::MemoryVectorStore;
pub use store::{
    get_data_dir, open_vector_store, EmbeddingStore, StoreStats, VectorBackend,
    DEFAULT_SEARCH_K, DEFAULT_STORE_TIMEOUT,
};
pub use vector::{cosine_similarity, VectorStore};
