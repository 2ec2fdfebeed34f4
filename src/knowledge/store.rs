//! Embedding Store - 임베딩 모델 + 벡터 저장소
//!
//! 원본 문서를 로드하고 청크 분할 후 임베딩하여 저장하며,
//! 질의 임베딩으로 최근접 검색을 제공합니다.
//!
//! 쓰기(추가 + persist)는 단일 writer 락으로 직렬화되고 읽기는 동시에 수행됩니다.
//! 모든 저장소 호출은 타임아웃으로 감쌉니다.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::chunker::{ChunkConfig, Chunker, RecursiveChunker};
use super::document::{Document, ScoredDocument};
use super::lance::LanceVectorStore;
use super::loader::DocumentLoader;
use super::memory::MemoryVectorStore;
use super::vector::VectorStore;
use crate::error::{ConfigError, RagError, RagResult};
use crate::provider::EmbeddingProvider;

/// 기본 검색 개수 (필터 없는 검색)
pub const DEFAULT_SEARCH_K: usize = 4;

/// 저장소 호출 기본 타임아웃
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// 데이터 디렉토리 경로 반환
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".grounded-rag")
}

// ============================================================================
// Backend Selection
// ============================================================================

/// 벡터 저장소 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Lance,
    Memory,
}

impl fmt::Display for VectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorBackend::Lance => f.write_str("lance"),
            VectorBackend::Memory => f.write_str("memory"),
        }
    }
}

impl FromStr for VectorBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lance" | "lancedb" => Ok(VectorBackend::Lance),
            "memory" | "json" => Ok(VectorBackend::Memory),
            other => Err(ConfigError::Invalid(format!(
                "unknown vector backend '{}' (expected lance or memory)",
                other
            ))),
        }
    }
}

/// 백엔드별 벡터 저장소 열기
///
/// 같은 위치로 다시 열면 기존 데이터를 그대로 사용합니다.
pub async fn open_vector_store(
    backend: VectorBackend,
    dir: &Path,
    dimension: usize,
) -> RagResult<Arc<dyn VectorStore>> {
    let result: anyhow::Result<Arc<dyn VectorStore>> = match backend {
        VectorBackend::Lance => LanceVectorStore::open(&dir.join("vectors.lance"), dimension)
            .await
            .map(|s| Arc::new(s) as Arc<dyn VectorStore>),
        VectorBackend::Memory => MemoryVectorStore::open(dir)
            .await
            .map(|s| Arc::new(s) as Arc<dyn VectorStore>),
    };

    result.map_err(|source| RagError::StoreInitialization {
        location: dir.display().to_string(),
        source,
    })
}

// ============================================================================
// Types
// ============================================================================

/// 저장소 통계
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub document_count: usize,
    pub backend: String,
    pub embedding_model: String,
    pub location: Option<PathBuf>,
}

// ============================================================================
// EmbeddingStore
// ============================================================================

/// 임베딩 저장소
pub struct EmbeddingStore {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    chunker: RecursiveChunker,
    loader: DocumentLoader,
    writer: Mutex<()>,
    timeout: Duration,
    location: Option<PathBuf>,
}

impl EmbeddingStore {
    /// 이미 열린 벡터 저장소로 생성
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, vectors: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            vectors,
            chunker: RecursiveChunker::default(),
            loader: DocumentLoader::default(),
            writer: Mutex::new(()),
            timeout: DEFAULT_STORE_TIMEOUT,
            location: None,
        }
    }

    /// 영속 위치에서 저장소 열기
    pub async fn open(
        embedder: Arc<dyn EmbeddingProvider>,
        backend: VectorBackend,
        dir: &Path,
    ) -> RagResult<Self> {
        let vectors = open_vector_store(backend, dir, embedder.dimension()).await?;
        tracing::info!("Opened {} vector store at {:?}", backend, dir);

        let mut store = Self::new(embedder, vectors);
        store.location = Some(dir.to_path_buf());
        Ok(store)
    }

    pub fn with_chunk_config(mut self, config: ChunkConfig) -> Self {
        self.chunker = RecursiveChunker::new(config);
        self
    }

    pub fn with_loader(mut self, loader: DocumentLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 저장소 호출을 타임아웃으로 감싸고 에러를 `Retrieval`로 변환
    async fn guarded<T, F>(&self, operation: &'static str, fut: F) -> RagResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| RagError::retrieval(operation, e)),
            Err(_) => Err(RagError::retrieval(
                operation,
                anyhow::anyhow!("timed out after {:?}", self.timeout),
            )),
        }
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// 폴더의 텍스트 파일 내용 로드 (없으면 빈 목록)
    pub async fn load_documents(&self, dir: &Path) -> RagResult<Vec<String>> {
        Ok(self
            .load_source_documents(dir)
            .await?
            .into_iter()
            .map(|d| d.content().to_string())
            .collect())
    }

    /// 폴더의 텍스트 파일을 `source` 메타데이터가 붙은 문서로 로드
    pub async fn load_source_documents(&self, dir: &Path) -> RagResult<Vec<Document>> {
        let loader = self.loader.clone();
        let path = dir.to_path_buf();

        // 파일 시스템 순회는 블로킹 작업
        tokio::task::spawn_blocking(move || loader.load_directory(&path))
            .await
            .map_err(|e| RagError::ingestion(dir, anyhow::anyhow!("loader task failed: {}", e)))?
            .map_err(|e| RagError::ingestion(dir, e))
    }

    // ------------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------------

    /// 텍스트를 청크 분할 후 임베딩하여 한 번에 저장
    pub async fn create_embeddings(&self, texts: &[String]) -> RagResult<usize> {
        let documents: Vec<Document> = texts.iter().map(Document::new).collect();
        self.ingest(&documents).await
    }

    /// 문서를 청크 분할(메타데이터 유지) 후 저장
    pub async fn ingest(&self, documents: &[Document]) -> RagResult<usize> {
        let chunks = self.chunker.split_documents(documents);
        tracing::info!(
            "Split {} documents into {} chunks (size: {}, overlap: {})",
            documents.len(),
            chunks.len(),
            self.chunker.config().chunk_size,
            self.chunker.config().chunk_overlap
        );
        self.add_documents(chunks).await
    }

    /// 문서 그대로 저장 (임베딩 없는 문서만 임베딩)
    ///
    /// 임베딩, 추가, persist 모두 writer 락 안에서 수행되므로
    /// 반환 시점 이후의 검색에는 새 문서가 보입니다.
    /// persist가 실패하면 이번 호출에서 추가한 문서는 되돌려집니다.
    pub async fn add_documents(&self, documents: Vec<Document>) -> RagResult<usize> {
        if documents.is_empty() {
            tracing::debug!("No documents to add");
            return Ok(0);
        }

        let _guard = self.writer.lock().await;

        let pending: Vec<String> = documents
            .iter()
            .filter(|d| d.embedding().is_none())
            .map(|d| d.content().to_string())
            .collect();

        // 프로바이더 배치 단위로 나누어 요청마다 타임아웃 적용
        let batch_size = self.embedder.max_batch_size().max(1);
        let mut embeddings = Vec::with_capacity(pending.len());
        for (i, batch) in pending.chunks(batch_size).enumerate() {
            tracing::debug!(
                "Embedding batch {}/{}",
                i + 1,
                pending.len().div_ceil(batch_size)
            );
            embeddings.extend(self.guarded("embed", self.embedder.embed_batch(batch)).await?);
        }
        if embeddings.len() != pending.len() {
            return Err(RagError::retrieval(
                "embed",
                anyhow::anyhow!(
                    "embedding count mismatch: expected {}, got {}",
                    pending.len(),
                    embeddings.len()
                ),
            ));
        }

        // 입력 순서대로 임베딩 배정
        let mut fresh = embeddings.into_iter();
        let documents: Vec<Document> = documents
            .into_iter()
            .map(|d| {
                if d.embedding().is_some() {
                    return d;
                }
                match fresh.next() {
                    Some(e) => d.with_embedding(e),
                    None => d,
                }
            })
            .collect();

        let added = self
            .guarded("add", self.vectors.add_documents(&documents))
            .await?;

        // 영속화 실패 시 추가분을 되돌려 메모리와 디스크 상태를 맞춤
        if let Err(e) = self.guarded("persist", self.vectors.persist()).await {
            if let Err(rollback) = self.vectors.rollback().await {
                tracing::warn!("Failed to roll back unpersisted documents: {:#}", rollback);
            }
            return Err(e);
        }

        tracing::info!("Added {} documents to {} store", added, self.vectors.name());
        Ok(added)
    }

    // ------------------------------------------------------------------------
    // Searching
    // ------------------------------------------------------------------------

    async fn embed_query(&self, query: &str) -> RagResult<Vec<f32>> {
        self.guarded("embed", self.embedder.embed(query)).await
    }

    /// 필터 없는 최근접 검색
    pub async fn search_similar(&self, query: &str, k: usize) -> RagResult<Vec<Document>> {
        let embedding = self.embed_query(query).await?;
        self.guarded("search", self.vectors.similarity_search(&embedding, k))
            .await
    }

    /// 점수 포함 최근접 검색 (순위 순서)
    pub async fn search_with_score(&self, query: &str, k: usize) -> RagResult<Vec<ScoredDocument>> {
        let embedding = self.embed_query(query).await?;
        let results = self
            .guarded(
                "search",
                self.vectors.similarity_search_with_score(&embedding, k),
            )
            .await?;

        tracing::debug!("Vector search returned {} candidates (k={})", results.len(), k);
        Ok(results)
    }

    /// 저장소 통계
    pub async fn stats(&self) -> RagResult<StoreStats> {
        let document_count = self.guarded("count", self.vectors.count()).await?;
        Ok(StoreStats {
            document_count,
            backend: self.vectors.name().to_string(),
            embedding_model: self.embedder.name().to_string(),
            location: self.location.clone(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
