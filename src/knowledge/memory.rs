//! 인메모리 벡터 저장소 (JSON 스냅샷 영속화)
//!
//! 소규모 지식베이스와 테스트용입니다. 전수 코사인 검색을 수행하며
//! `persist()` 시 `<dir>/index.json`에 원자적으로 기록합니다.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::document::{Document, ScoredDocument};
use super::vector::{cosine_similarity, ensure_embedded, VectorStore};

/// 스냅샷 파일 이름
const SNAPSHOT_FILE: &str = "index.json";

/// 인메모리 벡터 저장소
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    documents: RwLock<Vec<Document>>,
    /// 마지막으로 영속화된 문서 수
    persisted: AtomicUsize,
    snapshot_path: Option<PathBuf>,
}

impl MemoryVectorStore {
    /// 휘발성 저장소 (persist는 아무 것도 하지 않음)
    pub fn new() -> Self {
        Self::default()
    }

    /// 디렉토리에 스냅샷을 두는 저장소 열기
    ///
    /// 같은 디렉토리로 다시 열면 기존 스냅샷을 그대로 불러옵니다.
    pub async fn open(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create vector store directory: {:?}", dir))?;

        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let documents = if tokio::fs::try_exists(&snapshot_path).await.unwrap_or(false) {
            let raw = tokio::fs::read_to_string(&snapshot_path)
                .await
                .with_context(|| format!("Failed to read snapshot: {:?}", snapshot_path))?;
            serde_json::from_str::<Vec<Document>>(&raw)
                .with_context(|| format!("Corrupted snapshot: {:?}", snapshot_path))?
        } else {
            Vec::new()
        };

        tracing::debug!(
            "Memory vector store opened at {:?} ({} documents)",
            snapshot_path,
            documents.len()
        );

        Ok(Self {
            persisted: AtomicUsize::new(documents.len()),
            documents: RwLock::new(documents),
            snapshot_path: Some(snapshot_path),
        })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Document>>> {
        self.documents
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add_documents(&self, documents: &[Document]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }

        let mut guard = self
            .documents
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let dimension = guard.first().and_then(|d| d.embedding()).map(<[f32]>::len);
        ensure_embedded(documents, dimension.or_else(|| documents[0].embedding().map(<[f32]>::len)))?;

        guard.extend_from_slice(documents);
        Ok(documents.len())
    }

    async fn similarity_search_with_score(
        &self,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        let guard = self.read()?;

        let mut scored: Vec<ScoredDocument> = guard
            .iter()
            .filter_map(|doc| {
                doc.embedding().map(|e| ScoredDocument {
                    score: cosine_similarity(query_embedding, e),
                    document: doc.clone(),
                })
            })
            .collect();

        // 안정 정렬: 동점이면 삽입 순서 유지
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            self.persisted.store(self.read()?.len(), Ordering::SeqCst);
            return Ok(());
        };

        let (json, len) = {
            let guard = self.read()?;
            let json = serde_json::to_string(&*guard).context("Failed to serialize snapshot")?;
            (json, guard.len())
        };

        // 임시 파일에 쓰고 rename (부분 기록 방지)
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write snapshot: {:?}", tmp))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace snapshot: {:?}", path))?;

        self.persisted.store(len, Ordering::SeqCst);
        tracing::debug!("Persisted memory vector store to {:?}", path);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut guard = self
            .documents
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let persisted = self.persisted.load(Ordering::SeqCst);
        if guard.len() > persisted {
            tracing::debug!("Discarding {} unpersisted documents", guard.len() - persisted);
            guard.truncate(persisted);
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
