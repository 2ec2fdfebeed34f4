//! LanceDB Vector Store - 디스크 기반 벡터 검색
//!
//! ANN 검색으로 대용량 벡터에서도 빠른 검색을 지원합니다.
//! 코사인 거리로 검색하며 점수는 `1 - distance`(코사인 유사도)입니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::Table;
use lancedb::DistanceType;

use super::document::{Document, Metadata, ScoredDocument};
use super::vector::{ensure_embedded, VectorStore};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "documents";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
///
/// 각 쓰기는 새 데이터셋 버전으로 즉시 커밋되므로 `persist()`는 별도 작업이 없습니다.
pub struct LanceVectorStore {
    db: Connection,
    dimension: usize,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원 (테이블 스키마에 고정됨)
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Embedding dimension must be positive");
        }

        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db, dimension })
    }

    fn list_size(&self) -> Result<i32> {
        i32::try_from(self.dimension).context("Embedding dimension too large")
    }

    /// 문서 테이블 스키마
    fn create_schema(&self) -> Result<Schema> {
        Ok(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.list_size()?,
                ),
                false,
            ),
        ]))
    }

    /// 문서들을 Arrow RecordBatch로 변환
    fn documents_to_batch(&self, documents: &[Document]) -> Result<RecordBatch> {
        let ids: Vec<String> = documents
            .iter()
            .map(|_| uuid::Uuid::new_v4().to_string())
            .collect();
        let contents: Vec<&str> = documents.iter().map(Document::content).collect();
        let metadata: Vec<String> = documents
            .iter()
            .map(|d| serde_json::to_string(d.metadata()))
            .collect::<std::result::Result<_, _>>()
            .context("Failed to serialize metadata")?;

        // 임베딩을 FixedSizeList로 변환
        let embeddings_flat: Vec<f32> = documents
            .iter()
            .flat_map(|d| d.embedding().unwrap_or_default().iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.list_size()?,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(self.create_schema()?),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;
        Ok(names.iter().any(|n| n == TABLE_NAME))
    }

    async fn open_table(&self) -> Result<Option<Table>> {
        if !self.table_exists().await? {
            return Ok(None);
        }
        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table")?;
        Ok(Some(table))
    }
}

/// 검색 결과 배치를 문서로 변환
fn batch_to_scored(batch: &RecordBatch, out: &mut Vec<ScoredDocument>) -> Result<()> {
    let contents = batch
        .column_by_name("content")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing content column"))?;

    let metadata = batch
        .column_by_name("metadata")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing metadata column"))?;

    // _distance 컬럼 (LanceDB가 자동 추가)
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

    for i in 0..batch.num_rows() {
        let meta: Metadata =
            serde_json::from_str(metadata.value(i)).context("Corrupted metadata column")?;

        out.push(ScoredDocument {
            document: Document::new(contents.value(i)).with_metadata_map(meta),
            // 코사인 거리 -> 코사인 유사도
            score: 1.0 - distances.value(i),
        });
    }
    Ok(())
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn add_documents(&self, documents: &[Document]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        ensure_embedded(documents, Some(self.dimension))?;

        let batch = self.documents_to_batch(documents)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.open_table().await? {
            // 기존 테이블에 추가
            Some(table) => {
                table
                    .add(batches)
                    .execute()
                    .await
                    .context("Failed to add documents to table")?;
            }
            // 새 테이블 생성
            None => {
                self.db
                    .create_table(TABLE_NAME, batches)
                    .execute()
                    .await
                    .context("Failed to create table")?;
            }
        }

        Ok(documents.len())
    }

    async fn similarity_search_with_score(
        &self,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };
        if k == 0 {
            return Ok(vec![]);
        }

        let stream = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;

        let mut results = Vec::new();
        for batch in &batches {
            batch_to_scored(batch, &mut results)?;
        }

        // 배치 경계를 넘어서도 순위 순서 보장
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(k);
        Ok(results)
    }

    async fn persist(&self) -> Result<()> {
        tracing::debug!("LanceDB commits on every write; nothing to flush");
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        match self.open_table().await? {
            Some(table) => table.count_rows(None).await.context("Failed to count rows"),
            None => Ok(0),
        }
    }

    fn name(&self) -> &str {
        "lancedb"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(text: &str, embedding: Vec<f32>) -> Document {
        Document::new(text)
            .with_metadata("source", format!("{}.txt", text))
            .with_embedding(embedding)
    }

    #[tokio::test]
    async fn test_lance_store_basic() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&temp_dir.path().join("test.lance"), 3)
            .await
            .unwrap();

        // 초기 상태
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.similarity_search(&[1.0, 0.0, 0.0], 3).await.unwrap().is_empty());

        let inserted = store
            .add_documents(&[doc("a", vec![1.0, 0.0, 0.0]), doc("b", vec![0.0, 1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lance_search_cosine() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&temp_dir.path().join("search.lance"), 3)
            .await
            .unwrap();

        store
            .add_documents(&[
                doc("x", vec![1.0, 0.0, 0.0]),
                doc("y", vec![0.0, 1.0, 0.0]),
                doc("xy", vec![1.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = store
            .similarity_search_with_score(&[1.0, 0.0, 0.0], 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document.content(), "x");
        assert!((results[0].score - 1.0).abs() < 0.01);
        assert_eq!(results[1].document.content(), "xy");
        assert_eq!(results[0].document.source().as_deref(), Some("x.txt"));
    }

    #[tokio::test]
    async fn test_lance_rejects_wrong_dimension() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&temp_dir.path().join("dim.lance"), 3)
            .await
            .unwrap();
        assert!(store.add_documents(&[doc("a", vec![1.0, 0.0])]).await.is_err());
    }

    #[tokio::test]
    async fn test_lance_reopen_keeps_rows() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("reopen.lance");

        {
            let store = LanceVectorStore::open(&path, 2).await.unwrap();
            store.add_documents(&[doc("a", vec![1.0, 0.0])]).await.unwrap();
            store.persist().await.unwrap();
        }

        let store = LanceVectorStore::open(&path, 2).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
