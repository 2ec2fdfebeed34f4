//! Vector Store - 벡터 검색 트레이트 및 유틸리티
//!
//! 저장소는 임베딩이 채워진 문서만 받습니다. 임베딩 계산은
//! `EmbeddingStore`가 담당합니다.

use anyhow::Result;
use async_trait::async_trait;

use super::document::{Document, ScoredDocument};

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 벡터 저장소의 공통 인터페이스입니다. 검색 결과는 순위 순서
/// (가장 유사한 문서가 먼저)로 반환해야 합니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 문서 배치 추가 (모든 문서에 임베딩 필요)
    async fn add_documents(&self, documents: &[Document]) -> Result<usize>;

    /// 점수 포함 최근접 검색
    async fn similarity_search_with_score(
        &self,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>>;

    /// 최근접 검색 (점수 없음)
    async fn similarity_search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<Document>> {
        Ok(self
            .similarity_search_with_score(query_embedding, k)
            .await?
            .into_iter()
            .map(|s| s.document)
            .collect())
    }

    /// 영속 저장소로 플러시
    async fn persist(&self) -> Result<()>;

    /// 마지막 persist 이후 추가된 문서 폐기
    ///
    /// 쓰기 즉시 커밋되는 저장소는 되돌릴 것이 없습니다.
    async fn rollback(&self) -> Result<()> {
        Ok(())
    }

    /// 저장된 문서 수
    async fn count(&self) -> Result<usize>;

    /// 백엔드 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 두 벡터 간의 코사인 유사도를 계산합니다.
/// 결과는 -1.0 ~ 1.0 범위입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 임베딩 누락 문서 확인
pub(crate) fn ensure_embedded(documents: &[Document], dimension: Option<usize>) -> Result<()> {
    for (i, doc) in documents.iter().enumerate() {
        let embedding = doc
            .embedding()
            .ok_or_else(|| anyhow::anyhow!("Document {} has no embedding", i))?;
        if let Some(dim) = dimension {
            if embedding.len() != dim {
                anyhow::bail!(
                    "Document {} embedding has dimension {}, expected {}",
                    i,
                    embedding.len(),
                    dim
                );
            }
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_ensure_embedded() {
        let ok = vec![Document::new("a").with_embedding(vec![1.0, 0.0])];
        assert!(ensure_embedded(&ok, Some(2)).is_ok());
        assert!(ensure_embedded(&ok, Some(3)).is_err());
        assert!(ensure_embedded(&[Document::new("b")], None).is_err());
    }
}
