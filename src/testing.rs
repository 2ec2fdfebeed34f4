//! 테스트용 인메모리 가짜 구현

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::knowledge::{Document, MemoryVectorStore, ScoredDocument, VectorStore};
use crate::provider::{ChatMessage, EmbeddingProvider, GenerationProvider};

// ============================================================================
// Embedding
// ============================================================================

/// 키워드 출현 횟수를 차원으로 쓰는 결정적 임베더
pub(crate) struct KeywordEmbedder {
    keywords: Vec<String>,
}

impl KeywordEmbedder {
    pub(crate) fn new(keywords: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.to_lowercase();
        Ok(self
            .keywords
            .iter()
            .map(|k| text.matches(k.as_str()).count() as f32)
            .collect())
    }

    fn dimension(&self) -> usize {
        self.keywords.len()
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

pub(crate) struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("embedding service unavailable")
    }

    fn dimension(&self) -> usize {
        2
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// 배치마다 지연이 있는 임베더 (배치 크기 기록)
pub(crate) struct SlowEmbedder {
    delay: Duration,
    batch_size: usize,
    batches: Mutex<Vec<usize>>,
}

impl SlowEmbedder {
    pub(crate) fn new(delay: Duration, batch_size: usize) -> Self {
        Self {
            delay,
            batch_size,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![1.0, 0.0])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batches.lock().unwrap().push(texts.len());
        tokio::time::sleep(self.delay).await;
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }

    fn dimension(&self) -> usize {
        2
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    fn name(&self) -> &str {
        "slow"
    }
}

// ============================================================================
// Vector Store
// ============================================================================

/// 호출 순서를 기록하는 저장소 (인메모리 저장소 위임)
pub(crate) struct RecordingStore {
    inner: MemoryVectorStore,
    events: Mutex<Vec<String>>,
    fail_persist: AtomicBool,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryVectorStore::new(),
            events: Mutex::new(Vec::new()),
            fail_persist: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorStore for RecordingStore {
    async fn add_documents(&self, documents: &[Document]) -> Result<usize> {
        self.events.lock().unwrap().push("add".to_string());
        // 다른 쓰기가 끼어들 수 있는 지점
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.inner.add_documents(documents).await
    }

    async fn similarity_search_with_score(
        &self,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        self.inner.similarity_search_with_score(query_embedding, k).await
    }

    async fn persist(&self) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.events.lock().unwrap().push("persist".to_string());
        if self.fail_persist.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.inner.persist().await
    }

    async fn rollback(&self) -> Result<()> {
        self.events.lock().unwrap().push("rollback".to_string());
        self.inner.rollback().await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// 질의와 무관하게 미리 정한 순서/점수를 돌려주는 저장소
pub(crate) struct FixedScoreStore {
    results: Mutex<Vec<ScoredDocument>>,
    persisted: Mutex<usize>,
}

impl FixedScoreStore {
    pub(crate) fn new(results: &[(&str, f32)]) -> Self {
        Self {
            results: Mutex::new(
                results
                    .iter()
                    .map(|(content, score)| ScoredDocument {
                        document: Document::new(*content),
                        score: *score,
                    })
                    .collect(),
            ),
            persisted: Mutex::new(0),
        }
    }

    pub(crate) fn persist_calls(&self) -> usize {
        *self.persisted.lock().unwrap()
    }
}

#[async_trait]
impl VectorStore for FixedScoreStore {
    async fn add_documents(&self, documents: &[Document]) -> Result<usize> {
        let mut results = self.results.lock().unwrap();
        // 새 문서가 가장 유사한 것으로 취급
        for doc in documents.iter().rev() {
            results.insert(
                0,
                ScoredDocument {
                    document: doc.clone(),
                    score: 1.0,
                },
            );
        }
        Ok(documents.len())
    }

    async fn similarity_search_with_score(
        &self,
        _query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        Ok(self.results.lock().unwrap().iter().take(k).cloned().collect())
    }

    async fn persist(&self) -> Result<()> {
        *self.persisted.lock().unwrap() += 1;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.results.lock().unwrap().len())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

pub(crate) struct FailingStore;

#[async_trait]
impl VectorStore for FailingStore {
    async fn add_documents(&self, _documents: &[Document]) -> Result<usize> {
        anyhow::bail!("disk full")
    }

    async fn similarity_search_with_score(
        &self,
        _query_embedding: &[f32],
        _k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        anyhow::bail!("index corrupted")
    }

    async fn persist(&self) -> Result<()> {
        anyhow::bail!("disk full")
    }

    async fn count(&self) -> Result<usize> {
        anyhow::bail!("index corrupted")
    }

    fn name(&self) -> &str {
        "failing"
    }
}

// ============================================================================
// Generation
// ============================================================================

type Reply = Box<dyn Fn(&[ChatMessage]) -> Result<String> + Send + Sync>;

/// 호출을 기록하고 스크립트된 응답을 돌려주는 채팅 모델
pub(crate) struct ScriptedChat {
    reply: Reply,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub(crate) fn new<F>(reply: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            reply: Box::new(reply),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub(crate) fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        (self.reply)(messages)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub(crate) struct FailingChat;

#[async_trait]
impl GenerationProvider for FailingChat {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        anyhow::bail!("rate limit exceeded")
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}
