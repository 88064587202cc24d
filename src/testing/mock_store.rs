//! 可注入故障的长期存储，内部委托给 [`InMemoryLongTermStore`]。
//!
//! ```rust
//! use echo_memory::testing::MockLongTermStore;
//! use echo_memory::memory::store::LongTermMemoryPort;
//! use echo_memory::memory::types::MemoryChunk;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = MockLongTermStore::new();
//! store.fail_next_saves(1);
//!
//! let chunk = MemoryChunk::builder("标题", "摘要").build();
//! assert!(store.save(chunk.clone()).await.is_err());
//! assert!(store.save(chunk).await.is_ok());
//! assert_eq!(store.save_attempts(), 2);
//! # }
//! ```

use crate::error::{PersistenceError, Result};
use crate::memory::embedding::EmbeddingProvider;
use crate::memory::store::{InMemoryLongTermStore, LongTermMemoryPort};
use crate::memory::types::{ChunkScope, MemoryChunk};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub struct MockLongTermStore {
    inner: InMemoryLongTermStore,
    /// 接下来多少次写入调用返回错误（批量写入算一次）
    save_failures: AtomicUsize,
    save_attempts: AtomicUsize,
    failing_deletes: Arc<Mutex<HashSet<String>>>,
}

impl Default for MockLongTermStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLongTermStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryLongTermStore::new(),
            save_failures: AtomicUsize::new(0),
            save_attempts: AtomicUsize::new(0),
            failing_deletes: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_embedder(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.inner = self.inner.with_embedder(provider);
        self
    }

    pub fn fail_next_saves(&self, count: usize) {
        self.save_failures.store(count, Ordering::SeqCst);
    }

    /// 删除指定 chunk 时总是失败
    pub fn fail_deletes_for(&self, id: impl Into<String>) {
        self.failing_deletes.lock().unwrap().insert(id.into());
    }

    /// 写入调用次数（含失败）
    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }

    fn check_save(&self) -> Result<()> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        let inject = self
            .save_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if inject {
            return Err(PersistenceError::Backend("injected save failure".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl LongTermMemoryPort for MockLongTermStore {
    async fn save(&self, chunk: MemoryChunk) -> Result<()> {
        self.check_save()?;
        self.inner.save(chunk).await
    }

    async fn save_all(&self, chunks: Vec<MemoryChunk>) -> Result<()> {
        self.check_save()?;
        self.inner.save_all(chunks).await
    }

    async fn save_and_embed(&self, chunk: MemoryChunk, embedding_model_id: &str) -> Result<()> {
        self.check_save()?;
        self.inner.save_and_embed(chunk, embedding_model_id).await
    }

    async fn save_all_and_embed(
        &self,
        chunks: Vec<MemoryChunk>,
        embedding_model_id: &str,
    ) -> Result<()> {
        self.check_save()?;
        self.inner
            .save_all_and_embed(chunks, embedding_model_id)
            .await
    }

    async fn semantic_search_by_text(
        &self,
        knowledge_id: &str,
        agent_id: &str,
        query_text: &str,
        embedding_model_id: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryChunk>> {
        self.inner
            .semantic_search_by_text(knowledge_id, agent_id, query_text, embedding_model_id, top_k)
            .await
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        if self.failing_deletes.lock().unwrap().contains(id) {
            return Err(PersistenceError::Backend(format!("injected delete failure: {}", id)).into());
        }
        self.inner.delete_by_id(id).await
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryChunk>> {
        self.inner.get(id).await
    }

    async fn list(&self, scope: &ChunkScope) -> Result<Vec<MemoryChunk>> {
        self.inner.list(scope).await
    }
}
