//! 长期记忆存储
//!
//! [`LongTermMemoryPort`] 是压缩器与遗忘策略依赖的存储契约，与具体的数据库 /
//! 向量索引技术无关。
//!
//! ## 内置实现
//!
//! - [`InMemoryLongTermStore`]：进程内存，适合测试
//! - [`FileLongTermStore`]：JSON 文件持久化，零额外依赖
//!
//! ## 快速上手
//!
//! ```rust,no_run
//! use echo_memory::memory::embedding::HashEmbedding;
//! use echo_memory::memory::store::{InMemoryLongTermStore, LongTermMemoryPort};
//! use std::sync::Arc;
//!
//! # async fn example() -> echo_memory::error::Result<()> {
//! let store = InMemoryLongTermStore::new().with_embedder(Arc::new(HashEmbedding::new(256)));
//! let hits = store
//!     .semantic_search_by_text("default", "alice", "深色主题", "hash-256", 5)
//!     .await?;
//! println!("{} 条相关记忆", hits.len());
//! # Ok(())
//! # }
//! ```

use crate::error::{PersistenceError, Result};
use crate::memory::embedding::{EmbeddingProvider, cosine_similarity};
use crate::memory::types::{ChunkScope, MemoryChunk, now_millis};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

// ── LongTermMemoryPort trait ──────────────────────────────────────────────────

/// 长期记忆的存储 / 检索契约
#[async_trait]
pub trait LongTermMemoryPort: Send + Sync {
    /// 写入或覆盖一条 chunk 的元数据
    async fn save(&self, chunk: MemoryChunk) -> Result<()>;

    async fn save_all(&self, chunks: Vec<MemoryChunk>) -> Result<()> {
        for chunk in chunks {
            self.save(chunk).await?;
        }
        Ok(())
    }

    /// 写入并用指定模型计算、索引向量
    async fn save_and_embed(&self, chunk: MemoryChunk, embedding_model_id: &str) -> Result<()>;

    async fn save_all_and_embed(
        &self,
        chunks: Vec<MemoryChunk>,
        embedding_model_id: &str,
    ) -> Result<()> {
        for chunk in chunks {
            self.save_and_embed(chunk, embedding_model_id).await?;
        }
        Ok(())
    }

    /// 在 knowledge / agent 范围内按语义相似度返回最多 `top_k` 条；无匹配时返回空列表
    async fn semantic_search_by_text(
        &self,
        knowledge_id: &str,
        agent_id: &str,
        query_text: &str,
        embedding_model_id: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryChunk>>;

    /// 幂等删除：目标不存在不视为错误
    async fn delete_by_id(&self, id: &str) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<MemoryChunk>>;

    /// 列出范围内的全部 chunk
    async fn list(&self, scope: &ChunkScope) -> Result<Vec<MemoryChunk>>;
}

// ── InMemoryLongTermStore ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    chunk: MemoryChunk,
    /// embedding 模型 ID → 向量
    #[serde(default)]
    embeddings: HashMap<String, Vec<f32>>,
}

/// 进程内存实现，不持久化
pub struct InMemoryLongTermStore {
    /// chunk id → 记录
    data: RwLock<HashMap<String, StoredChunk>>,
    embedders: HashMap<String, Arc<dyn EmbeddingProvider>>,
}

impl Default for InMemoryLongTermStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLongTermStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            embedders: HashMap::new(),
        }
    }

    /// 注册 embedding 模型，按 `model_id()` 索引
    pub fn with_embedder(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedders
            .insert(provider.model_id().to_string(), provider);
        self
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    fn embedder(&self, model_id: &str) -> Result<&Arc<dyn EmbeddingProvider>> {
        self.embedders
            .get(model_id)
            .ok_or_else(|| PersistenceError::UnknownEmbeddingModel(model_id.to_string()).into())
    }

    async fn embed_chunks(
        &self,
        chunks: &[MemoryChunk],
        model_id: &str,
    ) -> Result<Vec<Vec<f32>>> {
        let provider = self.embedder(model_id)?;
        let texts: Vec<String> = chunks.iter().map(MemoryChunk::embedding_text).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = provider.embed(&refs).await?;
        if vectors.len() != chunks.len() {
            return Err(PersistenceError::Embedding(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            ))
            .into());
        }
        Ok(vectors)
    }

    async fn upsert(&self, chunk: MemoryChunk, embedding: Option<(&str, Vec<f32>)>) {
        let mut data = self.data.write().await;
        let id = chunk.id().to_string();
        let record = data.entry(id).or_insert_with(|| StoredChunk {
            chunk: chunk.clone(),
            embeddings: HashMap::new(),
        });
        // 内容变化后旧向量失效
        if record.chunk.embedding_text() != chunk.embedding_text() {
            record.embeddings.clear();
        }
        record.chunk = chunk;
        if let Some((model_id, vector)) = embedding {
            record.embeddings.insert(model_id.to_string(), vector);
        }
    }

    /// 删除，返回是否确实存在
    async fn remove(&self, id: &str) -> bool {
        self.data.write().await.remove(id).is_some()
    }

    async fn search(
        &self,
        knowledge_id: &str,
        agent_id: &str,
        query_text: &str,
        model_id: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryChunk>> {
        let provider = self.embedder(model_id)?;
        let scope = ChunkScope::all().knowledge(knowledge_id).agent(agent_id);
        let has_candidates = self
            .data
            .read()
            .await
            .values()
            .any(|r| scope.matches(&r.chunk) && r.embeddings.contains_key(model_id));
        if top_k == 0 || !has_candidates {
            return Ok(vec![]);
        }

        let query = provider
            .embed(&[query_text])
            .await?
            .pop()
            .ok_or_else(|| PersistenceError::Embedding("empty query embedding".to_string()))?;

        let mut scored: Vec<(f32, String)> = self
            .data
            .read()
            .await
            .values()
            .filter(|r| scope.matches(&r.chunk))
            .filter_map(|r| {
                let score = cosine_similarity(&query, r.embeddings.get(model_id)?);
                (score > 0.0).then(|| (score, r.chunk.id().to_string()))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        // 命中的 chunk 记录一次访问
        let now = now_millis();
        let mut data = self.data.write().await;
        let hits: Vec<MemoryChunk> = scored
            .iter()
            .filter_map(|(_, id)| {
                let record = data.get_mut(id)?;
                record.chunk.touch(now);
                Some(record.chunk.clone())
            })
            .collect();
        debug!(knowledge_id, agent_id, hits = hits.len(), "🔍 长期记忆检索");
        Ok(hits)
    }

    async fn to_json(&self) -> Result<String> {
        let data = self.data.read().await;
        serde_json::to_string_pretty(&*data)
            .map_err(|e| PersistenceError::Serialization(e.to_string()).into())
    }

    fn with_records(mut self, records: HashMap<String, StoredChunk>) -> Self {
        self.data = RwLock::new(records);
        self
    }
}

#[async_trait]
impl LongTermMemoryPort for InMemoryLongTermStore {
    async fn save(&self, chunk: MemoryChunk) -> Result<()> {
        self.upsert(chunk, None).await;
        Ok(())
    }

    async fn save_and_embed(&self, chunk: MemoryChunk, embedding_model_id: &str) -> Result<()> {
        self.save_all_and_embed(vec![chunk], embedding_model_id)
            .await
    }

    async fn save_all_and_embed(
        &self,
        chunks: Vec<MemoryChunk>,
        embedding_model_id: &str,
    ) -> Result<()> {
        let vectors = self.embed_chunks(&chunks, embedding_model_id).await?;
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            self.upsert(chunk, Some((embedding_model_id, vector))).await;
        }
        Ok(())
    }

    async fn semantic_search_by_text(
        &self,
        knowledge_id: &str,
        agent_id: &str,
        query_text: &str,
        embedding_model_id: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryChunk>> {
        self.search(knowledge_id, agent_id, query_text, embedding_model_id, top_k)
            .await
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        self.remove(id).await;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryChunk>> {
        Ok(self.data.read().await.get(id).map(|r| r.chunk.clone()))
    }

    async fn list(&self, scope: &ChunkScope) -> Result<Vec<MemoryChunk>> {
        let data = self.data.read().await;
        let mut chunks: Vec<MemoryChunk> = data
            .values()
            .filter(|r| scope.matches(&r.chunk))
            .map(|r| r.chunk.clone())
            .collect();
        chunks.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then(a.id().cmp(b.id())));
        Ok(chunks)
    }
}

// ── FileLongTermStore ─────────────────────────────────────────────────────────

/// 基于 JSON 文件的持久化实现
///
/// 每次写入、删除或检索（更新访问时间）后立即落盘。落盘串行执行，且总是序列化
/// 取得写锁之后的最新状态；先写临时文件再 `rename`，中途失败不会覆盖已有数据。
///
/// 存储格式：
/// ```json
/// {
///   "chunk-id": { "chunk": { "id": "...", "title": "...", ... }, "embeddings": { "hash-256": [...] } }
/// }
/// ```
pub struct FileLongTermStore {
    path: PathBuf,
    inner: InMemoryLongTermStore,
    flush_lock: Mutex<()>,
}

impl FileLongTermStore {
    /// 打开或创建存储文件，自动建父目录
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand_tilde(path.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::Io(format!("创建目录失败: {e}")))?;
        }
        let records: HashMap<String, StoredChunk> = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| PersistenceError::Io(format!("读取存储文件失败: {e}")))?;
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("长期记忆文件解析失败，从空状态开始: {e}");
                HashMap::new()
            })
        } else {
            HashMap::new()
        };
        info!(path = %path.display(), chunks = records.len(), "🗄️ FileLongTermStore 初始化");
        Ok(Self {
            path,
            inner: InMemoryLongTermStore::new().with_records(records),
            flush_lock: Mutex::new(()),
        })
    }

    pub fn with_embedder(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.inner = self.inner.with_embedder(provider);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self) -> Result<()> {
        // 持锁期间序列化，后落盘者必然看到更新的状态
        let _guard = self.flush_lock.lock().await;
        let json = self.inner.to_json().await?;
        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| PersistenceError::Io(format!("写入临时文件失败: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| PersistenceError::Io(format!("替换存储文件失败: {e}")))?;
        debug!(path = %self.path.display(), "💾 长期记忆已持久化");
        Ok(())
    }
}

#[async_trait]
impl LongTermMemoryPort for FileLongTermStore {
    async fn save(&self, chunk: MemoryChunk) -> Result<()> {
        self.inner.save(chunk).await?;
        self.flush().await
    }

    async fn save_all(&self, chunks: Vec<MemoryChunk>) -> Result<()> {
        for chunk in chunks {
            self.inner.save(chunk).await?;
        }
        self.flush().await
    }

    async fn save_and_embed(&self, chunk: MemoryChunk, embedding_model_id: &str) -> Result<()> {
        self.inner.save_and_embed(chunk, embedding_model_id).await?;
        self.flush().await
    }

    async fn save_all_and_embed(
        &self,
        chunks: Vec<MemoryChunk>,
        embedding_model_id: &str,
    ) -> Result<()> {
        self.inner
            .save_all_and_embed(chunks, embedding_model_id)
            .await?;
        self.flush().await
    }

    async fn semantic_search_by_text(
        &self,
        knowledge_id: &str,
        agent_id: &str,
        query_text: &str,
        embedding_model_id: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryChunk>> {
        let hits = self
            .inner
            .search(knowledge_id, agent_id, query_text, embedding_model_id, top_k)
            .await?;
        if !hits.is_empty() {
            self.flush().await?;
        }
        Ok(hits)
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        if self.inner.remove(id).await {
            self.flush().await?;
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryChunk>> {
        self.inner.get(id).await
    }

    async fn list(&self, scope: &ChunkScope) -> Result<Vec<MemoryChunk>> {
        self.inner.list(scope).await
    }
}

// ── 私有工具函数 ──────────────────────────────────────────────────────────────

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/")
        && let Some(home) = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())
    {
        return PathBuf::from(home).join(rest);
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;
    use crate::memory::embedding::HashEmbedding;
    use crate::memory::types::{ImportanceScore, NamespaceKey};

    const MODEL: &str = "hash-64";

    fn store() -> InMemoryLongTermStore {
        InMemoryLongTermStore::new().with_embedder(Arc::new(HashEmbedding::new(64)))
    }

    fn chunk(agent: &str, title: &str, summary: &str) -> MemoryChunk {
        let key = NamespaceKey::new(agent, "s1").with_knowledge("kb");
        MemoryChunk::builder(title, summary)
            .scoped_to(&key)
            .importance(ImportanceScore::new(0.6))
            .created_at(1_000)
            .build()
    }

    #[tokio::test]
    async fn test_search_empty_scope_returns_empty() {
        let store = store();
        let hits = store
            .semantic_search_by_text("kb", "alice", "anything", MODEL, 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_ranks_and_scopes() {
        let store = store();
        store
            .save_all_and_embed(
                vec![
                    chunk("alice", "rust ownership", "ownership borrowing lifetimes rust"),
                    chunk("alice", "weekend", "hiking trip mountains weather"),
                    chunk("bob", "rust ownership", "ownership borrowing lifetimes rust"),
                ],
                MODEL,
            )
            .await
            .unwrap();

        let hits = store
            .semantic_search_by_text("kb", "alice", "rust ownership borrowing", MODEL, 5)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].title(), "rust ownership");
        assert!(hits.iter().all(|c| c.agent_id() == "alice"));

        let limited = store
            .semantic_search_by_text("kb", "alice", "rust ownership borrowing", MODEL, 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_search_touches_last_access() {
        let store = store();
        let c = chunk("alice", "rust ownership", "ownership borrowing rust");
        let id = c.id().to_string();
        store.save_and_embed(c, MODEL).await.unwrap();

        let hits = store
            .semantic_search_by_text("kb", "alice", "ownership rust", MODEL, 3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].last_access_at() > 1_000);
        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.last_access_at(), hits[0].last_access_at());
        assert_eq!(stored.created_at(), 1_000);
    }

    #[tokio::test]
    async fn test_chunks_saved_without_embedding_are_not_searchable() {
        let store = store();
        store
            .save(chunk("alice", "rust", "ownership rust"))
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);
        let hits = store
            .semantic_search_by_text("kb", "alice", "ownership rust", MODEL, 3)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = store();
        let c = chunk("alice", "t", "s");
        let id = c.id().to_string();
        store.save(c).await.unwrap();
        store.delete_by_id(&id).await.unwrap();
        store.delete_by_id(&id).await.unwrap();
        store.delete_by_id("never-existed").await.unwrap();
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_embedding_model() {
        let store = store();
        let err = store
            .save_and_embed(chunk("alice", "t", "s"), "missing-model")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Persistence(PersistenceError::UnknownEmbeddingModel(_))
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_filters_scope() {
        let store = store();
        store
            .save_all(vec![chunk("alice", "a", "x"), chunk("bob", "b", "y")])
            .await
            .unwrap();
        assert_eq!(store.list(&ChunkScope::all()).await.unwrap().len(), 2);
        let alice = store.list(&ChunkScope::all().agent("alice")).await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].title(), "a");
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chunks.json");
        let c = chunk("alice", "rust ownership", "ownership borrowing rust");
        let id = c.id().to_string();
        {
            let store =
                FileLongTermStore::new(&path).unwrap().with_embedder(Arc::new(HashEmbedding::new(64)));
            store.save_and_embed(c, MODEL).await.unwrap();
        }
        let reopened =
            FileLongTermStore::new(&path).unwrap().with_embedder(Arc::new(HashEmbedding::new(64)));
        assert!(reopened.get(&id).await.unwrap().is_some());
        let hits = reopened
            .semantic_search_by_text("kb", "alice", "ownership rust", MODEL, 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        reopened.delete_by_id(&id).await.unwrap();
        reopened.delete_by_id(&id).await.unwrap();
        let again = FileLongTermStore::new(&path).unwrap();
        assert!(again.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_tolerates_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = FileLongTermStore::new(&path).unwrap();
        assert!(store.list(&ChunkScope::all()).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_store_concurrent_writes_match_disk() {
        for round in 0..20 {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("chunks.json");
            let store = Arc::new(FileLongTermStore::new(&path).unwrap());

            let mut handles = Vec::new();
            for i in 0..32 {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    let id = format!("c{i}");
                    let c = MemoryChunk::builder(id.clone(), "summary").id(id.clone()).build();
                    store.save(c).await.unwrap();
                    if i % 2 == 0 {
                        store.delete_by_id(&id).await.unwrap();
                    }
                }));
            }
            for h in handles {
                h.await.unwrap();
            }

            let in_memory: Vec<String> = store
                .list(&ChunkScope::all())
                .await
                .unwrap()
                .iter()
                .map(|c| c.id().to_string())
                .collect();
            let on_disk: Vec<String> = FileLongTermStore::new(&path)
                .unwrap()
                .list(&ChunkScope::all())
                .await
                .unwrap()
                .iter()
                .map(|c| c.id().to_string())
                .collect();
            assert_eq!(in_memory.len(), 16, "round {round}");
            assert_eq!(on_disk, in_memory, "round {round}");
            assert!(!tmp_path(&path).exists());
        }
    }
}
