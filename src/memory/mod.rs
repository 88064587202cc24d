//! 记忆系统
//!
//! 分两层，职责各不相同：
//!
//! | 层次 | 实现 | 作用域 |
//! |------|------|--------|
//! | 短期记忆 | [`ConversationMemory`]（由 [`NamespaceRegistry`] 按命名空间管理） | 单个会话，进程内 |
//! | 长期记忆 | [`LongTermMemoryPort`] / [`InMemoryLongTermStore`] / [`FileLongTermStore`] | 跨会话，可持久化 |
//!
//! 短期记忆超过窗口后由压缩器转为 [`MemoryChunk`] 写入长期记忆，
//! 长期记忆再按重要度与时间衰减被遗忘。日常使用只需要 [`MemoryManager`]。
//!
//! ## 长期记忆检索
//!
//! ```rust,no_run
//! use echo_memory::memory::{FileLongTermStore, HashEmbedding, LongTermMemoryPort};
//! use std::sync::Arc;
//!
//! # async fn example() -> echo_memory::error::Result<()> {
//! let store = FileLongTermStore::new("~/.echo-memory/chunks.json")?
//!     .with_embedder(Arc::new(HashEmbedding::new(256)));
//! let hits = store
//!     .semantic_search_by_text("default", "alice", "主题偏好", "hash-256", 3)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod conversation;
pub mod embedding;
pub mod manager;
pub mod registry;
pub mod store;
pub mod types;

pub use conversation::ConversationMemory;
pub use embedding::{EmbeddingProvider, HashEmbedding, cosine_similarity};
pub use manager::{MemoryManager, MemoryManagerBuilder};
pub use registry::{NamespaceEntry, NamespaceRegistry};
pub use store::{FileLongTermStore, InMemoryLongTermStore, LongTermMemoryPort};
pub use types::{ChunkScope, ImportanceScore, MemoryChunk, MemoryMessage, NamespaceKey};
