//! 上下文压缩
//!
//! 当命名空间缓冲区超过 token 窗口或条数上限时，把最早的一段消息交给
//! [`Summarizer`] 生成摘要，包装为 [`MemoryChunk`] 写入长期存储，并从缓冲区头部截断。
//!
//! 执行顺序固定为：摘要 → 截断 → 发布 `Compressed` 事件 → 持久化。
//! 摘要失败时放弃本次压缩，缓冲区保持原样；持久化失败不回滚截断，
//! 只通过 `PersistFailed` 事件和日志报告。
//!
//! ```rust,no_run
//! use echo_memory::compression::Compressor;
//! use echo_memory::compression::summarizer::HeuristicSummarizer;
//! use echo_memory::config::MemoryConfig;
//! use echo_memory::events::EventBus;
//! use echo_memory::memory::registry::NamespaceRegistry;
//! use echo_memory::memory::store::InMemoryLongTermStore;
//! use echo_memory::memory::types::NamespaceKey;
//! use std::sync::Arc;
//!
//! # async fn example() -> echo_memory::error::Result<()> {
//! let config = MemoryConfig::default();
//! let compressor = Compressor::new(
//!     &config,
//!     Arc::new(HeuristicSummarizer::default()),
//!     Arc::new(InMemoryLongTermStore::new()),
//!     EventBus::new(config.event_queue_capacity),
//! );
//!
//! let registry = NamespaceRegistry::new(config.max_namespaces, config.ttl());
//! let entry = registry.get_or_create(&NamespaceKey::new("alice", "s1"));
//! let gate = entry.begin_compression().await;
//! let outcome = compressor.compress(&entry, &gate).await?;
//! println!("生成 {} 条记忆", outcome.chunks.len());
//! # Ok(())
//! # }
//! ```

pub mod policy;
pub mod summarizer;

pub use policy::{CompressionPlan, CompressionPolicy};
pub use summarizer::{Summarizer, SummaryDraft};

use crate::config::MemoryConfig;
use crate::error::{CapabilityError, MemoryError, Result};
use crate::events::{
    EventBus, MemoryCompressedEvent, MemoryEvent, MemoryPersistFailedEvent, MemoryPersistedEvent,
};
use crate::memory::registry::NamespaceEntry;
use crate::memory::store::LongTermMemoryPort;
use crate::memory::types::{
    ImportanceScore, MemoryChunk, MemoryMessage, NamespaceKey, clamp_cost,
};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// 一次压缩的结果
#[derive(Debug, Clone, Default)]
pub struct CompressionOutcome {
    pub chunks: Vec<MemoryChunk>,
    pub messages_consumed: usize,
    pub tokens_before: f64,
    pub tokens_removed: f64,
    /// chunk 是否已写入长期存储
    pub persisted: bool,
}

impl CompressionOutcome {
    /// 低于回落水位，无需压缩
    pub fn is_noop(&self) -> bool {
        self.messages_consumed == 0
    }
}

pub struct Compressor {
    policy: CompressionPolicy,
    summarizer: Arc<dyn Summarizer>,
    store: Arc<dyn LongTermMemoryPort>,
    events: EventBus,
    chunk_size: usize,
    overlap: usize,
    embedding_model_id: Option<String>,
    persist_retries: u32,
    default_importance: f64,
}

impl Compressor {
    pub fn new(
        config: &MemoryConfig,
        summarizer: Arc<dyn Summarizer>,
        store: Arc<dyn LongTermMemoryPort>,
        events: EventBus,
    ) -> Self {
        Self {
            policy: CompressionPolicy::from_config(config),
            summarizer,
            store,
            events,
            chunk_size: config.chunk_size,
            overlap: config.overlap,
            embedding_model_id: config.embedding_model_id.clone(),
            persist_retries: config.persist_retries,
            default_importance: config.default_importance,
        }
    }

    pub fn policy(&self) -> &CompressionPolicy {
        &self.policy
    }

    /// 压缩一个命名空间
    ///
    /// 调用方必须持有该命名空间的压缩权（`_gate`），保证同一时刻只有一个压缩者截断头部，
    /// 因此摘要期间无需持有缓冲区锁，新消息只会追加在尾部。
    pub async fn compress(
        &self,
        entry: &NamespaceEntry,
        _gate: &OwnedMutexGuard<()>,
    ) -> Result<CompressionOutcome> {
        let key = entry.key();
        let (snapshot, plan) = {
            let memory = entry.memory().lock().await;
            let snapshot = memory.snapshot();
            let plan = self.policy.plan(&snapshot);
            (snapshot, plan)
        };
        if plan.consume == 0 {
            debug!(namespace = %key, "缓冲区低于回落水位，跳过压缩");
            return Ok(CompressionOutcome::default());
        }

        info!(
            namespace = %key,
            messages = plan.consume,
            tokens = plan.tokens_removed,
            "🗜️ 开始压缩"
        );

        let prefix = &snapshot[..plan.consume];
        let chunks = match self.summarize_prefix(key, prefix).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(namespace = %key, error = %e, "⚠️ 摘要失败，放弃本次压缩，缓冲区保持不变");
                return Err(e);
            }
        };

        {
            let mut memory = entry.memory().lock().await;
            let removed = memory.truncate_front(plan.consume)?;
            debug_assert!(
                removed.iter().zip(prefix).all(|(a, b)| a.id() == b.id()),
                "压缩期间缓冲区头部被其他任务修改"
            );
        }

        let ratio = if plan.tokens_before > 0.0 {
            plan.tokens_removed / plan.tokens_before * 100.0
        } else {
            0.0
        };
        self.events
            .publish(MemoryEvent::Compressed(MemoryCompressedEvent {
                session_id: key.session_id().to_string(),
                agent_id: key.agent_id().to_string(),
                compression_ratio: format!(
                    "{:.0}/{:.0} tokens ({:.1}%)",
                    plan.tokens_removed, plan.tokens_before, ratio
                ),
                tokens_before: plan.tokens_before,
                tokens_removed: plan.tokens_removed,
                messages_consumed: plan.consume,
                chunks: chunks.clone(),
            }));
        info!(
            namespace = %key,
            messages = plan.consume,
            chunks = chunks.len(),
            "✅ 压缩完成"
        );

        let persisted = self.persist(key, &chunks).await;
        Ok(CompressionOutcome {
            chunks,
            messages_consumed: plan.consume,
            tokens_before: plan.tokens_before,
            tokens_removed: plan.tokens_removed,
            persisted,
        })
    }

    async fn summarize_prefix(
        &self,
        key: &NamespaceKey,
        prefix: &[MemoryMessage],
    ) -> Result<Vec<MemoryChunk>> {
        let mut chunks = Vec::new();
        for window in split_windows(prefix, self.chunk_size, self.overlap) {
            let drafts = self.summarizer.summarize(window).await?;
            if drafts.is_empty() {
                return Err(CapabilityError::EmptySummary.into());
            }
            let window_tokens: f64 = window.iter().map(|m| clamp_cost(m.token_cost())).sum();
            let fallback = self.default_importance_for(window_tokens);
            for draft in drafts {
                chunks.push(
                    MemoryChunk::builder(draft.title, draft.body)
                        .tags(draft.tags)
                        .importance(draft.importance.unwrap_or(fallback))
                        .scoped_to(key)
                        .build(),
                );
            }
        }
        Ok(chunks)
    }

    /// 摘要未给出重要度时，窗口越长分数越高
    fn default_importance_for(&self, window_tokens: f64) -> ImportanceScore {
        let fill = (window_tokens / self.chunk_size.max(1) as f64).min(1.0);
        ImportanceScore::new(self.default_importance + (1.0 - self.default_importance) * fill * 0.5)
    }

    /// 带重试的持久化；失败时只报告，不回滚
    async fn persist(&self, key: &NamespaceKey, chunks: &[MemoryChunk]) -> bool {
        let attempts = self.persist_retries + 1;
        let mut last_error: Option<MemoryError> = None;

        for attempt in 1..=attempts {
            let result = match &self.embedding_model_id {
                Some(model) => self.store.save_all_and_embed(chunks.to_vec(), model).await,
                None => self.store.save_all(chunks.to_vec()).await,
            };
            match result {
                Ok(()) => {
                    for chunk in chunks {
                        self.events
                            .publish(MemoryEvent::Persisted(MemoryPersistedEvent {
                                chunk_id: chunk.id().to_string(),
                                session_id: key.session_id().to_string(),
                                embedding_model_id: self.embedding_model_id.clone(),
                            }));
                    }
                    debug!(namespace = %key, chunks = chunks.len(), attempt, "💾 记忆已持久化");
                    return true;
                }
                Err(e) => {
                    warn!(namespace = %key, attempt, attempts, error = %e, "⚠️ 记忆持久化失败");
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.map(|e| e.to_string()).unwrap_or_default();
        self.events
            .publish(MemoryEvent::PersistFailed(MemoryPersistFailedEvent {
                session_id: key.session_id().to_string(),
                chunk_ids: chunks.iter().map(|c| c.id().to_string()).collect(),
                attempts,
                error: error.clone(),
            }));
        warn!(namespace = %key, chunks = chunks.len(), error = %error, "❌ 重试耗尽，本次压缩结果未能保存");
        false
    }
}

/// 把消息切成不超过 `chunk_size` token 的窗口，相邻窗口共享不超过 `overlap` token 的尾部消息
///
/// 单条超长消息独占一个窗口；每个窗口至少推进一条消息。
pub(crate) fn split_windows(
    messages: &[MemoryMessage],
    chunk_size: usize,
    overlap: usize,
) -> Vec<&[MemoryMessage]> {
    let limit = chunk_size as f64;
    let shared_limit = overlap as f64;
    let mut windows = Vec::new();
    let mut start = 0;

    while start < messages.len() {
        let mut end = start;
        let mut tokens = 0.0;
        while end < messages.len() {
            let cost = clamp_cost(messages[end].token_cost());
            if end > start && tokens + cost > limit {
                break;
            }
            tokens += cost;
            end += 1;
        }
        windows.push(&messages[start..end]);
        if end == messages.len() {
            break;
        }

        let mut next = end;
        let mut shared = 0.0;
        while next > start + 1 {
            let cost = clamp_cost(messages[next - 1].token_cost());
            if shared + cost > shared_limit {
                break;
            }
            shared += cost;
            next -= 1;
        }
        start = next;
    }
    windows
}
