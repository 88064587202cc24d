//! 记忆系统门面
//!
//! [`MemoryManager`] 把命名空间注册表、压缩器、遗忘策略和事件总线组装在一起，
//! 对外只暴露少量操作：
//!
//! | 操作 | 说明 |
//! |------|------|
//! | [`append_message`](MemoryManager::append_message) | 追加消息，必要时触发压缩 |
//! | [`snapshot`](MemoryManager::snapshot) | 读取命名空间缓冲区的有序副本 |
//! | [`force_compress`](MemoryManager::force_compress) | 不等阈值，立即压缩 |
//! | [`run_forgetting_sweep`](MemoryManager::run_forgetting_sweep) | 按范围执行一次遗忘 |
//! | [`subscribe`](MemoryManager::subscribe) | 订阅记忆事件 |
//!
//! ```rust,no_run
//! use echo_memory::config::MemoryConfig;
//! use echo_memory::llm::types::Message;
//! use echo_memory::memory::manager::MemoryManager;
//! use echo_memory::memory::types::NamespaceKey;
//!
//! # async fn example() -> echo_memory::error::Result<()> {
//! let manager = MemoryManager::builder(MemoryConfig::load("memory.yaml")?).build()?;
//! manager.spawn_maintenance();
//!
//! let key = NamespaceKey::new("alice", "session-1");
//! manager.append_message(&key, Message::user("我喜欢深色主题".to_string())).await?;
//! println!("{} 条消息", manager.snapshot(&key).await.len());
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::compression::summarizer::{HeuristicSummarizer, Summarizer};
use crate::compression::Compressor;
use crate::config::{CompressionMode, MemoryConfig};
use crate::error::{ConfigError, Result};
use crate::events::{EventBus, MemoryEventHandler, MemoryEventKind, MemoryForgottenEvent};
use crate::forgetting::ForgettingPolicy;
use crate::memory::registry::{NamespaceEntry, NamespaceRegistry};
use crate::memory::store::{InMemoryLongTermStore, LongTermMemoryPort};
use crate::memory::types::{ChunkScope, MemoryChunk, MemoryMessage, NamespaceKey};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct MemoryManager {
    config: MemoryConfig,
    registry: Arc<NamespaceRegistry>,
    compressor: Arc<Compressor>,
    forgetting: Arc<ForgettingPolicy>,
    store: Arc<dyn LongTermMemoryPort>,
    events: EventBus,
    cancel: CancellationToken,
    maintenance: StdMutex<Vec<JoinHandle<()>>>,
}

/// `MemoryManager` 的构建器
///
/// 未指定时：摘要器为 [`HeuristicSummarizer`]，长期存储为 [`InMemoryLongTermStore`]，
/// 事件总线按 `event_queue_capacity` 新建。
pub struct MemoryManagerBuilder {
    config: MemoryConfig,
    summarizer: Option<Arc<dyn Summarizer>>,
    store: Option<Arc<dyn LongTermMemoryPort>>,
    events: Option<EventBus>,
}

impl MemoryManagerBuilder {
    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn store(mut self, store: Arc<dyn LongTermMemoryPort>) -> Self {
        self.store = Some(store);
        self
    }

    /// 与其他组件共享同一条事件总线
    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// 校验配置并组装各组件（需要在 tokio runtime 内调用）
    pub fn build(self) -> Result<MemoryManager> {
        self.config.validate()?;
        let config = self.config;

        let summarizer = self
            .summarizer
            .unwrap_or_else(|| Arc::new(HeuristicSummarizer::default()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryLongTermStore::new()));
        let events = self
            .events
            .unwrap_or_else(|| EventBus::new(config.event_queue_capacity));

        let registry = Arc::new(NamespaceRegistry::new(config.max_namespaces, config.ttl()));
        let compressor = Arc::new(Compressor::new(
            &config,
            summarizer,
            store.clone(),
            events.clone(),
        ));
        let forgetting = Arc::new(ForgettingPolicy::from_config(
            &config,
            store.clone(),
            events.clone(),
        ));

        info!(
            max_namespaces = config.max_namespaces,
            window_tokens = config.default_window_tokens,
            mode = ?config.compression_mode,
            embedding_model = config.embedding_model_id.as_deref().unwrap_or("-"),
            "🧠 记忆系统已初始化"
        );

        Ok(MemoryManager {
            config,
            registry,
            compressor,
            forgetting,
            store,
            events,
            cancel: CancellationToken::new(),
            maintenance: StdMutex::new(Vec::new()),
        })
    }
}

impl MemoryManager {
    pub fn builder(config: MemoryConfig) -> MemoryManagerBuilder {
        MemoryManagerBuilder {
            config,
            summarizer: None,
            store: None,
            events: None,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// 追加一条消息；超过阈值时触发压缩
    ///
    /// 压缩 / 持久化失败只记录日志和事件，不影响本次追加；
    /// 只有 token 记账等不变量被破坏时才返回错误。
    pub async fn append_message(
        &self,
        key: &NamespaceKey,
        message: impl Into<MemoryMessage>,
    ) -> Result<()> {
        let entry = self.registry.get_or_create(key);
        let should_compress = {
            let mut memory = entry.memory().lock().await;
            memory.append(message.into());
            if cfg!(debug_assertions) {
                memory.verify()?;
            }
            self.compressor
                .policy()
                .should_compress(memory.total_tokens(), memory.len())
        };
        if !should_compress {
            return Ok(());
        }

        let Some(gate) = entry.try_begin_compression() else {
            debug!(namespace = %key, "已有压缩任务在进行，跳过本次触发");
            return Ok(());
        };

        match self.config.compression_mode {
            CompressionMode::Inline => run_compression(&self.compressor, &entry, gate).await,
            CompressionMode::Background => {
                let compressor = self.compressor.clone();
                tokio::spawn(async move {
                    if let Err(e) = run_compression(&compressor, &entry, gate).await {
                        error!(namespace = %entry.key(), error = %e, "❌ 后台压缩失败");
                    }
                });
                Ok(())
            }
        }
    }

    /// 命名空间缓冲区的有序副本；命名空间不存在时返回空列表
    pub async fn snapshot(&self, key: &NamespaceKey) -> Vec<MemoryMessage> {
        match self.registry.get(key) {
            Some(entry) => entry.memory().lock().await.snapshot(),
            None => Vec::new(),
        }
    }

    /// 当前缓冲区的 token 总数
    pub async fn token_total(&self, key: &NamespaceKey) -> Option<f64> {
        let entry = self.registry.get(key)?;
        let total = entry.memory().lock().await.total_tokens();
        Some(total)
    }

    /// 等待进行中的压缩结束后，按同一策略立即压缩
    ///
    /// 缓冲区低于回落水位或命名空间不存在时返回空列表；摘要失败时返回错误。
    pub async fn force_compress(&self, key: &NamespaceKey) -> Result<Vec<MemoryChunk>> {
        let Some(entry) = self.registry.get(key) else {
            return Ok(Vec::new());
        };
        let gate = entry.begin_compression().await;
        let outcome = self.compressor.compress(&entry, &gate).await?;
        Ok(outcome.chunks)
    }

    pub async fn run_forgetting_sweep(
        &self,
        scope: &ChunkScope,
    ) -> Result<Vec<MemoryForgottenEvent>> {
        self.forgetting.sweep(scope).await
    }

    /// 订阅记忆事件
    ///
    /// 事件队列（`event_queue_capacity`）满时，`Compressed` / `Persisted` / `Forgotten`
    /// 会被丢弃并计入 [`EventBus::dropped_count`]；`PersistFailed` / `ForgetFailed`
    /// 不会丢弃，但可能早于排在它前面的事件送达。
    pub fn subscribe(&self, kind: MemoryEventKind, handler: Arc<dyn MemoryEventHandler>) {
        self.events.subscribe(kind, handler);
    }

    /// 用配置的 embedding 模型检索长期记忆
    pub async fn search(
        &self,
        knowledge_id: &str,
        agent_id: &str,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<MemoryChunk>> {
        let model = self
            .config
            .embedding_model_id
            .as_deref()
            .ok_or(ConfigError::MissingEmbeddingModel)?;
        self.store
            .semantic_search_by_text(
                knowledge_id,
                agent_id,
                query,
                model,
                top_k.unwrap_or(self.config.default_top_k),
            )
            .await
    }

    /// 结束会话，直接丢弃缓冲区中尚未压缩的消息
    pub fn end_session(&self, key: &NamespaceKey) -> bool {
        self.registry.remove(key)
    }

    /// 刷新 TTL；返回命名空间是否存在
    pub fn touch(&self, key: &NamespaceKey) -> bool {
        self.registry.touch(key)
    }

    pub fn namespace_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_compressing(&self, key: &NamespaceKey) -> bool {
        self.registry
            .get(key)
            .is_some_and(|entry| entry.is_compressing())
    }

    /// 启动后台维护：TTL 清扫，以及配置了周期时的全量遗忘
    pub fn spawn_maintenance(&self) {
        let mut handles = self
            .maintenance
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        handles.push(
            self.registry
                .spawn_sweeper(self.config.sweep_interval(), self.cancel.child_token()),
        );

        if let Some(secs) = self.config.forget_interval_secs {
            let forgetting = self.forgetting.clone();
            let cancel = self.cancel.child_token();
            let interval = Duration::from_secs(secs);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = forgetting.sweep(&ChunkScope::all()).await {
                                warn!(error = %e, "⚠️ 后台遗忘扫描失败");
                            }
                        }
                    }
                }
                debug!("遗忘任务退出");
            }));
        }
        info!(tasks = handles.len(), "后台维护任务已启动");
    }

    /// 停止后台任务，并等待已发布的事件分发完成
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self
            .maintenance
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "后台任务异常退出");
            }
        }
        self.events.drain().await;
        info!("🧠 记忆系统已关闭");
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 执行压缩；可恢复的错误在此吞掉
async fn run_compression(
    compressor: &Compressor,
    entry: &NamespaceEntry,
    gate: OwnedMutexGuard<()>,
) -> Result<()> {
    match compressor.compress(entry, &gate).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_fatal() => {
            error!(namespace = %entry.key(), error = %e, "❌ 压缩破坏了缓冲区不变量");
            Err(e)
        }
        Err(e) => {
            warn!(namespace = %entry.key(), error = %e, "⚠️ 压缩未完成，缓冲区保留原样");
            Ok(())
        }
    }
}
