//! 记忆事件总线
//!
//! 压缩、持久化、遗忘的结果以 [`MemoryEvent`] 发布，订阅方按事件种类注册处理器。
//!
//! - 发布只做一次有界入队（`try_send`），队列满时丢弃事件并记录告警，不阻塞记忆写入路径
//! - 失败报告（`PersistFailed` / `ForgetFailed`）不会因队列满而丢弃：改走无界的溢出通道，
//!   worker 优先分发，因此可能早于队列中排在它之前的事件送达
//! - 单个后台 worker 按发布顺序逐个分发
//! - 处理器返回的错误与 panic 都被隔离，不影响其他订阅者
//!
//! ```rust,no_run
//! use echo_memory::events::{EventBus, FnHandler, MemoryEventKind};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let bus = EventBus::new(256);
//! bus.subscribe(
//!     MemoryEventKind::Compressed,
//!     Arc::new(FnHandler(|event: &echo_memory::events::MemoryEvent| {
//!         println!("{:?}", event.kind());
//!     })),
//! );
//! # }
//! ```

use crate::error::Result;
use crate::memory::types::{ImportanceScore, MemoryChunk};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

// ── 事件载荷 ──────────────────────────────────────────────────────────────────

/// 一次压缩的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCompressedEvent {
    pub session_id: String,
    pub agent_id: String,
    /// 可读的压缩比，如 `50/100 tokens (50.0%)`
    pub compression_ratio: String,
    pub tokens_before: f64,
    pub tokens_removed: f64,
    /// 被压缩掉的原始消息条数
    pub messages_consumed: usize,
    pub chunks: Vec<MemoryChunk>,
}

/// 单个 chunk 已写入长期存储
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPersistedEvent {
    pub chunk_id: String,
    pub session_id: String,
    /// 同时写入向量时的模型 ID
    pub embedding_model_id: Option<String>,
}

/// 单个 chunk 被遗忘
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryForgottenEvent {
    pub chunk_id: String,
    /// 删除时的重要度
    pub importance: ImportanceScore,
    /// 叠加时间衰减后的有效分数
    pub effective_score: f64,
}

/// 压缩结果写入长期存储失败（缓冲区已截断，不回滚）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPersistFailedEvent {
    pub session_id: String,
    pub chunk_ids: Vec<String>,
    pub attempts: u32,
    pub error: String,
}

/// 遗忘时删除失败
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryForgetFailedEvent {
    pub chunk_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryEvent {
    Compressed(MemoryCompressedEvent),
    Persisted(MemoryPersistedEvent),
    Forgotten(MemoryForgottenEvent),
    PersistFailed(MemoryPersistFailedEvent),
    ForgetFailed(MemoryForgetFailedEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryEventKind {
    Compressed,
    Persisted,
    Forgotten,
    PersistFailed,
    ForgetFailed,
}

impl MemoryEventKind {
    /// 持久化 / 删除失败的旁路报告
    pub fn is_failure_report(self) -> bool {
        matches!(self, Self::PersistFailed | Self::ForgetFailed)
    }
}

impl MemoryEvent {
    pub fn kind(&self) -> MemoryEventKind {
        match self {
            MemoryEvent::Compressed(_) => MemoryEventKind::Compressed,
            MemoryEvent::Persisted(_) => MemoryEventKind::Persisted,
            MemoryEvent::Forgotten(_) => MemoryEventKind::Forgotten,
            MemoryEvent::PersistFailed(_) => MemoryEventKind::PersistFailed,
            MemoryEvent::ForgetFailed(_) => MemoryEventKind::ForgetFailed,
        }
    }
}

// ── 订阅者 ────────────────────────────────────────────────────────────────────

/// 事件处理器
#[async_trait]
pub trait MemoryEventHandler: Send + Sync {
    async fn handle(&self, event: &MemoryEvent) -> Result<()>;
}

/// 用闭包作为处理器的便捷包装
pub struct FnHandler<F>(pub F)
where
    F: Fn(&MemoryEvent) + Send + Sync;

#[async_trait]
impl<F> MemoryEventHandler for FnHandler<F>
where
    F: Fn(&MemoryEvent) + Send + Sync,
{
    async fn handle(&self, event: &MemoryEvent) -> Result<()> {
        (self.0)(event);
        Ok(())
    }
}

// ── EventBus ──────────────────────────────────────────────────────────────────

enum Envelope {
    Event(MemoryEvent),
    /// 之前入队的事件全部分发完后回执
    Flush(oneshot::Sender<()>),
}

type Subscribers = Arc<RwLock<Vec<(MemoryEventKind, Arc<dyn MemoryEventHandler>)>>>;

/// 有界队列 + 单 worker 的事件总线，克隆后共享同一队列
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::Sender<Envelope>,
    /// 队列满时失败报告的去处
    overflow: mpsc::UnboundedSender<MemoryEvent>,
    subscribers: Subscribers,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    /// 创建总线并启动分发 worker（需要在 tokio runtime 内调用）
    ///
    /// 所有克隆都被丢弃后 worker 自动退出。
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (overflow, overflow_rx) = mpsc::unbounded_channel();
        let subscribers: Subscribers = Arc::new(RwLock::new(Vec::new()));
        tokio::spawn(dispatch_loop(receiver, overflow_rx, subscribers.clone()));
        Self {
            sender,
            overflow,
            subscribers,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self, kind: MemoryEventKind, handler: Arc<dyn MemoryEventHandler>) {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.push((kind, handler));
        debug!(?kind, total = subs.len(), "新增事件订阅");
    }

    /// 订阅多个事件种类
    pub fn subscribe_all(&self, kinds: &[MemoryEventKind], handler: Arc<dyn MemoryEventHandler>) {
        for kind in kinds {
            self.subscribe(*kind, handler.clone());
        }
    }

    /// 非阻塞发布；队列已满或 worker 已退出时丢弃并返回 `false`
    ///
    /// 失败报告在队列满时转入溢出通道，只有 worker 已退出才会丢弃。
    pub fn publish(&self, event: MemoryEvent) -> bool {
        let kind = event.kind();
        match self.sender.try_send(Envelope::Event(event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(Envelope::Event(event)))
                if kind.is_failure_report() =>
            {
                if self.overflow.send(event).is_ok() {
                    debug!(?kind, "事件队列已满，失败报告转入溢出通道");
                    return true;
                }
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(?kind, "⚠️ 事件 worker 已退出，丢弃事件");
                false
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(?kind, "⚠️ 事件队列已满，丢弃事件");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(?kind, "⚠️ 事件 worker 已退出，丢弃事件");
                false
            }
        }
    }

    /// 等待此前入队的事件全部分发完成
    pub async fn drain(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Envelope::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// 因队列满或关闭而丢弃的事件数
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

async fn dispatch_loop(
    mut receiver: mpsc::Receiver<Envelope>,
    mut overflow: mpsc::UnboundedReceiver<MemoryEvent>,
    subscribers: Subscribers,
) {
    loop {
        // 溢出通道优先：Flush 入队前转入的失败报告一定先于回执分发
        let envelope = tokio::select! {
            biased;
            Some(event) = overflow.recv() => Envelope::Event(event),
            envelope = receiver.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        match envelope {
            Envelope::Event(event) => dispatch(&event, &subscribers).await,
            Envelope::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    while let Ok(event) = overflow.try_recv() {
        dispatch(&event, &subscribers).await;
    }
    debug!("事件分发 worker 退出");
}

async fn dispatch(event: &MemoryEvent, subscribers: &Subscribers) {
    let kind = event.kind();
    let handlers: Vec<Arc<dyn MemoryEventHandler>> = subscribers
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .iter()
        .filter(|(k, _)| *k == kind)
        .map(|(_, h)| h.clone())
        .collect();

    for handler in handlers {
        match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(?kind, error = %e, "事件处理器返回错误"),
            Err(_) => error!(?kind, "事件处理器 panic，已隔离"),
        }
    }
}
