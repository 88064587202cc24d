//! 长期记忆遗忘
//!
//! 有效分数 = 重要度 × 时间衰减，低于下限的 chunk 从长期存储中删除：
//!
//! ```text
//! effective = importance * 0.5 ^ ((now - last_access_at) / half_life)
//! ```
//!
//! 衰减以最后访问时间为起点，被检索命中的记忆会重新“变新”。
//! 扫描基于 chunk 列表的快照，期间其他任务写入或删除 chunk 不影响扫描；
//! 单个 chunk 删除失败只报告，不中断扫描。

use crate::config::MemoryConfig;
use crate::error::Result;
use crate::events::{EventBus, MemoryEvent, MemoryForgetFailedEvent, MemoryForgottenEvent};
use crate::memory::store::LongTermMemoryPort;
use crate::memory::types::{ChunkScope, MemoryChunk, now_millis};
use std::f64::consts::LN_2;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 指数半衰期衰减，取值 (0, 1]，随时间单调不增
#[derive(Debug, Clone, Copy)]
pub struct RecencyDecay {
    half_life: Duration,
}

impl RecencyDecay {
    pub fn new(half_life: Duration) -> Self {
        Self { half_life }
    }

    pub fn half_life(&self) -> Duration {
        self.half_life
    }

    pub fn factor(&self, elapsed: Duration) -> f64 {
        let half_life = self.half_life.as_secs_f64();
        if half_life <= 0.0 {
            return 1.0;
        }
        (-LN_2 * elapsed.as_secs_f64() / half_life)
            .exp()
            .clamp(f64::MIN_POSITIVE, 1.0)
    }
}

pub struct ForgettingPolicy {
    floor: f64,
    decay: RecencyDecay,
    store: Arc<dyn LongTermMemoryPort>,
    events: EventBus,
}

impl ForgettingPolicy {
    pub fn new(
        floor: f64,
        decay: RecencyDecay,
        store: Arc<dyn LongTermMemoryPort>,
        events: EventBus,
    ) -> Self {
        Self {
            floor,
            decay,
            store,
            events,
        }
    }

    pub fn from_config(
        config: &MemoryConfig,
        store: Arc<dyn LongTermMemoryPort>,
        events: EventBus,
    ) -> Self {
        Self::new(
            config.forget_floor,
            RecencyDecay::new(config.forget_half_life()),
            store,
            events,
        )
    }

    pub fn floor(&self) -> f64 {
        self.floor
    }

    /// 时钟回拨（last_access 晚于 now）时按未衰减处理
    pub fn effective_score(&self, chunk: &MemoryChunk, now_millis: u64) -> f64 {
        let elapsed = Duration::from_millis(now_millis.saturating_sub(chunk.last_access_at()));
        chunk.importance().value() * self.decay.factor(elapsed)
    }

    pub async fn sweep(&self, scope: &ChunkScope) -> Result<Vec<MemoryForgottenEvent>> {
        self.sweep_at(scope, now_millis()).await
    }

    /// 以指定时间点扫描，返回成功遗忘的 chunk
    pub async fn sweep_at(
        &self,
        scope: &ChunkScope,
        now_millis: u64,
    ) -> Result<Vec<MemoryForgottenEvent>> {
        let candidates = self.store.list(scope).await?;
        let scanned = candidates.len();
        let mut forgotten = Vec::new();
        let mut failed = 0usize;

        for chunk in candidates {
            let effective = self.effective_score(&chunk, now_millis);
            if effective >= self.floor {
                continue;
            }
            match self.store.delete_by_id(chunk.id()).await {
                Ok(()) => {
                    debug!(
                        chunk_id = chunk.id(),
                        importance = %chunk.importance(),
                        effective,
                        "🧹 遗忘记忆"
                    );
                    let event = MemoryForgottenEvent {
                        chunk_id: chunk.id().to_string(),
                        importance: chunk.importance(),
                        effective_score: effective,
                    };
                    self.events.publish(MemoryEvent::Forgotten(event.clone()));
                    forgotten.push(event);
                }
                Err(e) => {
                    failed += 1;
                    warn!(chunk_id = chunk.id(), error = %e, "⚠️ 删除记忆失败，继续扫描");
                    self.events
                        .publish(MemoryEvent::ForgetFailed(MemoryForgetFailedEvent {
                            chunk_id: chunk.id().to_string(),
                            error: e.to_string(),
                        }));
                }
            }
        }

        info!(
            scanned,
            forgotten = forgotten.len(),
            failed,
            floor = self.floor,
            "遗忘扫描完成"
        );
        Ok(forgotten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventKind;
    use crate::memory::types::{ImportanceScore, NamespaceKey};
    use crate::testing::{MockLongTermStore, RecordingHandler};

    const HOUR_MS: u64 = 3_600_000;

    fn chunk(id: &str, importance: f64, at: u64, key: &NamespaceKey) -> MemoryChunk {
        MemoryChunk::builder(id, "summary")
            .id(id)
            .importance(ImportanceScore::new(importance))
            .created_at(at)
            .scoped_to(key)
            .build()
    }

    fn policy(store: Arc<MockLongTermStore>, events: EventBus) -> ForgettingPolicy {
        ForgettingPolicy::new(
            0.1,
            RecencyDecay::new(Duration::from_secs(10 * 3600)),
            store,
            events,
        )
    }

    #[test]
    fn test_decay_is_monotonic_and_bounded() {
        let decay = RecencyDecay::new(Duration::from_secs(3600));
        assert_eq!(decay.factor(Duration::ZERO), 1.0);
        assert!((decay.factor(Duration::from_secs(3600)) - 0.5).abs() < 1e-9);
        let mut previous = 1.0;
        for hours in 1..200 {
            let f = decay.factor(Duration::from_secs(hours * 3600));
            assert!(f > 0.0 && f <= previous);
            previous = f;
        }
    }

    #[tokio::test]
    async fn test_effective_score_ignores_clock_skew() {
        let store = Arc::new(MockLongTermStore::new());
        let policy = policy(store, EventBus::new(4));
        let key = NamespaceKey::new("a", "s");
        let c = chunk("c", 0.8, 10 * HOUR_MS, &key);
        assert_eq!(policy.effective_score(&c, 0), 0.8);
        assert!((policy.effective_score(&c, 20 * HOUR_MS) - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_below_floor() {
        let store = Arc::new(MockLongTermStore::new());
        let events = EventBus::new(16);
        let recorder = Arc::new(RecordingHandler::new());
        events.subscribe(MemoryEventKind::Forgotten, recorder.clone());
        let key = NamespaceKey::new("alice", "s1");

        // now = 30h，半衰期 10h，衰减因子 0.125
        store.save(chunk("stale", 0.5, 0, &key)).await.unwrap();
        store.save(chunk("important", 0.9, 0, &key)).await.unwrap();
        store.save(chunk("fresh", 0.2, 30 * HOUR_MS, &key)).await.unwrap();
        // 刚被访问且恰好等于下限
        store.save(chunk("boundary", 0.1, 30 * HOUR_MS, &key)).await.unwrap();

        let policy = policy(store.clone(), events.clone());
        let forgotten = policy.sweep_at(&ChunkScope::all(), 30 * HOUR_MS).await.unwrap();
        events.drain().await;

        assert_eq!(forgotten.len(), 1);
        assert_eq!(forgotten[0].chunk_id, "stale");
        assert_eq!(forgotten[0].importance, ImportanceScore::new(0.5));
        assert!(store.get("stale").await.unwrap().is_none());
        for id in ["important", "fresh", "boundary"] {
            assert!(store.get(id).await.unwrap().is_some(), "{id} 不应被删除");
        }
        assert_eq!(recorder.count(MemoryEventKind::Forgotten), 1);
    }

    #[tokio::test]
    async fn test_sweep_respects_scope() {
        let store = Arc::new(MockLongTermStore::new());
        let alice = NamespaceKey::new("alice", "s1");
        let bob = NamespaceKey::new("bob", "s1");
        store.save(chunk("a", 0.05, 0, &alice)).await.unwrap();
        store.save(chunk("b", 0.05, 0, &bob)).await.unwrap();

        let policy = policy(store.clone(), EventBus::new(8));
        let forgotten = policy
            .sweep_at(&ChunkScope::all().agent("alice"), HOUR_MS)
            .await
            .unwrap();
        assert_eq!(forgotten.len(), 1);
        assert!(store.get("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_failure_is_reported_and_scan_continues() {
        let store = Arc::new(MockLongTermStore::new());
        let events = EventBus::new(16);
        let recorder = Arc::new(RecordingHandler::new());
        events.subscribe_all(
            &[MemoryEventKind::Forgotten, MemoryEventKind::ForgetFailed],
            recorder.clone(),
        );
        let key = NamespaceKey::new("alice", "s1");
        store.save(chunk("locked", 0.01, 0, &key)).await.unwrap();
        store.save(chunk("loose", 0.01, 0, &key)).await.unwrap();
        store.fail_deletes_for("locked");

        let policy = policy(store.clone(), events.clone());
        let forgotten = policy.sweep_at(&ChunkScope::all(), HOUR_MS).await.unwrap();
        events.drain().await;

        assert_eq!(forgotten.len(), 1);
        assert_eq!(forgotten[0].chunk_id, "loose");
        assert!(store.get("locked").await.unwrap().is_some());
        assert_eq!(recorder.count(MemoryEventKind::ForgetFailed), 1);
        assert_eq!(recorder.count(MemoryEventKind::Forgotten), 1);
    }
}
