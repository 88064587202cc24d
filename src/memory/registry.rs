//! 命名空间注册表
//!
//! `NamespaceKey → ConversationMemory` 的有界映射：
//!
//! - 分片并发 map（[`DashMap`]），不同命名空间之间互不阻塞
//! - 每个命名空间一把写锁，串行化同一命名空间的并发 append
//! - 达到上限时淘汰最久未访问的命名空间（LRU）
//! - 空闲超过 TTL 的命名空间在访问时或周期清扫时移除
//!
//! 被淘汰的命名空间直接丢弃，不做持久化。

use crate::memory::conversation::ConversationMemory;
use crate::memory::types::NamespaceKey;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 注册表中的单个命名空间
pub struct NamespaceEntry {
    key: NamespaceKey,
    memory: Mutex<ConversationMemory>,
    /// 同一命名空间同时最多一个压缩任务
    compress_gate: Arc<Mutex<()>>,
    /// 最后访问时间（相对注册表 epoch 的毫秒数），用于 TTL
    last_access_ms: AtomicU64,
    /// 全局递增的访问序号，用于 LRU 排序
    touch_seq: AtomicU64,
}

impl NamespaceEntry {
    fn new(key: NamespaceKey, now_ms: u64, seq: u64) -> Self {
        Self {
            memory: Mutex::new(ConversationMemory::new(key.clone())),
            key,
            compress_gate: Arc::new(Mutex::new(())),
            last_access_ms: AtomicU64::new(now_ms),
            touch_seq: AtomicU64::new(seq),
        }
    }

    pub fn key(&self) -> &NamespaceKey {
        &self.key
    }

    /// 命名空间的缓冲区锁
    pub fn memory(&self) -> &Mutex<ConversationMemory> {
        &self.memory
    }

    /// 若已有压缩在进行则返回 `None`
    pub fn try_begin_compression(&self) -> Option<OwnedMutexGuard<()>> {
        self.compress_gate.clone().try_lock_owned().ok()
    }

    /// 等待正在进行的压缩结束后获得压缩权
    pub async fn begin_compression(&self) -> OwnedMutexGuard<()> {
        self.compress_gate.clone().lock_owned().await
    }

    pub fn is_compressing(&self) -> bool {
        self.compress_gate.try_lock().is_err()
    }
}

pub struct NamespaceRegistry {
    entries: DashMap<NamespaceKey, Arc<NamespaceEntry>>,
    max_namespaces: usize,
    ttl: Duration,
    epoch: Instant,
    seq: AtomicU64,
    /// 仅串行化“新建命名空间”，已存在命名空间的访问不经过它
    create_lock: StdMutex<()>,
}

impl NamespaceRegistry {
    pub fn new(max_namespaces: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_namespaces: max_namespaces.max(1),
            ttl,
            epoch: Instant::now(),
            seq: AtomicU64::new(0),
            create_lock: StdMutex::new(()),
        }
    }

    /// 返回已有命名空间（刷新访问时间），不存在或已过期则新建
    pub fn get_or_create(&self, key: &NamespaceKey) -> Arc<NamespaceEntry> {
        if let Some(entry) = self.live_entry(key) {
            return entry;
        }

        let _guard = self
            .create_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // 拿到锁后再确认一次，可能已被并发创建
        if let Some(entry) = self.live_entry(key) {
            return entry;
        }
        if self.entries.remove(key).is_some() {
            debug!(namespace = %key, "⌛ 命名空间已过期，重新创建");
        }

        if self.entries.len() >= self.max_namespaces {
            self.sweep_expired();
        }
        while self.entries.len() >= self.max_namespaces {
            if !self.evict_lru() {
                break;
            }
        }

        let entry = Arc::new(NamespaceEntry::new(
            key.clone(),
            self.now_ms(),
            self.next_seq(),
        ));
        self.entries.insert(key.clone(), entry.clone());
        debug!(namespace = %key, total = self.entries.len(), "🆕 创建命名空间");
        entry
    }

    /// 仅查询，不新建；命中时刷新访问时间
    pub fn get(&self, key: &NamespaceKey) -> Option<Arc<NamespaceEntry>> {
        self.live_entry(key)
    }

    /// 刷新 TTL，不修改内容；返回命名空间是否存在
    pub fn touch(&self, key: &NamespaceKey) -> bool {
        self.live_entry(key).is_some()
    }

    /// 显式结束会话
    pub fn remove(&self, key: &NamespaceKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            info!(namespace = %key, "🗑️ 命名空间已移除");
        }
        removed
    }

    /// 移除所有空闲超过 TTL 的命名空间，返回移除数量
    pub fn sweep_expired(&self) -> usize {
        let now = self.now_ms();
        let ttl_ms = self.ttl.as_millis() as u64;
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            now.saturating_sub(entry.last_access_ms.load(Ordering::Acquire)) <= ttl_ms
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            info!(removed, remaining = self.entries.len(), "🧹 清理过期命名空间");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &NamespaceKey) -> bool {
        self.entries.contains_key(key)
    }

    /// 启动周期清扫任务，`cancel` 触发后退出
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.sweep_expired();
                    }
                }
            }
            debug!("命名空间清扫任务退出");
        })
    }

    fn live_entry(&self, key: &NamespaceKey) -> Option<Arc<NamespaceEntry>> {
        // 先克隆出 Arc，释放分片读锁后再做其他操作
        let entry = self.entries.get(key).map(|e| Arc::clone(e.value()))?;
        if self.is_expired(&entry) {
            return None;
        }
        self.touch_entry(&entry);
        Some(entry)
    }

    fn touch_entry(&self, entry: &NamespaceEntry) {
        entry.last_access_ms.store(self.now_ms(), Ordering::Release);
        entry.touch_seq.store(self.next_seq(), Ordering::Release);
    }

    fn is_expired(&self, entry: &NamespaceEntry) -> bool {
        let idle = self
            .now_ms()
            .saturating_sub(entry.last_access_ms.load(Ordering::Acquire));
        idle > self.ttl.as_millis() as u64
    }

    fn evict_lru(&self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|e| e.value().touch_seq.load(Ordering::Acquire))
            .map(|e| e.key().clone());
        match victim {
            Some(key) => {
                self.entries.remove(&key);
                info!(namespace = %key, "♻️ 命名空间数量达到上限，淘汰最久未访问的命名空间");
                true
            }
            None => false,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::AcqRel) + 1
    }
}
