//! 记忆系统的值对象

use crate::llm::types::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_KNOWLEDGE_ID: &str = "default";

// ── NamespaceKey ──────────────────────────────────────────────────────────────

/// 短期记忆的隔离单位：(agent, session, knowledge) 三元组，按值比较
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespaceKey {
    agent_id: String,
    session_id: String,
    knowledge_id: String,
}

impl NamespaceKey {
    pub fn new(agent_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            knowledge_id: DEFAULT_KNOWLEDGE_ID.to_string(),
        }
    }

    /// 绑定压缩结果所属的知识库
    pub fn with_knowledge(mut self, knowledge_id: impl Into<String>) -> Self {
        self.knowledge_id = knowledge_id.into();
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn knowledge_id(&self) -> &str {
        &self.knowledge_id
    }
}

impl fmt::Display for NamespaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.agent_id, self.session_id, self.knowledge_id
        )
    }
}

// ── ImportanceScore ───────────────────────────────────────────────────────────

/// 保留优先级，取值 [0.0, 1.0]，越高越不容易被遗忘
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct ImportanceScore(f64);

impl ImportanceScore {
    pub const MIN: ImportanceScore = ImportanceScore(0.0);
    pub const MAX: ImportanceScore = ImportanceScore(1.0);

    /// 超出范围的值被截断，NaN 视为 0
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::MIN;
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl From<f64> for ImportanceScore {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<ImportanceScore> for f64 {
    fn from(score: ImportanceScore) -> Self {
        score.0
    }
}

impl fmt::Display for ImportanceScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

// ── MemoryMessage ─────────────────────────────────────────────────────────────

/// 短期记忆中的一轮对话，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMessage {
    id: String,
    payload: Message,
    /// 创建时间（Unix 毫秒）
    created_at: u64,
    token_cost: f64,
}

impl MemoryMessage {
    /// 以内容长度估算 token 开销
    pub fn new(payload: Message) -> Self {
        let cost = payload.estimate_tokens();
        Self::with_token_cost(payload, cost)
    }

    /// 使用调用方给出的 token 开销（负数与 NaN 记为 0）
    pub fn with_token_cost(payload: Message, token_cost: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            created_at: now_millis(),
            token_cost: clamp_cost(token_cost),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &Message {
        &self.payload
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn token_cost(&self) -> f64 {
        self.token_cost
    }
}

impl From<Message> for MemoryMessage {
    fn from(payload: Message) -> Self {
        Self::new(payload)
    }
}

pub(crate) fn clamp_cost(cost: f64) -> f64 {
    if cost.is_nan() { 0.0 } else { cost.max(0.0) }
}

// ── MemoryChunk ───────────────────────────────────────────────────────────────

/// 压缩后的长期记忆单元
///
/// 除 `last_access_at` 外不可变；`last_access_at` 只能通过 [`MemoryChunk::touch`] 前移。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryChunk {
    id: String,
    title: String,
    summary: String,
    tags: BTreeSet<String>,
    importance: ImportanceScore,
    created_at: u64,
    last_access_at: u64,
    session_id: String,
    knowledge_id: String,
    agent_id: String,
}

impl MemoryChunk {
    pub fn builder(title: impl Into<String>, summary: impl Into<String>) -> MemoryChunkBuilder {
        MemoryChunkBuilder {
            id: None,
            title: title.into(),
            summary: summary.into(),
            tags: BTreeSet::new(),
            importance: ImportanceScore::new(0.5),
            created_at: None,
            session_id: String::new(),
            knowledge_id: DEFAULT_KNOWLEDGE_ID.to_string(),
            agent_id: String::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn importance(&self) -> ImportanceScore {
        self.importance
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn last_access_at(&self) -> u64 {
        self.last_access_at
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn knowledge_id(&self) -> &str {
        &self.knowledge_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// 记录一次成功检索，时间只会前移
    pub fn touch(&mut self, at_millis: u64) {
        self.last_access_at = self.last_access_at.max(at_millis);
    }

    /// 用于 embedding 的文本
    pub fn embedding_text(&self) -> String {
        let tags = self.tags.iter().cloned().collect::<Vec<_>>().join(" ");
        format!("{}\n{}\n{}", self.title, self.summary, tags)
    }
}

/// `MemoryChunk` 的构建器
pub struct MemoryChunkBuilder {
    id: Option<String>,
    title: String,
    summary: String,
    tags: BTreeSet<String>,
    importance: ImportanceScore,
    created_at: Option<u64>,
    session_id: String,
    knowledge_id: String,
    agent_id: String,
}

impl MemoryChunkBuilder {
    /// 指定 ID（默认生成 UUID v4）
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn importance(mut self, importance: ImportanceScore) -> Self {
        self.importance = importance;
        self
    }

    /// 创建时间（Unix 毫秒），同时作为初始的最后访问时间
    pub fn created_at(mut self, at_millis: u64) -> Self {
        self.created_at = Some(at_millis);
        self
    }

    /// 继承命名空间的 agent / session / knowledge 标识
    pub fn scoped_to(mut self, key: &NamespaceKey) -> Self {
        self.session_id = key.session_id().to_string();
        self.knowledge_id = key.knowledge_id().to_string();
        self.agent_id = key.agent_id().to_string();
        self
    }

    pub fn build(self) -> MemoryChunk {
        let created_at = self.created_at.unwrap_or_else(now_millis);
        MemoryChunk {
            id: self
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            title: self.title,
            summary: self.summary,
            tags: self.tags,
            importance: self.importance,
            created_at,
            last_access_at: created_at,
            session_id: self.session_id,
            knowledge_id: self.knowledge_id,
            agent_id: self.agent_id,
        }
    }
}

// ── ChunkScope ────────────────────────────────────────────────────────────────

/// 长期记忆的筛选范围，未设置的维度不参与过滤
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkScope {
    pub knowledge_id: Option<String>,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
}

impl ChunkScope {
    /// 匹配所有 chunk
    pub fn all() -> Self {
        Self::default()
    }

    pub fn knowledge(mut self, knowledge_id: impl Into<String>) -> Self {
        self.knowledge_id = Some(knowledge_id.into());
        self
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn matches(&self, chunk: &MemoryChunk) -> bool {
        fn eq(want: &Option<String>, have: &str) -> bool {
            want.as_deref().is_none_or(|w| w == have)
        }
        eq(&self.knowledge_id, chunk.knowledge_id())
            && eq(&self.agent_id, chunk.agent_id())
            && eq(&self.session_id, chunk.session_id())
    }
}

impl From<&NamespaceKey> for ChunkScope {
    fn from(key: &NamespaceKey) -> Self {
        ChunkScope::all()
            .knowledge(key.knowledge_id())
            .agent(key.agent_id())
            .session(key.session_id())
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_key_value_equality() {
        let a = NamespaceKey::new("agent", "s1");
        let b = NamespaceKey::new("agent", "s1");
        let c = NamespaceKey::new("agent", "s1").with_knowledge("kb");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.knowledge_id(), DEFAULT_KNOWLEDGE_ID);
        assert_eq!(c.to_string(), "agent/s1@kb");
    }

    #[test]
    fn test_importance_is_clamped() {
        assert_eq!(ImportanceScore::new(1.7).value(), 1.0);
        assert_eq!(ImportanceScore::new(-0.2).value(), 0.0);
        assert_eq!(ImportanceScore::new(f64::NAN).value(), 0.0);
        let parsed: ImportanceScore = serde_json::from_str("3.0").unwrap();
        assert_eq!(parsed, ImportanceScore::MAX);
    }

    #[test]
    fn test_message_cost_is_non_negative() {
        let msg = MemoryMessage::with_token_cost(Message::user("hi".to_string()), -4.0);
        assert_eq!(msg.token_cost(), 0.0);
        let nan = MemoryMessage::with_token_cost(Message::user("hi".to_string()), f64::NAN);
        assert_eq!(nan.token_cost(), 0.0);
        let estimated = MemoryMessage::new(Message::user("12345678".to_string()));
        assert_eq!(estimated.token_cost(), 3.0);
    }

    #[test]
    fn test_chunk_touch_only_moves_forward() {
        let key = NamespaceKey::new("a", "s").with_knowledge("k");
        let mut chunk = MemoryChunk::builder("t", "body")
            .scoped_to(&key)
            .created_at(1_000)
            .tags(["rust", "memory"])
            .build();
        assert_eq!(chunk.last_access_at(), 1_000);
        chunk.touch(5_000);
        assert_eq!(chunk.last_access_at(), 5_000);
        chunk.touch(2_000);
        assert_eq!(chunk.last_access_at(), 5_000);
        assert_eq!(chunk.created_at(), 1_000);
        assert_eq!(chunk.knowledge_id(), "k");
        assert_eq!(chunk.tags().len(), 2);
    }

    #[test]
    fn test_scope_matching() {
        let key = NamespaceKey::new("a", "s").with_knowledge("k");
        let chunk = MemoryChunk::builder("t", "b").scoped_to(&key).build();
        assert!(ChunkScope::all().matches(&chunk));
        assert!(ChunkScope::all().knowledge("k").agent("a").matches(&chunk));
        assert!(!ChunkScope::all().agent("other").matches(&chunk));
        assert!(ChunkScope::from(&key).matches(&chunk));
    }
}
