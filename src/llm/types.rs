//! 对话消息类型
//!
//! 记忆系统只关心角色与文本内容，其余字段由调用方自行携带在 `name` 中或忽略。

use serde::{Deserialize, Serialize};

/// 单条对话消息，作为 [`MemoryMessage`](crate::memory::MemoryMessage) 的载荷
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Message {
    /// 角色：`user` / `assistant` / `system` / `tool`
    pub role: String,
    /// 文本内容（工具调用消息可能为 None）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// 发言者名称（如工具名）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn with_role(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            name: None,
        }
    }

    pub fn system(content: String) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: String) -> Self {
        Self::with_role("user", content)
    }

    pub fn assistant(content: String) -> Self {
        Self::with_role("assistant", content)
    }

    pub fn tool(name: String, content: String) -> Self {
        Self {
            name: Some(name),
            ..Self::with_role("tool", content)
        }
    }

    /// 粗略估算 token 数（字符数 / 4 + 1），无内容时为 0
    pub fn estimate_tokens(&self) -> f64 {
        self.content
            .as_ref()
            .map(|c| (c.chars().count() / 4 + 1) as f64)
            .unwrap_or(0.0)
    }

    /// `[role]: content` 形式的单行文本，用于拼接摘要输入
    pub fn transcript_line(&self) -> Option<String> {
        self.content
            .as_ref()
            .map(|c| format!("[{}]: {}", self.role, c))
    }
}
