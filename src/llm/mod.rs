pub mod types;

use crate::error::Result;
use crate::llm::types::Message;
use async_trait::async_trait;

/// 摘要器使用的轻量模型调用接口
///
/// 具体的模型实例（HTTP 客户端、本地模型等）由外部的 provider 层提供，
/// 记忆系统只依赖这一个方法。
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 发起一次简单的无工具对话，返回模型的文本内容
    async fn chat_simple(&self, messages: Vec<Message>) -> Result<String>;
}
