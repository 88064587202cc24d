//! 摘要模型替身：按脚本回复 [`LlmClient`] 调用，并保留每次收到的提示词。
//!
//! 主要服务于 [`LlmSummarizer`](crate::compression::summarizer::LlmSummarizer)：
//! [`with_drafts_reply`](MockLlmClient::with_drafts_reply) 直接生成摘要模型应有的
//! JSON 输出，错误脚本用于验证压缩被放弃、缓冲区保持不变。
//!
//! ```rust
//! use echo_memory::compression::summarizer::{DefaultSummaryPrompt, LlmSummarizer, Summarizer};
//! use echo_memory::compression::SummaryDraft;
//! use echo_memory::llm::types::Message;
//! use echo_memory::memory::types::MemoryMessage;
//! use echo_memory::testing::MockLlmClient;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let model = Arc::new(
//!     MockLlmClient::new().with_drafts_reply(&[SummaryDraft::new("偏好", "用户喜欢深色主题")]),
//! );
//! let summarizer = LlmSummarizer::new(model.clone(), DefaultSummaryPrompt);
//! let window = vec![MemoryMessage::new(Message::user("换成深色主题".to_string()))];
//! let drafts = summarizer.summarize(&window).await.unwrap();
//! assert_eq!(drafts[0].title, "偏好");
//! assert!(model.prompts()[0].contains("换成深色主题"));
//! # }
//! ```

use crate::compression::summarizer::SummaryDraft;
use crate::error::{CapabilityError, MemoryError, Result};
use crate::llm::LlmClient;
use crate::llm::types::Message;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;

enum ScriptedReply {
    Text(String),
    Fail(MemoryError),
}

/// 脚本耗尽后返回 [`CapabilityError::EmptyResponse`]
#[derive(Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<ScriptedReply>>,
    received: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.push(ScriptedReply::Text(text.into()))
    }

    pub fn with_responses(self, texts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        texts
            .into_iter()
            .fold(self, |mock, text| mock.with_response(text))
    }

    /// 以摘要模型的输出格式（```json 围栏中的数组）回复给定摘要
    pub fn with_drafts_reply(self, drafts: &[SummaryDraft]) -> Self {
        let items: Vec<serde_json::Value> = drafts
            .iter()
            .map(|d| {
                json!({
                    "title": d.title,
                    "summary": d.body,
                    "tags": d.tags,
                    "importance": d.importance.map(|i| i.value()),
                })
            })
            .collect();
        let body = serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string());
        self.with_response(format!("```json\n{body}\n```"))
    }

    pub fn with_error(self, err: impl Into<MemoryError>) -> Self {
        self.push(ScriptedReply::Fail(err.into()))
    }

    pub fn with_network_error(self, msg: impl Into<String>) -> Self {
        self.with_error(CapabilityError::NetworkError(msg.into()))
    }

    pub fn call_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn last_messages(&self) -> Option<Vec<Message>> {
        self.received.lock().unwrap().last().cloned()
    }

    /// 每次调用中首条消息的文本（即摘要提示词），按调用顺序
    pub fn prompts(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter_map(|messages| messages.first()?.content.clone())
            .collect()
    }

    fn push(self, reply: ScriptedReply) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat_simple(&self, messages: Vec<Message>) -> Result<String> {
        self.received.lock().unwrap().push(messages);
        let reply = self.script.lock().unwrap().pop_front();
        match reply {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(e)) => Err(e),
            None => Err(CapabilityError::EmptyResponse.into()),
        }
    }
}
