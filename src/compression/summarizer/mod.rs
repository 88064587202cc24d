pub mod heuristic;
pub mod llm;

pub use heuristic::HeuristicSummarizer;
pub use llm::{DefaultSummaryPrompt, FnSummaryPrompt, LlmSummarizer, SummaryPromptBuilder};

use crate::error::Result;
use crate::memory::types::{ImportanceScore, MemoryMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 摘要能力的单条输出，压缩器将其包装为 `MemoryChunk`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryDraft {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 未给出时由压缩器按默认规则估算
    #[serde(default)]
    pub importance: Option<ImportanceScore>,
}

impl SummaryDraft {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            tags: Vec::new(),
            importance: None,
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(ImportanceScore::new(importance));
        self
    }
}

/// 将一段消息压缩为一条或多条结构化摘要（外部模型层实现）
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[MemoryMessage]) -> Result<Vec<SummaryDraft>>;
}
