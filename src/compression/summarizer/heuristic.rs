use crate::compression::summarizer::{Summarizer, SummaryDraft};
use crate::error::Result;
use crate::memory::embedding::tokenize;
use crate::memory::types::MemoryMessage;
use async_trait::async_trait;
use std::collections::HashMap;

/// 不调用模型的摘要器：标题取首条用户消息，正文为截断后的对话记录，
/// 标签取出现频率最高的关键词。重要度留空，由压缩器估算。
pub struct HeuristicSummarizer {
    max_body_chars: usize,
    max_tags: usize,
}

impl Default for HeuristicSummarizer {
    fn default() -> Self {
        Self::new(2000, 3)
    }
}

impl HeuristicSummarizer {
    pub fn new(max_body_chars: usize, max_tags: usize) -> Self {
        Self {
            max_body_chars,
            max_tags,
        }
    }

    fn keywords(&self, messages: &[MemoryMessage]) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for content in messages.iter().filter_map(|m| m.payload().content.as_deref()) {
            for token in tokenize(content) {
                *counts.entry(token).or_default() += 1;
            }
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(self.max_tags)
            .map(|(word, _)| word)
            .collect()
    }
}

#[async_trait]
impl Summarizer for HeuristicSummarizer {
    async fn summarize(&self, messages: &[MemoryMessage]) -> Result<Vec<SummaryDraft>> {
        let lines: Vec<String> = messages
            .iter()
            .filter_map(|m| m.payload().transcript_line())
            .collect();
        if lines.is_empty() {
            return Ok(vec![SummaryDraft::new(
                "无文本消息",
                format!("[{} 条无文本消息]", messages.len()),
            )]);
        }

        let title: String = messages
            .iter()
            .find(|m| m.payload().role == "user")
            .and_then(|m| m.payload().content.as_deref())
            .unwrap_or(lines[0].as_str())
            .chars()
            .take(40)
            .collect();

        let mut body: String = lines.join("\n");
        if body.chars().count() > self.max_body_chars {
            body = body.chars().take(self.max_body_chars).collect::<String>() + "…";
        }

        Ok(vec![
            SummaryDraft::new(title, body).with_tags(self.keywords(messages)),
        ])
    }
}
