use crate::compression::summarizer::{Summarizer, SummaryDraft};
use crate::error::{CapabilityError, Result};
use crate::llm::LlmClient;
use crate::llm::types::Message;
use crate::memory::types::{ImportanceScore, MemoryMessage};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const SUMMARY_PROMPT: &str = "你的任务是把下面这段对话压缩为可长期保存的记忆条目。

要求：
1. 每个条目聚焦一个主题：用户的明确请求、做出的决定、关键事实、尚未完成的事项
2. 保留人名、数字、技术名词等具体细节，删去寒暄和重复内容
3. 为每个条目给出 1-5 个标签，便于以后检索
4. 为每个条目评估重要度（0.0-1.0）：长期有效的偏好和决定更高，一次性的闲聊更低

只输出 JSON 数组，不要输出其他内容，格式如下：
[
  {\"title\": \"简短标题\", \"summary\": \"完整摘要\", \"tags\": [\"标签\"], \"importance\": 0.7}
]
";

/// 摘要提示词构建接口，支持用户自定义摘要策略
pub trait SummaryPromptBuilder: Send + Sync {
    fn build(&self, messages: &[MemoryMessage]) -> String;
}

/// 默认摘要提示词：要求模型输出 JSON 数组形式的记忆条目
pub struct DefaultSummaryPrompt;

impl SummaryPromptBuilder for DefaultSummaryPrompt {
    fn build(&self, messages: &[MemoryMessage]) -> String {
        let history = messages
            .iter()
            .filter_map(|m| m.payload().transcript_line())
            .collect::<Vec<_>>()
            .join("\n");

        format!("{}\n对话内容：\n{}\n", SUMMARY_PROMPT, history)
    }
}

/// 用闭包自定义提示词的便捷包装
///
/// # 示例
///
/// ```rust
/// use echo_memory::compression::summarizer::FnSummaryPrompt;
///
/// let prompt = FnSummaryPrompt(|msgs: &[echo_memory::memory::MemoryMessage]| {
///     format!("用一段话总结以下 {} 条对话", msgs.len())
/// });
/// ```
pub struct FnSummaryPrompt<F>(pub F)
where
    F: Fn(&[MemoryMessage]) -> String + Send + Sync;

impl<F> SummaryPromptBuilder for FnSummaryPrompt<F>
where
    F: Fn(&[MemoryMessage]) -> String + Send + Sync,
{
    fn build(&self, messages: &[MemoryMessage]) -> String {
        (self.0)(messages)
    }
}

// ──────────────────────────────────────────────
// LlmSummarizer
// ──────────────────────────────────────────────

/// 用 LLM 生成摘要
///
/// 期望模型输出 JSON 数组（允许包裹在 ```json 代码块中）；
/// 输出不是 JSON 时，整段文本作为一条摘要。
pub struct LlmSummarizer<P: SummaryPromptBuilder> {
    llm: Arc<dyn LlmClient>,
    prompt_builder: P,
}

impl<P: SummaryPromptBuilder> LlmSummarizer<P> {
    pub fn new(llm: Arc<dyn LlmClient>, prompt_builder: P) -> Self {
        Self {
            llm,
            prompt_builder,
        }
    }
}

#[async_trait]
impl<P: SummaryPromptBuilder + 'static> Summarizer for LlmSummarizer<P> {
    async fn summarize(&self, messages: &[MemoryMessage]) -> Result<Vec<SummaryDraft>> {
        let prompt = self.prompt_builder.build(messages);
        let raw = self.llm.chat_simple(vec![Message::user(prompt)]).await?;
        let drafts = parse_drafts(&raw)?;
        debug!(messages = messages.len(), drafts = drafts.len(), "📝 LLM 摘要完成");
        Ok(drafts)
    }
}

#[derive(Deserialize)]
struct WireDraft {
    #[serde(default)]
    title: String,
    #[serde(default, alias = "body", alias = "content")]
    summary: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    importance: Option<f64>,
}

impl WireDraft {
    fn into_draft(self) -> Option<SummaryDraft> {
        let body = self.summary.trim().to_string();
        if body.is_empty() {
            return None;
        }
        let title = match self.title.trim() {
            "" => first_line(&body),
            t => t.to_string(),
        };
        Some(SummaryDraft {
            title,
            body,
            tags: self.tags,
            importance: self.importance.map(normalize_importance),
        })
    }
}

fn parse_drafts(raw: &str) -> Result<Vec<SummaryDraft>> {
    let text = strip_code_fence(raw.trim());
    if text.is_empty() {
        return Err(CapabilityError::EmptyResponse.into());
    }

    if let Ok(list) = serde_json::from_str::<Vec<WireDraft>>(text) {
        let drafts: Vec<SummaryDraft> = list.into_iter().filter_map(WireDraft::into_draft).collect();
        if drafts.is_empty() {
            return Err(CapabilityError::EmptySummary.into());
        }
        return Ok(drafts);
    }
    if let Ok(one) = serde_json::from_str::<WireDraft>(text) {
        return one
            .into_draft()
            .map(|d| vec![d])
            .ok_or_else(|| CapabilityError::EmptySummary.into());
    }

    Ok(vec![SummaryDraft::new(first_line(text), text)])
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// 兼容 1-10 分制的输出
fn normalize_importance(value: f64) -> ImportanceScore {
    if value > 1.0 {
        ImportanceScore::new(value / 10.0)
    } else {
        ImportanceScore::new(value)
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
        .chars()
        .take(40)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;
    use crate::testing::MockLlmClient;

    fn history() -> Vec<MemoryMessage> {
        vec![
            MemoryMessage::new(Message::user("我想学习 Rust 语言".to_string())),
            MemoryMessage::new(Message::assistant(
                "建议从官方 The Book 开始，先理解所有权。".to_string(),
            )),
        ]
    }

    #[tokio::test]
    async fn test_parses_json_array() {
        let mock = Arc::new(MockLlmClient::new().with_response(
            r#"```json
[
  {"title": "学习 Rust", "summary": "用户想学 Rust，建议读 The Book", "tags": ["rust"], "importance": 0.8},
  {"title": "", "summary": "所有权是重点", "importance": 7}
]
```"#,
        ));
        let summarizer = LlmSummarizer::new(mock.clone(), DefaultSummaryPrompt);
        let drafts = summarizer.summarize(&history()).await.unwrap();

        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].title, "学习 Rust");
        assert_eq!(drafts[0].tags, vec!["rust".to_string()]);
        assert_eq!(drafts[0].importance, Some(ImportanceScore::new(0.8)));
        assert_eq!(drafts[1].title, "所有权是重点");
        assert_eq!(drafts[1].importance, Some(ImportanceScore::new(0.7)));

        assert_eq!(mock.call_count(), 1);
        let prompt = mock.last_messages().unwrap()[0].content.clone().unwrap();
        assert!(prompt.contains("[user]: 我想学习 Rust 语言"));
    }

    #[tokio::test]
    async fn test_free_text_falls_back_to_single_draft() {
        let mock = Arc::new(MockLlmClient::new().with_response("用户在学习 Rust\n重点是所有权"));
        let summarizer = LlmSummarizer::new(mock, DefaultSummaryPrompt);
        let drafts = summarizer.summarize(&history()).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].title, "用户在学习 Rust");
        assert!(drafts[0].importance.is_none());
    }

    #[tokio::test]
    async fn test_model_errors_propagate() {
        let mock = Arc::new(MockLlmClient::new().with_network_error("timeout"));
        let summarizer = LlmSummarizer::new(mock, DefaultSummaryPrompt);
        let err = summarizer.summarize(&history()).await.unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Capability(CapabilityError::NetworkError(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_and_empty_outputs_are_errors() {
        let mock = Arc::new(MockLlmClient::new().with_responses(["   ", "[]"]));
        let summarizer = LlmSummarizer::new(mock, DefaultSummaryPrompt);
        assert!(matches!(
            summarizer.summarize(&history()).await,
            Err(MemoryError::Capability(CapabilityError::EmptyResponse))
        ));
        assert!(matches!(
            summarizer.summarize(&history()).await,
            Err(MemoryError::Capability(CapabilityError::EmptySummary))
        ));
    }

    #[tokio::test]
    async fn test_custom_prompt_builder() {
        let mock = Arc::new(MockLlmClient::new().with_response("摘要"));
        let summarizer = LlmSummarizer::new(
            mock.clone(),
            FnSummaryPrompt(|msgs: &[MemoryMessage]| format!("总结 {} 条", msgs.len())),
        );
        summarizer.summarize(&history()).await.unwrap();
        let prompt = mock.last_messages().unwrap()[0].content.clone().unwrap();
        assert_eq!(prompt, "总结 2 条");
    }

    #[tokio::test]
    async fn test_failed_window_then_scripted_drafts() {
        let expected = vec![
            SummaryDraft::new("学习 Rust", "用户从 The Book 开始")
                .with_tags(["rust", "学习"])
                .with_importance(0.6),
            SummaryDraft::new("所有权", "先理解所有权"),
        ];
        let mock = Arc::new(
            MockLlmClient::new()
                .with_network_error("connection reset")
                .with_drafts_reply(&expected),
        );
        let summarizer = LlmSummarizer::new(mock.clone(), DefaultSummaryPrompt);

        assert!(summarizer.summarize(&history()).await.is_err());
        let drafts = summarizer.summarize(&history()).await.unwrap();
        assert_eq!(drafts, expected);

        let prompts = mock.prompts();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0], prompts[1]);
        // 脚本耗尽
        assert!(matches!(
            summarizer.summarize(&history()).await,
            Err(MemoryError::Capability(CapabilityError::EmptyResponse))
        ));
    }
}
