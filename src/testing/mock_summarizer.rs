//! Mock 摘要器，按脚本返回摘要或错误，并记录每次收到的消息窗口。
//!
//! 脚本耗尽后，每次调用返回一条默认摘要（标题带调用序号，正文为对话记录）。

use crate::compression::summarizer::{Summarizer, SummaryDraft};
use crate::error::{MemoryError, Result};
use crate::memory::types::MemoryMessage;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum MockSummaryResponse {
    Drafts(Vec<SummaryDraft>),
    Err(MemoryError),
}

pub struct MockSummarizer {
    responses: Arc<Mutex<VecDeque<MockSummaryResponse>>>,
    calls: Arc<Mutex<Vec<Vec<MemoryMessage>>>>,
    /// 模拟慢速模型
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Default for MockSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSummarizer {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 追加一次调用的输出（可以为空，用于测试空摘要）
    pub fn with_drafts(self, drafts: Vec<SummaryDraft>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(MockSummaryResponse::Drafts(drafts));
        self
    }

    pub fn with_error(self, err: impl Into<MemoryError>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(MockSummaryResponse::Err(err.into()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// 同时进行中的调用数峰值
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// 所有调用收到的消息窗口（按时序排列）
    pub fn calls(&self) -> Vec<Vec<MemoryMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, messages: &[MemoryMessage]) -> Result<Vec<SummaryDraft>> {
        let seq = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(messages.to_vec());
            calls.len()
        };
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.responses.lock().unwrap().pop_front();
        match scripted {
            Some(MockSummaryResponse::Drafts(drafts)) => Ok(drafts),
            Some(MockSummaryResponse::Err(e)) => Err(e),
            None => {
                let body = messages
                    .iter()
                    .filter_map(|m| m.payload().transcript_line())
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(vec![SummaryDraft::new(format!("摘要 #{}", seq), body)])
            }
        }
    }
}
