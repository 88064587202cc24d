//! 测试基础设施
//!
//! 提供在不依赖真实模型 / 外部存储的情况下测试记忆系统各组件的工具集。
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`MockLlmClient`] | 替代真实 LLM，用于测试 `LlmSummarizer` |
//! | [`MockSummarizer`] | 脚本化摘要输出 / 错误 / 延迟，用于测试压缩流程 |
//! | [`MockLongTermStore`] | 可注入写入 / 删除失败的长期存储 |
//! | [`RecordingHandler`] | 记录收到的事件，用于断言事件序列 |
//!
//! # 设计原则
//!
//! - **零网络请求**：所有 Mock 都完全在内存中运行
//! - **可脚本化**：通过 `with_response()` / `with_error()` 精确控制返回值
//! - **可观测**：通过 `call_count()` / `calls()` 等方法检查调用情况
//!
//! # 使用示例
//!
//! ```rust
//! use echo_memory::testing::{MockSummarizer, RecordingHandler};
//! use echo_memory::compression::summarizer::Summarizer;
//! use echo_memory::error::CapabilityError;
//! use echo_memory::llm::types::Message;
//! use echo_memory::memory::types::MemoryMessage;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let summarizer = MockSummarizer::new()
//!     .with_error(CapabilityError::NetworkError("timeout".to_string()));
//!
//! let window = vec![MemoryMessage::new(Message::user("你好".to_string()))];
//! assert!(summarizer.summarize(&window).await.is_err());
//! assert!(summarizer.summarize(&window).await.is_ok());
//! assert_eq!(summarizer.call_count(), 2);
//! # }
//! ```

mod mock_llm;
mod mock_store;
mod mock_summarizer;
mod recording_handler;

pub use mock_llm::MockLlmClient;
pub use mock_store::MockLongTermStore;
pub use mock_summarizer::MockSummarizer;
pub use recording_handler::RecordingHandler;
