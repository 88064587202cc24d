pub mod compression;
pub mod config;
pub mod error;
pub mod events;
pub mod forgetting;
pub mod llm;
pub mod memory;
pub mod testing;

pub mod prelude {
    pub use crate::compression::summarizer::{
        DefaultSummaryPrompt, FnSummaryPrompt, HeuristicSummarizer, LlmSummarizer, Summarizer,
        SummaryDraft,
    };
    pub use crate::compression::{CompressionOutcome, Compressor};
    pub use crate::config::{CompressionMode, MemoryConfig};
    pub use crate::error::{MemoryError, Result};
    pub use crate::events::{EventBus, FnHandler, MemoryEvent, MemoryEventHandler, MemoryEventKind};
    pub use crate::llm::LlmClient;
    pub use crate::llm::types::Message;
    pub use crate::memory::{
        ChunkScope, FileLongTermStore, HashEmbedding, ImportanceScore, InMemoryLongTermStore,
        LongTermMemoryPort, MemoryChunk, MemoryManager, MemoryMessage, NamespaceKey,
    };
}
