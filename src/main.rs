//! echo_memory 演示：用脚本化的对话驱动记忆系统
//!
//! 压缩、持久化、遗忘事件实时打印；对话结束后检索长期记忆并执行一次遗忘扫描。
//!
//! ```text
//! cargo run -- --turns 12 --window 200 --query "深色主题"
//! RUST_LOG=echo_memory=debug cargo run -- --config memory.yaml
//! ```

use clap::Parser;
use echo_memory::config::MemoryConfig;
use echo_memory::events::{FnHandler, MemoryEvent, MemoryEventKind};
use echo_memory::llm::types::Message;
use echo_memory::memory::{
    ChunkScope, HashEmbedding, InMemoryLongTermStore, MemoryManager, NamespaceKey,
};
use echo_memory::prelude::HeuristicSummarizer;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEMO_EMBEDDING_DIMS: usize = 256;

const SCRIPT: &[(&str, &str)] = &[
    ("我想学习 Rust，有什么建议？", "建议从 The Book 开始，重点理解所有权和借用。"),
    ("编辑器我更喜欢深色主题。", "好的，已记住你偏好深色主题，推荐 VS Code 搭配 rust-analyzer。"),
    ("所有权规则是什么？", "每个值只有一个所有者，所有者离开作用域时值被释放。"),
    ("借用和引用有什么区别？", "引用是借用的语法形式：&T 可以有多个，&mut T 同时只能有一个。"),
    ("下周三之前要完成 CLI 小项目。", "好的，建议先用 clap 搭出参数解析，再补业务逻辑。"),
    ("生命周期标注什么时候需要写？", "当编译器无法推断引用之间的关系时，需要显式标注。"),
];

#[derive(Parser, Debug)]
#[command(name = "echo_memory", about = "对话记忆压缩 / 遗忘演示")]
struct Cli {
    /// YAML 配置文件，缺省时使用默认值 + ECHO_MEMORY_* 环境变量
    #[arg(long)]
    config: Option<String>,

    /// 对话轮数（脚本循环使用）
    #[arg(long, default_value_t = 12)]
    turns: usize,

    /// 覆盖 token 窗口，便于观察压缩
    #[arg(long, default_value_t = 200)]
    window: usize,

    /// 对话结束后的检索语句
    #[arg(long, default_value = "深色主题 编辑器")]
    query: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => MemoryConfig::load(path)?,
        None => MemoryConfig::from_env()?,
    };
    config.default_window_tokens = cli.window;
    // 演示只带离线的 hash 向量，配置里的模型 ID 直接映射到它
    let model_id = config
        .embedding_model_id
        .get_or_insert_with(|| format!("hash-{}", DEMO_EMBEDDING_DIMS))
        .clone();
    let embedder = HashEmbedding::new(DEMO_EMBEDDING_DIMS).with_model_id(model_id);
    let store = Arc::new(InMemoryLongTermStore::new().with_embedder(Arc::new(embedder)));
    let manager = MemoryManager::builder(config)
        .summarizer(Arc::new(HeuristicSummarizer::default()))
        .store(store.clone())
        .build()?;

    manager.events().subscribe_all(
        &[
            MemoryEventKind::Compressed,
            MemoryEventKind::Persisted,
            MemoryEventKind::Forgotten,
            MemoryEventKind::PersistFailed,
            MemoryEventKind::ForgetFailed,
        ],
        Arc::new(FnHandler(|event: &MemoryEvent| match event {
            MemoryEvent::Compressed(e) => println!(
                "🗜️  压缩 {} 条消息 → {} 条记忆，{}",
                e.messages_consumed,
                e.chunks.len(),
                e.compression_ratio
            ),
            MemoryEvent::Persisted(e) => println!("💾 已保存 {}", e.chunk_id),
            MemoryEvent::Forgotten(e) => {
                println!("🧹 遗忘 {}（重要度 {}）", e.chunk_id, e.importance)
            }
            MemoryEvent::PersistFailed(e) => {
                println!("❌ 保存失败（{} 次尝试）：{}", e.attempts, e.error)
            }
            MemoryEvent::ForgetFailed(e) => println!("❌ 遗忘失败 {}：{}", e.chunk_id, e.error),
        })),
    );
    manager.spawn_maintenance();

    let key = NamespaceKey::new("demo_agent", "demo-session-1");
    for (user, assistant) in SCRIPT.iter().cycle().take(cli.turns) {
        manager
            .append_message(&key, Message::user(user.to_string()))
            .await?;
        manager
            .append_message(&key, Message::assistant(assistant.to_string()))
            .await?;
    }
    manager.events().drain().await;

    println!(
        "\n📋 缓冲区剩余 {} 条消息，约 {:.0} tokens",
        manager.snapshot(&key).await.len(),
        manager.token_total(&key).await.unwrap_or_default()
    );

    let hits = manager
        .search(key.knowledge_id(), key.agent_id(), &cli.query, None)
        .await?;
    println!("\n🔍 检索「{}」命中 {} 条：", cli.query, hits.len());
    for chunk in &hits {
        println!("  - [{}] {}", chunk.importance(), chunk.title());
    }

    let forgotten = manager
        .run_forgetting_sweep(&ChunkScope::from(&key))
        .await?;
    println!(
        "\n🧹 遗忘扫描：删除 {} 条，剩余 {} 条",
        forgotten.len(),
        store.len().await
    );

    manager.shutdown().await;
    Ok(())
}
