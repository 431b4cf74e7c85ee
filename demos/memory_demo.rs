//! Drive the memory engine end to end without a network.
//!
//! Usage:
//!   cargo run --example memory_demo
//!   cargo run --example memory_demo -- --turns 40 --threshold 800
//!   ALOOP_HOME=/tmp/aloop-demo cargo run --example memory_demo
//!
//! A scripted adapter stands in for the LLM, so compression and long-term
//! consolidation fire deterministically. Watch the event stream to see the
//! engine work.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;

use aloop_memory::{
    CompletionRequest, CompletionResponse, LlmAdapter, LlmError, MemoryCategory, MemoryConfig,
    MemoryEvent, MemoryManager, Message, TokenCounts,
};

#[derive(Parser)]
#[command(name = "memory_demo", about = "Exercise the aloop memory engine")]
struct Cli {
    /// Runtime root (defaults to ALOOP_HOME or ~/.aloop)
    #[arg(long)]
    aloop_home: Option<std::path::PathBuf>,

    /// Conversation turns to simulate
    #[arg(long, default_value_t = 30)]
    turns: usize,

    /// Hard compression threshold in tokens
    #[arg(long, default_value_t = 1_000)]
    threshold: u64,
}

/// Stands in for the real adapter: every summarization request gets a short
/// canned summary back.
struct ScriptedLlm;

#[async_trait]
impl LlmAdapter for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt_len: usize = request.messages.iter().map(|m| m.content_str().len()).sum();
        Ok(CompletionResponse {
            content: format!("Condensed recap of the work so far ({prompt_len} prompt bytes)."),
            usage: TokenCounts::new((prompt_len / 4) as u64, 24),
        })
    }

    fn model(&self) -> &str {
        "demo-model"
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = MemoryConfig::from_env();
    config.compression_threshold = cli.threshold;
    if let Some(home) = cli.aloop_home {
        config.runtime_dir = home;
    }

    eprintln!("runtime dir: {}", config.runtime_dir.display());
    eprintln!("hard threshold: {} tokens", config.compression_threshold);
    eprintln!("---");

    let mut manager = MemoryManager::new(Arc::new(ScriptedLlm), config);
    manager.set_todo_context_provider(|| Some("- [ ] finish the demo run".into()));

    let (tx, mut rx) = tokio::sync::mpsc::channel::<MemoryEvent>(64);
    manager.set_event_sink(tx);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                MemoryEvent::CompressionStarted { urgency, message_count } => {
                    eprintln!("  [compressing {message_count} messages, urgency {urgency}]");
                }
                MemoryEvent::CompressionFinished { tokens_saved } => {
                    eprintln!("  [compression saved {tokens_saved} tokens]");
                }
                MemoryEvent::SessionSaved { session_id } => {
                    eprintln!("  [session {session_id} saved]");
                }
            }
        }
    });

    manager
        .add_message(Message::system("You are a terse coding assistant."), None)
        .await
        .expect("system message");

    for turn in 0..cli.turns {
        manager
            .add_message(
                Message::user(format!(
                    "Turn {turn}: please refactor module number {turn} and explain the tradeoffs \
                     in a couple of sentences so the log has some weight to it."
                )),
                None,
            )
            .await
            .expect("user message");

        let reply = Message::assistant(format!(
            "Refactored module {turn}: extracted the inner loop, renamed the builder, and \
             tightened the error paths. Nothing else changed behaviorally."
        ));
        let usage = TokenCounts::new(manager.current_tokens(), 40);
        manager.add_message(reply, Some(usage)).await.expect("assistant message");
    }

    manager.save_memory().await.expect("save session");

    let stats = manager.stats();
    eprintln!("---");
    eprintln!("messages in buffer: {}", manager.message_count());
    eprintln!("context tokens: {}", manager.current_tokens());
    eprintln!(
        "usage: {} in / {} out, {} compressions, {} tokens saved (net {})",
        stats.total_input_tokens,
        stats.total_output_tokens,
        stats.compression_count,
        stats.compression_savings,
        stats.net_savings(),
    );

    for session in manager.list_sessions(5).await.expect("list sessions") {
        eprintln!(
            "session {} — {} messages, {} summaries, updated {}",
            session.session_id, session.message_count, session.summary_count, session.updated_at
        );
    }

    if let Some(long_term) = manager.long_term() {
        long_term
            .remember("demo runs use a scripted adapter", MemoryCategory::Facts)
            .await
            .expect("remember");
        let hits = long_term
            .recall("scripted adapter", None, 3)
            .await
            .expect("recall");
        for hit in hits {
            eprintln!("recall [{}] {:.1}: {}", hit.category, hit.score, hit.content);
        }
    }

    drop(manager);
    printer.await.ok();
    eprintln!("done.");
}
