use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounting::TokenAccountant;
use crate::compressor::{CompressionResult, Compressor};
use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::events::MemoryEvent;
use crate::llm::{LlmAdapter, TokenCounts};
use crate::long_term::LongTermMemory;
use crate::message::{Message, Role};
use crate::policy::{CompressionPolicy, Urgency};
use crate::session::{SessionStore, SessionSummary, UsageStats};
use crate::short_term::ShortTermBuffer;
use crate::tracker::{estimate_conversation_tokens, estimate_message_tokens, TokenTracker};

/// Callback supplying the current to-do state for compression prompts.
pub type TodoContextProvider = Box<dyn Fn() -> Option<String> + Send + Sync>;

/// Central memory coordinator. Owns the working buffer, system messages, and
/// all counters; the session store owns only persisted bytes.
///
/// Every mutating operation takes `&mut self` — one task at a time, which is
/// the crate's whole concurrency model. The splice protocol is still
/// implemented in full, so a compression applied against a stale snapshot
/// keeps any messages appended in between.
pub struct MemoryManager {
    llm: Arc<dyn LlmAdapter>,
    config: MemoryConfig,
    store: SessionStore,
    session_id: Option<Uuid>,
    system_messages: Vec<Message>,
    short_term: ShortTermBuffer,
    tracker: TokenTracker,
    accountant: TokenAccountant,
    policy: CompressionPolicy,
    compressor: Compressor,
    current_tokens: u64,
    compression_count: u32,
    last_compression_savings: u64,
    todo_context_provider: Option<TodoContextProvider>,
    event_sink: Option<mpsc::Sender<MemoryEvent>>,
    long_term: Option<LongTermMemory>,
}

impl MemoryManager {
    pub fn new(llm: Arc<dyn LlmAdapter>, config: MemoryConfig) -> Self {
        let store = SessionStore::new(config.sessions_dir());
        let long_term = config
            .long_term_enabled
            .then(|| LongTermMemory::new(llm.clone(), &config));
        Self {
            store,
            session_id: None,
            system_messages: Vec::new(),
            short_term: ShortTermBuffer::new(config.short_term_size),
            tracker: TokenTracker::new(),
            accountant: TokenAccountant::new(),
            policy: CompressionPolicy::new(&config),
            compressor: Compressor::new(llm.clone()),
            current_tokens: 0,
            compression_count: 0,
            last_compression_savings: 0,
            todo_context_provider: None,
            event_sink: None,
            long_term,
            llm,
            config,
        }
    }

    /// Resume a persisted session. `Ok(None)` when the session doesn't exist
    /// or its file is unreadable.
    pub async fn from_session(
        llm: Arc<dyn LlmAdapter>,
        config: MemoryConfig,
        session_id: Uuid,
    ) -> Result<Option<Self>, MemoryError> {
        let mut manager = Self::new(llm, config);
        let Some(state) = manager.store.load_session(session_id).await? else {
            return Ok(None);
        };

        manager.session_id = Some(session_id);
        manager.system_messages = state.system_messages;
        for message in state.messages {
            manager.short_term.append(message);
        }
        manager.tracker.restore(&state.stats);
        manager.compression_count = state.stats.compression_count;
        manager.current_tokens = manager.recount_tokens();

        info!(
            %session_id,
            messages = manager.short_term.len(),
            tokens = manager.current_tokens,
            "loaded session"
        );
        Ok(Some(manager))
    }

    /// Add a message and let the policy decide whether to compress.
    ///
    /// `actual_tokens` is the API-reported usage for the call that produced
    /// this message; it re-grounds the context size. Without it the message
    /// is estimated locally. A failed compression is logged and retried on
    /// the next urgency check — never an error here.
    pub async fn add_message(
        &mut self,
        message: Message,
        actual_tokens: Option<TokenCounts>,
    ) -> Result<(), MemoryError> {
        if message.role == Role::System {
            self.system_messages.push(message);
            return Ok(());
        }

        self.ensure_session().await?;

        match actual_tokens {
            Some(counts) => {
                self.tracker.add_usage(counts);
                self.accountant.on_api_usage(counts);
            }
            None => {
                self.accountant.on_estimated(estimate_message_tokens(&message));
            }
        }

        self.short_term.append(message);
        self.current_tokens = match self.accountant.grounded() {
            Some(tokens) => tokens,
            None => self.recount_tokens(),
        };
        debug!(
            tokens = self.current_tokens,
            messages = self.short_term.len(),
            cap = self.config.short_term_size,
            "memory state"
        );

        let urgency = self
            .policy
            .urgency(self.current_tokens, self.short_term.is_full());
        if urgency != Urgency::None {
            info!(%urgency, "triggering compression");
            if let Err(e) = self.compress(urgency).await {
                warn!(error = %e, "compression failed, continuing uncompressed");
            }
        }
        Ok(())
    }

    /// The exact context for the next LLM call: system messages followed by
    /// the working buffer, in insertion order.
    pub fn context_for_llm(&self) -> Vec<Message> {
        let mut context =
            Vec::with_capacity(self.system_messages.len() + self.short_term.len());
        context.extend(self.system_messages.iter().cloned());
        context.extend(self.short_term.messages().iter().cloned());
        context
    }

    /// Compress the working buffer at the given urgency. Soft urgency
    /// attempts a partial compression at a tool-pair-safe split; everything
    /// else (or an unsplittable buffer) compresses in full.
    pub async fn compress(
        &mut self,
        urgency: Urgency,
    ) -> Result<Option<CompressionResult>, MemoryError> {
        self.compress_inner(urgency, None).await
    }

    /// As [`compress`](Self::compress), racing the summarizer call against a
    /// cancellation token. Cancelled mid-call, the buffer is left unchanged.
    pub async fn compress_with_cancel(
        &mut self,
        urgency: Urgency,
        cancel: CancellationToken,
    ) -> Result<Option<CompressionResult>, MemoryError> {
        self.compress_inner(urgency, Some(cancel)).await
    }

    async fn compress_inner(
        &mut self,
        urgency: Urgency,
        cancel: Option<CancellationToken>,
    ) -> Result<Option<CompressionResult>, MemoryError> {
        let messages = self.short_term.messages().to_vec();
        if messages.is_empty() {
            warn!("no messages to compress");
            return Ok(None);
        }
        let snapshot_len = messages.len();
        self.emit(MemoryEvent::CompressionStarted {
            urgency,
            message_count: snapshot_len,
        });

        if urgency == Urgency::Soft && snapshot_len > 4 {
            let split = CompressionPolicy::safe_split_point(&messages);
            if split > 0 && split < snapshot_len {
                return self.compress_partial(messages, split, cancel).await.map(Some);
            }
            // No safe split — fall through to full compression.
        }

        let strategy = CompressionPolicy::select_strategy(&messages);
        let target = self.config.target_tokens(self.current_tokens);
        let todo = self.todo_context();
        info!(count = snapshot_len, %strategy, "compressing working memory");

        let result = self
            .call_compressor(&messages, strategy, target, todo.as_deref(), None, cancel)
            .await?;
        self.apply_compression(&result, snapshot_len);
        info!(
            original = result.original_tokens,
            compressed = result.compressed_tokens,
            context = self.current_tokens,
            "compression complete"
        );
        Ok(Some(result))
    }

    /// Soft compression: summarize only `messages[..split]`, keep the rest
    /// untouched as the tail.
    async fn compress_partial(
        &mut self,
        messages: Vec<Message>,
        split: usize,
        cancel: Option<CancellationToken>,
    ) -> Result<CompressionResult, MemoryError> {
        let snapshot_len = messages.len();
        let (to_compress, to_keep) = messages.split_at(split);
        let strategy = CompressionPolicy::select_strategy(to_compress);
        let target = self.config.target_tokens(self.current_tokens);
        let todo = self.todo_context();
        info!(
            compressing = split,
            keeping = to_keep.len(),
            %strategy,
            "partial compression"
        );

        let result = self
            .call_compressor(to_compress, strategy, target, todo.as_deref(), Some(0), cancel)
            .await?;
        self.record_compression(&result);

        let mut replacement = result.replacement_messages();
        replacement.extend(to_keep.iter().cloned());
        self.splice(replacement, snapshot_len);
        self.emit(MemoryEvent::CompressionFinished {
            tokens_saved: result.token_savings(),
        });
        info!(
            original = result.original_tokens,
            compressed = result.compressed_tokens,
            context = self.current_tokens,
            "partial compression complete"
        );
        Ok(result)
    }

    async fn call_compressor(
        &self,
        messages: &[Message],
        strategy: crate::policy::Strategy,
        target_tokens: u64,
        todo_context: Option<&str>,
        tail_len: Option<usize>,
        cancel: Option<CancellationToken>,
    ) -> Result<CompressionResult, MemoryError> {
        let fut = async {
            match tail_len {
                Some(n) => {
                    self.compressor
                        .compress_with_tail(messages, strategy, target_tokens, todo_context, n)
                        .await
                }
                None => {
                    self.compressor
                        .compress(messages, strategy, target_tokens, todo_context)
                        .await
                }
            }
        };
        match cancel {
            Some(token) => tokio::select! {
                result = fut => result,
                _ = token.cancelled() => {
                    info!("compression cancelled mid-call, buffer unchanged");
                    Err(MemoryError::Cancelled)
                }
            },
            None => fut.await,
        }
    }

    /// Apply a finished compression against the buffer state it was computed
    /// from: the first `snapshot_len` messages are replaced by the summary
    /// and preserved tail, and anything appended since the snapshot survives
    /// behind them in order.
    pub fn apply_compression(&mut self, result: &CompressionResult, snapshot_len: usize) {
        self.record_compression(result);
        self.splice(result.replacement_messages(), snapshot_len);
        self.emit(MemoryEvent::CompressionFinished {
            tokens_saved: result.token_savings(),
        });
    }

    fn record_compression(&mut self, result: &CompressionResult) {
        self.compression_count += 1;
        self.last_compression_savings = result.token_savings();
        self.tracker.add_compression_savings(result.token_savings());
        self.tracker.add_compression_cost(result.compressed_tokens);
    }

    fn splice(&mut self, replacement: Vec<Message>, snapshot_len: usize) {
        self.short_term.remove_first(snapshot_len);
        let extra = self.short_term.clear();
        for message in replacement {
            self.short_term.append(message);
        }
        for message in extra {
            self.short_term.append(message);
        }
        // The context changed shape — API grounding is stale.
        self.accountant.reset();
        self.current_tokens = self.recount_tokens();
    }

    /// Pop a trailing assistant message whose tool calls were never
    /// answered. Idempotent; restores the role-pairing invariant after an
    /// interrupted turn. The user message stays so the question survives.
    pub fn rollback_incomplete_exchange(&mut self) {
        let Some(last) = self.short_term.messages().last() else {
            return;
        };
        if last.role == Role::Assistant && last.has_tool_calls() {
            self.short_term.remove_last(1);
            self.accountant.reset();
            self.current_tokens = self.recount_tokens();
            debug!("rolled back incomplete assistant tool exchange");
        }
    }

    /// Flush the current state to disk. No-op before the session exists or
    /// when there is nothing to save.
    pub async fn save_memory(&mut self) -> Result<(), MemoryError> {
        let Some(session_id) = self.session_id else {
            debug!("skipping save: no session created");
            return Ok(());
        };
        if self.short_term.is_empty() && self.system_messages.is_empty() {
            debug!(%session_id, "skipping save: nothing to persist");
            return Ok(());
        }

        let stats = self.stats();
        self.store
            .save_session(
                session_id,
                &self.system_messages,
                self.short_term.messages(),
                &stats,
            )
            .await?;
        self.emit(MemoryEvent::SessionSaved { session_id });
        info!(%session_id, "saved memory state");
        Ok(())
    }

    pub fn stats(&self) -> UsageStats {
        UsageStats {
            total_input_tokens: self.tracker.total_input_tokens(),
            total_output_tokens: self.tracker.total_output_tokens(),
            compression_count: self.compression_count,
            compression_savings: self.tracker.compression_savings(),
            compression_cost: self.tracker.compression_cost(),
            total_cost: self.tracker.total_cost(self.llm.model()),
        }
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn current_tokens(&self) -> u64 {
        self.current_tokens
    }

    pub fn message_count(&self) -> usize {
        self.short_term.len()
    }

    pub fn last_compression_savings(&self) -> u64 {
        self.last_compression_savings
    }

    /// Register the callback the compressor uses to fold current to-do state
    /// into summaries.
    pub fn set_todo_context_provider(
        &mut self,
        provider: impl Fn() -> Option<String> + Send + Sync + 'static,
    ) {
        self.todo_context_provider = Some(Box::new(provider));
    }

    /// Attach a UI event channel. Emission is `try_send`; a full or closed
    /// channel is silently ignored.
    pub fn set_event_sink(&mut self, sink: mpsc::Sender<MemoryEvent>) {
        self.event_sink = Some(sink);
    }

    /// Cross-session knowledge store, when enabled.
    pub fn long_term(&mut self) -> Option<&mut LongTermMemory> {
        self.long_term.as_mut()
    }

    /// Forget everything in-process. Does not touch disk.
    pub fn reset(&mut self) {
        self.short_term.clear();
        self.system_messages.clear();
        self.tracker.reset();
        self.accountant.reset();
        self.current_tokens = 0;
        self.compression_count = 0;
        self.last_compression_savings = 0;
    }

    // --- session browsing -------------------------------------------------

    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>, MemoryError> {
        self.store.list_sessions(limit).await
    }

    pub async fn find_latest_session(&self) -> Result<Option<Uuid>, MemoryError> {
        self.store.find_latest_session().await
    }

    pub async fn find_session_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<Uuid>, MemoryError> {
        self.store.find_session_by_prefix(prefix).await
    }

    // --- internals --------------------------------------------------------

    async fn ensure_session(&mut self) -> Result<(), MemoryError> {
        if self.session_id.is_none() {
            let session_id = self.store.create_session().await?;
            info!(%session_id, "created new session");
            self.session_id = Some(session_id);
        }
        Ok(())
    }

    fn recount_tokens(&self) -> u64 {
        estimate_conversation_tokens(&self.system_messages)
            + estimate_conversation_tokens(self.short_term.messages())
    }

    fn todo_context(&self) -> Option<String> {
        self.todo_context_provider.as_ref().and_then(|f| f())
    }

    fn emit(&self, event: MemoryEvent) {
        if let Some(sink) = &self.event_sink {
            let _ = sink.try_send(event);
        }
    }
}
