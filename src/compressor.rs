use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::debug;

use crate::error::MemoryError;
use crate::llm::{CompletionRequest, LlmAdapter};
use crate::message::{Message, Role};
use crate::policy::Strategy;
use crate::tracker::{estimate_conversation_tokens, estimate_text_tokens};

/// How many trailing messages survive a full compression verbatim. The tail
/// extends backward past this when a tool pair would otherwise be split.
pub const DEFAULT_PRESERVED_TAIL: usize = 4;

const SLIDING_WINDOW_PROMPT: &str = "\
Summarize the conversation below. The summary replaces these messages in a \
bounded context window, so it must carry everything needed to continue the \
task without them.

Structure the summary as:
1. **Task and current state** — what was asked, what has been accomplished
2. **Key technical context** — files, commands, and decisions that matter
3. **Errors encountered and their resolutions**
4. **Pending work and next steps**

Be dense and factual. Omit pleasantries and meta-discussion.";

const SELECTIVE_PROMPT: &str = "\
Summarize the conversation below. The summary replaces these messages in a \
bounded context window, so it must carry everything needed to continue the \
task without them.

Structure the summary as:
1. **Task and current state** — what was asked, what has been accomplished
2. **Key technical context** — files, commands, and decisions that matter
3. **Errors encountered and their resolutions**
4. **Pending work and next steps**

Retain decisions, file paths, tool names with their arguments, and user \
directives verbatim wherever possible — these anchor the continuing work.

Be dense and factual. Omit pleasantries and meta-discussion.";

// ---------------------------------------------------------------------------
// Tool pairing
// ---------------------------------------------------------------------------

/// Tool-pair analysis of a message range. Pairing is by `tool_call_id`
/// equality, discovered by a forward scan.
#[derive(Debug, Clone, Default)]
pub struct ToolPairing {
    /// (assistant index, tool-result index) for every answered call.
    pub pairs: Vec<(usize, usize)>,
    /// Assistant tool calls never answered within the range.
    pub orphaned_calls: Vec<(usize, String)>,
    /// Tool results whose call is not within the range.
    pub orphaned_results: Vec<(usize, String)>,
}

impl ToolPairing {
    /// True if splitting the range at `boundary` would separate an answered
    /// call from its result.
    pub fn straddles(&self, boundary: usize) -> bool {
        self.pairs
            .iter()
            .any(|&(call, result)| call < boundary && boundary <= result)
    }
}

/// Scan a message range and pair each assistant tool call with the first
/// later tool message answering it.
pub fn find_tool_pairs(messages: &[Message]) -> ToolPairing {
    let mut open: HashMap<String, usize> = HashMap::new();
    let mut pairing = ToolPairing::default();

    for (idx, msg) in messages.iter().enumerate() {
        if let Some(calls) = &msg.tool_calls {
            for call in calls {
                open.insert(call.id.clone(), idx);
            }
        } else if msg.role == Role::Tool {
            let id = msg.tool_call_id.clone().unwrap_or_default();
            match open.remove(&id) {
                Some(call_idx) => pairing.pairs.push((call_idx, idx)),
                None => pairing.orphaned_results.push((idx, id)),
            }
        }
    }

    pairing.orphaned_calls = open.into_iter().map(|(id, idx)| (idx, id)).collect();
    pairing.orphaned_calls.sort();
    pairing
}

// ---------------------------------------------------------------------------
// Compression result
// ---------------------------------------------------------------------------

/// Outcome of one compression pass. Transient — the summary becomes a single
/// buffer message via the coordinator's splice.
#[derive(Debug, Clone)]
pub struct CompressionResult {
    /// LLM-generated summary. Empty for the deletion strategy.
    pub summary: String,
    /// Messages kept verbatim after the summarized prefix.
    pub preserved_tail: Vec<Message>,
    pub original_message_count: usize,
    pub original_tokens: u64,
    pub compressed_tokens: u64,
}

impl CompressionResult {
    pub fn token_savings(&self) -> u64 {
        self.original_tokens.saturating_sub(self.compressed_tokens)
    }

    pub fn savings_percentage(&self) -> f64 {
        if self.original_tokens == 0 {
            return 0.0;
        }
        self.token_savings() as f64 / self.original_tokens as f64 * 100.0
    }

    pub fn compression_ratio(&self) -> f64 {
        if self.original_tokens == 0 {
            return 0.0;
        }
        self.compressed_tokens as f64 / self.original_tokens as f64
    }

    /// The messages that replace the compressed range: the summary (when
    /// non-empty) followed by the preserved tail.
    pub fn replacement_messages(&self) -> Vec<Message> {
        let mut replacement = Vec::with_capacity(self.preserved_tail.len() + 1);
        if !self.summary.is_empty() {
            replacement.push(Message::user(self.summary.clone()));
        }
        replacement.extend(self.preserved_tail.iter().cloned());
        replacement
    }
}

// ---------------------------------------------------------------------------
// Compressor
// ---------------------------------------------------------------------------

/// Produces LLM-generated summaries of message ranges without ever splitting
/// a tool pair. Holds no buffer state — the coordinator owns the splice.
pub struct Compressor {
    llm: Arc<dyn LlmAdapter>,
    preserved_tail: usize,
}

impl Compressor {
    pub fn new(llm: Arc<dyn LlmAdapter>) -> Self {
        Self {
            llm,
            preserved_tail: DEFAULT_PRESERVED_TAIL,
        }
    }

    pub fn with_preserved_tail(mut self, messages: usize) -> Self {
        self.preserved_tail = messages;
        self
    }

    /// Full compression: summarize the range, keeping the default tail.
    pub async fn compress(
        &self,
        messages: &[Message],
        strategy: Strategy,
        target_tokens: u64,
        todo_context: Option<&str>,
    ) -> Result<CompressionResult, MemoryError> {
        self.compress_with_tail(messages, strategy, target_tokens, todo_context, self.preserved_tail)
            .await
    }

    /// Compression with an explicit tail length. Partial (soft) compression
    /// passes 0 — the untouched suffix outside `messages` is the tail.
    pub async fn compress_with_tail(
        &self,
        messages: &[Message],
        strategy: Strategy,
        target_tokens: u64,
        todo_context: Option<&str>,
        tail_len: usize,
    ) -> Result<CompressionResult, MemoryError> {
        if messages.is_empty() {
            return Err(MemoryError::Compression("no messages to compress".into()));
        }

        let original_tokens = estimate_conversation_tokens(messages);
        let pairing = find_tool_pairs(messages);
        let tail_start = safe_tail_start(messages.len(), &pairing, tail_len);
        if tail_start == 0 {
            return Err(MemoryError::Compression(
                "no compressible prefix before the preserved tail".into(),
            ));
        }

        let prefix = &messages[..tail_start];
        let tail = messages[tail_start..].to_vec();
        debug!(
            total = messages.len(),
            prefix = prefix.len(),
            tail = tail.len(),
            %strategy,
            "compressing message range"
        );

        let summary = match strategy {
            Strategy::Deletion => String::new(),
            Strategy::SlidingWindow | Strategy::Selective => {
                self.summarize(prefix, &pairing, strategy, target_tokens, todo_context)
                    .await?
            }
        };

        let mut compressed_tokens = estimate_conversation_tokens(&tail);
        if !summary.is_empty() {
            compressed_tokens += estimate_text_tokens(&summary);
        }

        Ok(CompressionResult {
            summary,
            preserved_tail: tail,
            original_message_count: messages.len(),
            original_tokens,
            compressed_tokens,
        })
    }

    async fn summarize(
        &self,
        prefix: &[Message],
        pairing: &ToolPairing,
        strategy: Strategy,
        target_tokens: u64,
        todo_context: Option<&str>,
    ) -> Result<String, MemoryError> {
        let prompt = build_prompt(prefix, pairing, strategy, todo_context);
        let request = CompletionRequest {
            messages: vec![Message::user(prompt)],
            max_tokens: target_tokens.clamp(500, 4096) as u32,
        };

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| MemoryError::Compression(e.to_string()))?;

        if response.content.trim().is_empty() {
            return Err(MemoryError::Compression(
                "summarizer returned an empty response".into(),
            ));
        }
        Ok(response.content)
    }
}

/// Where the preserved tail begins: `len - tail_len`, moved backward until
/// no tool pair straddles the boundary. 0 means there is nothing left to
/// compress.
fn safe_tail_start(len: usize, pairing: &ToolPairing, tail_len: usize) -> usize {
    let mut start = len.saturating_sub(tail_len);
    while start > 0 && pairing.straddles(start) {
        start -= 1;
    }
    start
}

fn build_prompt(
    prefix: &[Message],
    pairing: &ToolPairing,
    strategy: Strategy,
    todo_context: Option<&str>,
) -> String {
    let base = match strategy {
        Strategy::Selective => SELECTIVE_PROMPT,
        _ => SLIDING_WINDOW_PROMPT,
    };
    let mut prompt = String::from(base);

    if let Some(todo) = todo_context {
        let _ = write!(
            prompt,
            "\n\nIn-flight to-do items — the summary must keep their state current:\n{todo}"
        );
    }

    // Orphaned tool results left in the tail reference calls that only the
    // summary will remember.
    let tail_first = prefix.len();
    let orphan_ids: Vec<&str> = pairing
        .orphaned_results
        .iter()
        .filter(|(idx, _)| *idx >= tail_first)
        .map(|(_, id)| id.as_str())
        .collect();
    if !orphan_ids.is_empty() {
        let _ = write!(
            prompt,
            "\n\nThe retained messages contain tool results answering call id(s) {}. \
             Preserve these identifiers and what each call did.",
            orphan_ids.join(", ")
        );
    }

    let _ = write!(
        prompt,
        "\n\n---\nConversation to summarize:\n{}",
        render_transcript(prefix)
    );
    prompt
}

/// Render messages as a readable transcript for the summarization prompt.
fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        match msg.role {
            Role::Tool => {
                let _ = writeln!(
                    out,
                    "tool[{}] {}: {}",
                    msg.tool_call_id.as_deref().unwrap_or("?"),
                    msg.name.as_deref().unwrap_or("?"),
                    msg.content_str()
                );
            }
            _ => {
                let _ = writeln!(out, "{}: {}", msg.role, msg.content_str());
                if let Some(calls) = &msg.tool_calls {
                    for call in calls {
                        let _ = writeln!(
                            out,
                            "  -> tool_call {} {}({})",
                            call.id, call.function.name, call.function.arguments
                        );
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, TokenCounts};
    use crate::message::ToolCall;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct StubLlm {
        responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
        seen_prompts: Mutex<Vec<String>>,
    }

    impl StubLlm {
        fn returning(text: &str) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(VecDeque::from([Ok(CompletionResponse {
                    content: text.into(),
                    usage: TokenCounts::new(100, 20),
                })])),
                seen_prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(VecDeque::from([Err(LlmError::Request(
                    "connection reset".into(),
                ))])),
                seen_prompts: Mutex::new(Vec::new()),
            })
        }

        fn last_prompt(&self) -> String {
            self.seen_prompts.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmAdapter for StubLlm {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.seen_prompts
                .lock()
                .unwrap()
                .push(request.messages[0].content_str().to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::Request("no more stub responses".into())))
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    fn exchange(call_id: &str) -> Vec<Message> {
        vec![
            Message::assistant_with_tool_calls(
                None,
                vec![ToolCall::function(call_id, "read_file", r#"{"path":"/x"}"#)],
            ),
            Message::tool(call_id, "read_file", "contents"),
        ]
    }

    #[test]
    fn pairing_matches_by_call_id() {
        let mut messages = vec![Message::user("start")];
        messages.extend(exchange("c1"));
        messages.push(Message::assistant("done"));

        let pairing = find_tool_pairs(&messages);
        assert_eq!(pairing.pairs, vec![(1, 2)]);
        assert!(pairing.orphaned_calls.is_empty());
        assert!(pairing.orphaned_results.is_empty());
    }

    #[test]
    fn pairing_reports_orphans() {
        let messages = vec![
            Message::assistant_with_tool_calls(
                None,
                vec![ToolCall::function("unanswered", "run", "{}")],
            ),
            Message::tool("unclaimed", "run", "output"),
        ];
        let pairing = find_tool_pairs(&messages);
        assert!(pairing.pairs.is_empty());
        assert_eq!(pairing.orphaned_calls, vec![(0, "unanswered".into())]);
        assert_eq!(pairing.orphaned_results, vec![(1, "unclaimed".into())]);
    }

    #[test]
    fn pairing_handles_multiple_calls_in_one_message() {
        let messages = vec![
            Message::assistant_with_tool_calls(
                None,
                vec![
                    ToolCall::function("c1", "read_file", "{}"),
                    ToolCall::function("c2", "read_file", "{}"),
                ],
            ),
            Message::tool("c2", "read_file", "b"),
            Message::tool("c1", "read_file", "a"),
        ];
        let mut pairing = find_tool_pairs(&messages);
        pairing.pairs.sort();
        assert_eq!(pairing.pairs, vec![(0, 1), (0, 2)]);
    }

    #[test]
    fn straddle_detection() {
        let mut messages = vec![Message::user("start")];
        messages.extend(exchange("c1")); // pair at (1, 2)
        let pairing = find_tool_pairs(&messages);
        assert!(!pairing.straddles(1));
        assert!(pairing.straddles(2));
        assert!(!pairing.straddles(3));
    }

    #[test]
    fn tail_start_extends_backward_over_pairs() {
        // Pair at (2, 3); naive tail start of 3 would split it.
        let mut messages = vec![Message::user("a"), Message::user("b")];
        messages.extend(exchange("c1"));
        messages.push(Message::assistant("done"));
        let pairing = find_tool_pairs(&messages);
        assert_eq!(safe_tail_start(5, &pairing, 2), 2);
    }

    #[test]
    fn tail_start_zero_tail_takes_everything() {
        let messages: Vec<_> = (0..4).map(|i| Message::user(format!("m{i}"))).collect();
        let pairing = find_tool_pairs(&messages);
        assert_eq!(safe_tail_start(4, &pairing, 0), 4);
    }

    #[tokio::test]
    async fn sliding_window_preserves_tail_and_summary() {
        let llm = StubLlm::returning("SUMMARY");
        let compressor = Compressor::new(llm.clone());
        let messages: Vec<_> = (0..8)
            .map(|i| Message::user(format!("message number {i} with some padding text")))
            .collect();

        let result = compressor
            .compress(&messages, Strategy::SlidingWindow, 1000, None)
            .await
            .unwrap();

        assert_eq!(result.summary, "SUMMARY");
        assert_eq!(result.preserved_tail.len(), DEFAULT_PRESERVED_TAIL);
        assert_eq!(result.original_message_count, 8);
        assert!(result.original_tokens > result.compressed_tokens);
        assert!(result.token_savings() > 0);

        let replacement = result.replacement_messages();
        assert_eq!(replacement.len(), 5);
        assert_eq!(replacement[0].content_str(), "SUMMARY");
        assert_eq!(replacement[4].content_str(), messages[7].content_str());

        // Only the prefix went to the summarizer.
        let prompt = llm.last_prompt();
        assert!(prompt.contains("message number 0"));
        assert!(!prompt.contains("message number 7"));
    }

    #[tokio::test]
    async fn deletion_skips_the_llm() {
        let llm = StubLlm::failing(); // would error if called
        let compressor = Compressor::new(llm);
        let messages: Vec<_> = (0..6).map(|i| Message::user(format!("m{i}"))).collect();

        let result = compressor
            .compress(&messages, Strategy::Deletion, 1000, None)
            .await
            .unwrap();

        assert!(result.summary.is_empty());
        assert_eq!(result.replacement_messages().len(), DEFAULT_PRESERVED_TAIL);
    }

    #[tokio::test]
    async fn todo_context_lands_in_the_prompt() {
        let llm = StubLlm::returning("SUMMARY");
        let compressor = Compressor::new(llm.clone());
        let messages: Vec<_> = (0..8).map(|i| Message::user(format!("m{i}"))).collect();

        compressor
            .compress(
                &messages,
                Strategy::SlidingWindow,
                1000,
                Some("- [ ] finish the report"),
            )
            .await
            .unwrap();

        assert!(llm.last_prompt().contains("finish the report"));
    }

    #[tokio::test]
    async fn orphaned_tail_results_are_called_out() {
        let llm = StubLlm::returning("SUMMARY");
        let compressor = Compressor::new(llm.clone()).with_preserved_tail(1);
        // The tail holds a tool result whose call is nowhere in the range.
        let messages = vec![
            Message::user("a"),
            Message::user("b"),
            Message::user("c"),
            Message::tool("orphan_1", "read_file", "stale output"),
        ];

        let result = compressor
            .compress(&messages, Strategy::Selective, 1000, None)
            .await
            .unwrap();

        assert_eq!(result.preserved_tail.len(), 1);
        assert!(llm.last_prompt().contains("orphan_1"));
    }

    #[tokio::test]
    async fn failed_summarizer_is_a_compression_error() {
        let llm = StubLlm::failing();
        let compressor = Compressor::new(llm);
        let messages: Vec<_> = (0..8).map(|i| Message::user(format!("m{i}"))).collect();

        let err = compressor
            .compress(&messages, Strategy::SlidingWindow, 1000, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Compression(_)));
    }

    #[tokio::test]
    async fn uncompressible_range_is_an_error() {
        let llm = StubLlm::returning("SUMMARY");
        let compressor = Compressor::new(llm);
        // Two messages, tail of 4 → nothing left in front of the tail.
        let messages = vec![Message::user("a"), Message::user("b")];

        let err = compressor
            .compress(&messages, Strategy::SlidingWindow, 1000, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Compression(_)));
    }
}
