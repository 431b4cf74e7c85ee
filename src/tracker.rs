use crate::llm::TokenCounts;
use crate::message::Message;
use crate::session::UsageStats;

/// Chars-per-token ratio used by the fallback estimator. Coarse, but the
/// accountant corrects against API-reported counts after every call.
pub const CHARS_PER_TOKEN: f64 = 3.5;

/// Fixed per-message overhead for role and framing tokens.
const MESSAGE_OVERHEAD_TOKENS: u64 = 4;

/// Estimate token count for a plain string: `ceil(chars / 3.5)`.
pub fn estimate_text_tokens(text: &str) -> u64 {
    (text.len() as f64 / CHARS_PER_TOKEN).ceil() as u64
}

/// Deterministic per-message estimate. Sums content, tool-call payloads, and
/// a fixed overhead — repeated calls always agree, and per-message estimates
/// sum to within ~10% of API-reported prompt sizes.
pub fn estimate_message_tokens(message: &Message) -> u64 {
    let mut tokens = MESSAGE_OVERHEAD_TOKENS;
    if let Some(content) = &message.content {
        tokens += estimate_text_tokens(content);
    }
    if let Some(calls) = &message.tool_calls {
        for call in calls {
            tokens += MESSAGE_OVERHEAD_TOKENS;
            tokens += estimate_text_tokens(&call.id);
            tokens += estimate_text_tokens(&call.function.name);
            tokens += estimate_text_tokens(&call.function.arguments);
        }
    }
    if let Some(name) = &message.name {
        tokens += estimate_text_tokens(name);
    }
    tokens
}

/// Sum of per-message estimates over a slice.
pub fn estimate_conversation_tokens(messages: &[Message]) -> u64 {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Per-million-token pricing, substring-matched against the model name.
/// First match wins, so specific variants come before general ones.
/// Unknown models cost nothing.
const PRICING: &[(&str, f64, f64)] = &[
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-3-5-sonnet", 3.00, 15.00),
    ("claude-3-opus", 15.00, 75.00),
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gemini-1.5-flash", 0.075, 0.30),
    ("gemini-1.5-pro", 1.25, 5.00),
];

/// Cost in USD for a model and token counts.
pub fn cost_for(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let model = model.to_lowercase();
    for (prefix, input_per_m, output_per_m) in PRICING {
        if model.contains(prefix) {
            return (input_tokens as f64 / 1_000_000.0) * input_per_m
                + (output_tokens as f64 / 1_000_000.0) * output_per_m;
        }
    }
    0.0
}

/// Cumulative token ledger: API usage plus the compression balance sheet
/// (tokens removed by summaries vs tokens the summaries themselves cost).
#[derive(Debug, Clone, Default)]
pub struct TokenTracker {
    total_input_tokens: u64,
    total_output_tokens: u64,
    compression_savings: u64,
    compression_cost: u64,
}

impl TokenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_usage(&mut self, counts: TokenCounts) {
        self.total_input_tokens += counts.input_tokens;
        self.total_output_tokens += counts.output_tokens;
    }

    pub fn add_compression_savings(&mut self, tokens: u64) {
        self.compression_savings += tokens;
    }

    pub fn add_compression_cost(&mut self, tokens: u64) {
        self.compression_cost += tokens;
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.total_input_tokens
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.total_output_tokens
    }

    pub fn compression_savings(&self) -> u64 {
        self.compression_savings
    }

    pub fn compression_cost(&self) -> u64 {
        self.compression_cost
    }

    pub fn total_cost(&self, model: &str) -> f64 {
        cost_for(model, self.total_input_tokens, self.total_output_tokens)
    }

    /// Rehydrate counters from persisted stats when resuming a session.
    pub fn restore(&mut self, stats: &UsageStats) {
        self.total_input_tokens = stats.total_input_tokens;
        self.total_output_tokens = stats.total_output_tokens;
        self.compression_savings = stats.compression_savings;
        self.compression_cost = stats.compression_cost;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;

    #[test]
    fn text_estimate_is_ceil_of_chars_over_ratio() {
        assert_eq!(estimate_text_tokens(""), 0);
        assert_eq!(estimate_text_tokens("abc"), 1); // 3 / 3.5 → 1
        assert_eq!(estimate_text_tokens(&"a".repeat(35)), 10);
        assert_eq!(estimate_text_tokens(&"a".repeat(36)), 11);
    }

    #[test]
    fn message_estimate_is_deterministic() {
        let msg = Message::assistant_with_tool_calls(
            Some("running the tool".into()),
            vec![ToolCall::function("c1", "read_file", r#"{"path":"/a"}"#)],
        );
        assert_eq!(estimate_message_tokens(&msg), estimate_message_tokens(&msg));
    }

    #[test]
    fn tool_calls_increase_estimate() {
        let plain = Message::assistant("hello");
        let with_call = Message::assistant_with_tool_calls(
            Some("hello".into()),
            vec![ToolCall::function("c1", "read_file", r#"{"path":"/a"}"#)],
        );
        assert!(estimate_message_tokens(&with_call) > estimate_message_tokens(&plain));
    }

    #[test]
    fn conversation_estimate_is_additive() {
        let msgs = vec![Message::user("one"), Message::assistant("two")];
        let total: u64 = msgs.iter().map(estimate_message_tokens).sum();
        assert_eq!(estimate_conversation_tokens(&msgs), total);
    }

    #[test]
    fn pricing_matches_specific_prefix_first() {
        // gpt-4o-mini must not be priced as gpt-4o
        let mini = cost_for("gpt-4o-mini-2024", 1_000_000, 0);
        assert!((mini - 0.15).abs() < 1e-9);
        let full = cost_for("gpt-4o-2024", 1_000_000, 0);
        assert!((full - 2.50).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_costs_nothing() {
        assert_eq!(cost_for("test-model", 1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn ledger_accumulates_and_restores() {
        let mut tracker = TokenTracker::new();
        tracker.add_usage(TokenCounts::new(100, 20));
        tracker.add_usage(TokenCounts::new(50, 5));
        tracker.add_compression_savings(30);
        tracker.add_compression_cost(10);

        assert_eq!(tracker.total_input_tokens(), 150);
        assert_eq!(tracker.total_output_tokens(), 25);
        assert_eq!(tracker.compression_savings(), 30);
        assert_eq!(tracker.compression_cost(), 10);

        let stats = UsageStats {
            total_input_tokens: 7,
            total_output_tokens: 8,
            compression_count: 1,
            compression_savings: 9,
            compression_cost: 2,
            total_cost: 0.0,
        };
        tracker.restore(&stats);
        assert_eq!(tracker.total_input_tokens(), 7);
        assert_eq!(tracker.compression_savings(), 9);

        tracker.reset();
        assert_eq!(tracker.total_input_tokens(), 0);
    }
}
