use tracing::debug;

use crate::llm::TokenCounts;

/// Reconciles locally estimated token counts with API-reported totals.
///
/// The API's reported usage is authoritative for context size; per-message
/// estimates only cover the delta since the last call. After compression the
/// grounding is stale, so both quantities reset and the caller re-estimates
/// from scratch on demand.
#[derive(Debug, Default)]
pub struct TokenAccountant {
    last_api_context_tokens: Option<u64>,
    estimated_delta_tokens: u64,
}

impl TokenAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ground the context size on an API-reported usage pair.
    pub fn on_api_usage(&mut self, counts: TokenCounts) {
        self.last_api_context_tokens = Some(counts.total());
        self.estimated_delta_tokens = 0;
        debug!(
            input = counts.input_tokens,
            output = counts.output_tokens,
            context = counts.total(),
            "context size grounded on API usage"
        );
    }

    /// Accumulate a local estimate for a message added since the last API call.
    pub fn on_estimated(&mut self, tokens: u64) {
        self.estimated_delta_tokens += tokens;
    }

    /// Current context size if grounded: last API total plus estimated delta.
    /// `None` before the first API call and after any compression — the
    /// caller must re-estimate over the full context.
    pub fn grounded(&self) -> Option<u64> {
        self.last_api_context_tokens
            .map(|api| api + self.estimated_delta_tokens)
    }

    pub fn reset(&mut self) {
        self.last_api_context_tokens = None;
        self.estimated_delta_tokens = 0;
    }
}
