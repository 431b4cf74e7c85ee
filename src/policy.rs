use crate::compressor::find_tool_pairs;
use crate::config::MemoryConfig;
use crate::message::Message;

/// How badly the context needs compressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    None,
    /// Over the soft threshold — partial compression of the oldest half.
    Soft,
    /// Over the hard threshold — full compression.
    Hard,
    /// Buffer hit the emergency cap — full compression regardless of tokens.
    Emergency,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Urgency::None => "none",
            Urgency::Soft => "soft",
            Urgency::Hard => "hard",
            Urgency::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

/// How a message range gets compressed. Dispatch is a plain `match` — the
/// set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Drop the prefix outright, no summary. For ranges too small to be
    /// worth an LLM call.
    Deletion,
    /// Keep the recent tail, summarize the rest.
    SlidingWindow,
    /// As SlidingWindow, with the prompt biased toward decisions, paths,
    /// tool arguments, and user directives.
    Selective,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::Deletion => "deletion",
            Strategy::SlidingWindow => "sliding_window",
            Strategy::Selective => "selective",
        };
        f.write_str(s)
    }
}

/// Decides when to compress, how, and where a partial compression may split.
#[derive(Debug, Clone)]
pub struct CompressionPolicy {
    enabled: bool,
    hard_threshold: u64,
    soft_threshold: u64,
}

impl CompressionPolicy {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            enabled: config.enabled,
            hard_threshold: config.compression_threshold,
            soft_threshold: config.soft_threshold(),
        }
    }

    /// Urgency gradient. Emergency (buffer cap) outranks token thresholds —
    /// message count is the safety net against estimate drift.
    pub fn urgency(&self, current_tokens: u64, buffer_full: bool) -> Urgency {
        if !self.enabled {
            return Urgency::None;
        }
        if buffer_full {
            return Urgency::Emergency;
        }
        if current_tokens > self.hard_threshold {
            return Urgency::Hard;
        }
        if current_tokens > self.soft_threshold {
            return Urgency::Soft;
        }
        Urgency::None
    }

    /// Pick a strategy from the shape of the messages being compressed.
    pub fn select_strategy(messages: &[Message]) -> Strategy {
        if messages.iter().any(Message::is_tool_exchange) {
            Strategy::Selective
        } else if messages.len() < 5 {
            Strategy::Deletion
        } else {
            Strategy::SlidingWindow
        }
    }

    /// Largest index `k <= len/2` where no tool pair straddles the boundary.
    /// Returns 0 when no safe split exists — the caller falls through to
    /// full compression.
    pub fn safe_split_point(messages: &[Message]) -> usize {
        let target = messages.len() / 2;
        if target == 0 {
            return 0;
        }
        let pairing = find_tool_pairs(messages);
        for candidate in (1..=target).rev() {
            if !pairing.straddles(candidate) {
                return candidate;
            }
        }
        0
    }
}
