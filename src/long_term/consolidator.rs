use std::fmt::Write as _;
use std::sync::Arc;

use tracing::warn;

use super::store::{CategoryEntries, MemoryCategory};
use crate::error::MemoryError;
use crate::llm::{CompletionRequest, LlmAdapter};
use crate::message::Message;
use crate::tracker::CHARS_PER_TOKEN;

const CONSOLIDATION_PROMPT: &str = "\
You are a memory consolidation assistant. Below are long-term memory entries \
organized by category. Your job is to consolidate them:

1. Merge overlapping or duplicate entries into single, clear statements.
2. Remove entries that are outdated or no longer useful.
3. Preserve all important, actionable information.
4. Keep each entry as a single concise statement.
5. Target at least 40% reduction in total entries while retaining key information.

Return ONLY valid YAML with exactly this structure (no extra keys, no commentary):

decisions:
  - \"entry\"
preferences:
  - \"entry\"
facts:
  - \"entry\"

CURRENT MEMORIES:
";

/// Shrinks the long-term store with an LLM pass once its estimated size
/// crosses the configured budget.
pub struct Consolidator {
    llm: Arc<dyn LlmAdapter>,
    threshold_tokens: u64,
}

impl Consolidator {
    pub fn new(llm: Arc<dyn LlmAdapter>, threshold_tokens: u64) -> Self {
        Self {
            llm,
            threshold_tokens,
        }
    }

    /// True when the formatted entries exceed the token-equivalent budget.
    pub fn should_consolidate(&self, memories: &CategoryEntries) -> bool {
        let text = format_memories(memories);
        let estimated_tokens = (text.len() as f64 / CHARS_PER_TOKEN) as u64;
        estimated_tokens > self.threshold_tokens
    }

    /// Ask the LLM to merge and prune all entries. Any response that isn't a
    /// YAML mapping falls back to the originals unchanged.
    pub async fn consolidate(
        &self,
        memories: &CategoryEntries,
    ) -> Result<CategoryEntries, MemoryError> {
        let prompt = format!("{CONSOLIDATION_PROMPT}{}", format_memories(memories));
        let request = CompletionRequest {
            messages: vec![Message::user(prompt)],
            max_tokens: 4096,
        };
        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| MemoryError::Consolidation(e.to_string()))?;

        Ok(parse_response(&response.content, memories))
    }
}

/// Format all entries into the prompt's memory block.
fn format_memories(memories: &CategoryEntries) -> String {
    let mut parts = Vec::new();
    for category in MemoryCategory::ALL {
        let entries = memories.get(&category).map(Vec::as_slice).unwrap_or(&[]);
        if entries.is_empty() {
            continue;
        }
        let mut block = format!("{category}:");
        for entry in entries {
            let _ = write!(block, "\n  - \"{entry}\"");
        }
        parts.push(block);
    }
    if parts.is_empty() {
        "(empty)".into()
    } else {
        parts.join("\n\n")
    }
}

/// Parse the LLM's YAML response. The consolidator is authoritative: a
/// category absent from a valid mapping becomes empty (the model saw the
/// full input), while a present-but-malformed category keeps its originals.
fn parse_response(text: &str, original: &CategoryEntries) -> CategoryEntries {
    let value: serde_yaml::Value = match serde_yaml::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "consolidation response is not valid YAML, keeping originals");
            return original.clone();
        }
    };

    let Some(mapping) = value.as_mapping() else {
        warn!("consolidation response is not a mapping, keeping originals");
        return original.clone();
    };

    let mut result = CategoryEntries::new();
    for category in MemoryCategory::ALL {
        let key = serde_yaml::Value::String(category.as_str().into());
        let entries = match mapping.get(&key) {
            None => Vec::new(),
            Some(serde_yaml::Value::Sequence(items)) => items
                .iter()
                .filter_map(|item| item.as_str())
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Some(_) => {
                warn!(%category, "malformed category in consolidation response, keeping originals");
                original.get(&category).cloned().unwrap_or_default()
            }
        };
        result.insert(category, entries);
    }
    result
}
