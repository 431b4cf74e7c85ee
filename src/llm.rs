use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::message::Message;

/// Token usage reported by the LLM for a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenCounts {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A completion request as the memory engine issues it — already-built
/// messages, nothing else to decide.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: u32,
}

/// What came back from the LLM.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenCounts,
}

/// Pure LLM call. No state, no history, no retries — the adapter owns the
/// wire protocol, the memory engine owns everything else.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Model identifier, used for cost accounting.
    fn model(&self) -> &str;
}

/// Blanket impl so `Box<dyn LlmAdapter>` can be passed wherever an adapter is expected.
#[async_trait]
impl LlmAdapter for Box<dyn LlmAdapter> {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        (**self).complete(request).await
    }

    fn model(&self) -> &str {
        (**self).model()
    }
}
