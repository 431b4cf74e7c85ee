#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("consolidation failed: {0}")]
    Consolidation(String),
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),
    #[error("operation cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
}
