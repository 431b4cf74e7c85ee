use uuid::Uuid;

use crate::policy::Urgency;

/// Events emitted during memory operations, for UI consumption.
/// Delivery is best-effort — no subscriber, no effect on correctness.
#[derive(Debug, Clone)]
pub enum MemoryEvent {
    CompressionStarted { urgency: Urgency, message_count: usize },
    CompressionFinished { tokens_saved: u64 },
    SessionSaved { session_id: Uuid },
}
