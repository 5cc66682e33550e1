//! Published event type

use std::time::Instant;

/// One published message, immutable after construction.
///
/// Fan-out shares a single `Arc<Event>` across all subscriber queues; no
/// subscriber ever holds a mutable copy. Events are discarded once every
/// current subscriber has been offered them — there is no durable log.
#[derive(Debug, Clone)]
pub struct Event {
    /// Routing channel name, always non-empty
    pub topic: String,
    /// Caller-supplied correlation id, or a generated uuid when absent
    pub id: String,
    /// UTF-8 payload text; may contain newlines, which the encoder splits
    /// across multiple `data:` lines
    pub payload: String,
    /// Monotonic receive timestamp, used for dispatch latency logging
    pub received_at: Instant,
}

impl Event {
    pub fn new(
        topic: impl Into<String>,
        id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            id: id.into(),
            payload: payload.into(),
            received_at: Instant::now(),
        }
    }

    /// Generate an event id for publishes that omit `x-sse-id`.
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
