//! Message envelope

use std::time::Instant;

use serde_json::Value;
use uuid::Uuid;

/// A published message, immutable once created.
///
/// The payload is opaque JSON; the broker never introspects it. `seq` is a
/// per-topic sequence assigned under the topic mutex at publish time and
/// drives the replay/live delivery seam; it never leaves the process, and
/// neither does `published_at`, which only feeds latency accounting.
#[derive(Debug)]
pub struct Envelope {
    pub topic: String,
    pub data: Value,
    pub message_id: String,
    pub seq: u64,
    pub published_at: Instant,
}

impl Envelope {
    pub fn new(topic: String, data: Value, seq: u64) -> Self {
        Self {
            topic,
            data,
            message_id: Uuid::new_v4().to_string(),
            seq,
            published_at: Instant::now(),
        }
    }
}
