//! Bounded replay history
//!
//! Per-topic ring of the most recent messages, used to serve "last N"
//! replay prefixes to late-joining subscribers. Insertion-ordered; the
//! oldest entry is evicted once capacity is reached.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::message::Envelope;

/// Fixed-capacity, internally synchronized message ring.
///
/// `last_n` returns a copy, so readers are decoupled from further writes:
/// a concurrent `append` never mutates a snapshot already handed out.
pub struct ReplayRing {
    capacity: usize,
    buffer: Mutex<VecDeque<Arc<Envelope>>>,
}

impl ReplayRing {
    /// Create a ring with the given capacity. Capacity must be positive.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append a message, evicting the oldest when full. O(1).
    pub fn append(&self, item: Arc<Envelope>) {
        let mut buffer = self.buffer.lock();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(item);
    }

    /// The last `min(n, len)` messages in insertion order.
    pub fn last_n(&self, n: usize) -> Vec<Arc<Envelope>> {
        let buffer = self.buffer.lock();
        let take = n.min(buffer.len());
        buffer.iter().skip(buffer.len() - take).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(seq: u64) -> Arc<Envelope> {
        Arc::new(Envelope::new("ring".to_string(), json!({ "seq": seq }), seq))
    }

    fn seqs(items: &[Arc<Envelope>]) -> Vec<u64> {
        items.iter().map(|e| e.seq).collect()
    }

    #[test]
    fn test_append_and_len() {
        let ring = ReplayRing::new(3);
        assert!(ring.is_empty());
        ring.append(env(1));
        ring.append(env(2));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let ring = ReplayRing::new(3);
        for seq in 1..=5 {
            ring.append(env(seq));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(seqs(&ring.last_n(3)), vec![3, 4, 5]);
    }

    #[test]
    fn test_last_n_clamps_to_length() {
        let ring = ReplayRing::new(10);
        ring.append(env(1));
        ring.append(env(2));
        assert_eq!(seqs(&ring.last_n(100)), vec![1, 2]);
    }

    #[test]
    fn test_last_n_zero_is_empty() {
        let ring = ReplayRing::new(10);
        ring.append(env(1));
        assert!(ring.last_n(0).is_empty());
    }

    #[test]
    fn test_last_n_returns_suffix_in_order() {
        let ring = ReplayRing::new(100);
        for seq in 1..=50 {
            ring.append(env(seq));
        }
        assert_eq!(seqs(&ring.last_n(5)), vec![46, 47, 48, 49, 50]);
    }

    #[test]
    fn test_snapshot_decoupled_from_later_appends() {
        let ring = ReplayRing::new(5);
        ring.append(env(1));
        let snapshot = ring.last_n(5);
        ring.append(env(2));
        assert_eq!(seqs(&snapshot), vec![1]);
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity_panics() {
        ReplayRing::new(0);
    }
}
