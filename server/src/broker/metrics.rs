//! Rolling metric samples and snapshot types
//!
//! Each topic keeps bounded windows of recent latencies and batch sizes;
//! averages and percentiles are computed on demand from the window, so the
//! numbers always reflect the last ≤1,000 samples. Snapshot structs
//! serialize to the exact shapes the dashboard polls.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

/// Bounded FIFO window of recent samples
pub struct RollingSample {
    samples: VecDeque<f64>,
    cap: usize,
}

impl RollingSample {
    pub fn new(cap: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Record a sample, discarding the oldest once the cap is reached
    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Mean of the window; 0.0 when empty
    pub fn avg(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Latency summary over the window.
    ///
    /// Percentile index is floor(p·n) clamped to n−1; an empty window
    /// yields all zeros.
    pub fn latency_stats(&self) -> LatencyStats {
        if self.samples.is_empty() {
            return LatencyStats::default();
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let idx = |p: f64| ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
        LatencyStats {
            avg: round2(self.avg()),
            p95: round2(sorted[idx(0.95)]),
            p99: round2(sorted[idx(0.99)]),
        }
    }
}

/// Round to two decimals for wire stability
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Latency percentiles in milliseconds
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct LatencyStats {
    pub avg: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Per-topic metrics as exposed on `/metrics`
#[derive(Debug, Clone, Serialize)]
pub struct TopicMetrics {
    pub queue_depth: usize,
    pub queue_max_size: usize,
    pub batch_size_avg: f64,
    pub messages_published: u64,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
    pub subscriber_count: usize,
    pub latency_ms: LatencyStats,
}

/// Per-topic stats as exposed on `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct TopicStats {
    pub message_count: u64,
    pub subscriber_count: usize,
}

/// Cross-topic aggregates
#[derive(Debug, Clone, Serialize)]
pub struct GlobalMetrics {
    pub active_topics: usize,
    pub active_subscribers: usize,
    pub total_published: u64,
    pub total_delivered: u64,
    pub total_dropped: u64,
}

/// Full snapshot for the observability dashboard
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: f64,
    pub topics: BTreeMap<String, TopicMetrics>,
    pub global: GlobalMetrics,
}

impl MetricsSnapshot {
    /// Aggregate per-topic metrics into the global section
    pub fn new(uptime_seconds: f64, topics: BTreeMap<String, TopicMetrics>) -> Self {
        let global = GlobalMetrics {
            active_topics: topics.len(),
            active_subscribers: topics.values().map(|m| m.subscriber_count).sum(),
            total_published: topics.values().map(|m| m.messages_published).sum(),
            total_delivered: topics.values().map(|m| m.messages_delivered).sum(),
            total_dropped: topics.values().map(|m| m.messages_dropped).sum(),
        };
        Self {
            uptime_seconds,
            topics,
            global,
        }
    }
}
