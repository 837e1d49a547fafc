//! Topic registry
//!
//! Name → topic map plus the cross-topic operations the control plane and
//! session layer call. The registry mutex is held only for map reads and
//! writes, never across topic work: each topic owns an independent mutex
//! and an independent delivery worker.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Instant;

use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::core::constants::TOPIC_NAME_MAX_LEN;

use super::error::BrokerError;
use super::metrics::{MetricsSnapshot, TopicMetrics, TopicStats};
use super::subscriber::EventSink;
use super::topic::{AttachOutcome, Topic, TopicConfig};

static TOPIC_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("topic name pattern"));

/// Validate the topic name grammar: 1-255 chars of `[A-Za-z0-9_.-]`.
pub fn validate_topic_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= TOPIC_NAME_MAX_LEN && TOPIC_NAME.is_match(name)
}

/// Process-wide topic registry.
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    config: TopicConfig,
    started_at: Instant,
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new(TopicConfig::default())
    }
}

impl TopicRegistry {
    pub fn new(config: TopicConfig) -> Self {
        tracing::info!("Topic registry initialized");
        Self {
            topics: RwLock::new(HashMap::new()),
            config,
            started_at: Instant::now(),
        }
    }

    /// Seconds since the registry was created
    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Create a topic and start its delivery worker.
    ///
    /// Idempotent: creating an existing topic succeeds without touching its
    /// counters or replay history.
    pub fn create(&self, name: &str) -> Result<(), BrokerError> {
        if !validate_topic_name(name) {
            return Err(BrokerError::NameInvalid(name.to_string()));
        }

        let mut topics = self.topics.write();
        if !topics.contains_key(name) {
            topics.insert(name.to_string(), Topic::spawn(name, self.config.clone()));
            tracing::info!(topic = name, "Created topic");
        }
        Ok(())
    }

    /// Delete a topic: remove the entry, then shut the topic down outside
    /// the registry lock. Once this returns, no further subscribe or
    /// publish can bind to the old topic.
    pub async fn delete(&self, name: &str) -> Result<(), BrokerError> {
        let topic = self
            .topics
            .write()
            .remove(name)
            .ok_or_else(|| BrokerError::NotFound(name.to_string()))?;

        topic.shutdown().await;
        tracing::info!(topic = name, "Deleted topic");
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.read().get(name).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.topics.read().contains_key(name)
    }

    pub fn list(&self) -> Vec<String> {
        self.topics.read().keys().cloned().collect()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    /// Attach a subscriber and return its replay prefix and delivery gate.
    pub fn subscribe(
        &self,
        name: &str,
        client_id: Uuid,
        sink: Arc<dyn EventSink>,
        last_n: usize,
    ) -> Result<AttachOutcome, BrokerError> {
        let topic = self
            .lookup(name)
            .ok_or_else(|| BrokerError::NotFound(name.to_string()))?;
        Ok(topic.attach(client_id, sink, last_n))
    }

    /// Detach a subscriber from one topic. False when the topic does not
    /// exist or the client was not attached to it.
    pub fn unsubscribe(&self, name: &str, client_id: Uuid) -> bool {
        match self.lookup(name) {
            Some(topic) => topic.detach(client_id),
            None => false,
        }
    }

    /// Publish to a topic; returns the current subscriber count.
    pub fn publish(&self, name: &str, data: Value) -> Result<usize, BrokerError> {
        let topic = self
            .lookup(name)
            .ok_or_else(|| BrokerError::NotFound(name.to_string()))?;
        Ok(topic.publish(data))
    }

    /// Detach a client from every topic. Called when a session terminates,
    /// regardless of which topics the client was on.
    pub fn cleanup_client(&self, client_id: Uuid) {
        let topics: Vec<Arc<Topic>> = self.topics.read().values().cloned().collect();
        for topic in topics {
            topic.detach(client_id);
        }
        tracing::info!(%client_id, "Cleaned up subscriber from all topics");
    }

    /// Total subscribers across all topics
    pub fn total_subscribers(&self) -> usize {
        let topics: Vec<Arc<Topic>> = self.topics.read().values().cloned().collect();
        topics.iter().map(|t| t.subscriber_count()).sum()
    }

    /// Per-topic stats for the `/stats` endpoint
    pub fn stats(&self) -> BTreeMap<String, TopicStats> {
        let topics: Vec<(String, Arc<Topic>)> = self
            .topics
            .read()
            .iter()
            .map(|(name, topic)| (name.clone(), Arc::clone(topic)))
            .collect();

        topics
            .into_iter()
            .map(|(name, topic)| (name, topic.stats()))
            .collect()
    }

    /// Full snapshot for the `/metrics` endpoint
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let topics: Vec<(String, Arc<Topic>)> = self
            .topics
            .read()
            .iter()
            .map(|(name, topic)| (name.clone(), Arc::clone(topic)))
            .collect();

        let per_topic: BTreeMap<String, TopicMetrics> = topics
            .into_iter()
            .map(|(name, topic)| (name, topic.metrics()))
            .collect();

        MetricsSnapshot::new(self.uptime_seconds(), per_topic)
    }

    /// Shut down every topic concurrently. Used at process exit.
    pub async fn shutdown_all(&self) {
        let topics: Vec<Arc<Topic>> = {
            let mut map = self.topics.write();
            map.drain().map(|(_, topic)| topic).collect()
        };

        futures::future::join_all(topics.iter().map(|topic| topic.shutdown())).await;
        tracing::info!(count = topics.len(), "All topic delivery workers stopped");
    }
}
