//! Topic delivery engine
//!
//! Each topic owns its subscriber set, a bounded replay ring, a bounded
//! ingest queue and one background delivery worker. Publishers append to
//! the ring and offer to the queue without ever waiting on a subscriber;
//! the worker accumulates queued messages into batches and fans each batch
//! out to all attached subscribers concurrently.
//!
//! ## Batching
//!
//! A batch is flushed when it reaches `batch_size` messages or when
//! `batch_timeout` elapses since the last flush, whichever comes first.
//! Batches preserve publish order and are flushed in order, so delivery
//! order within a topic equals publish order.
//!
//! ## Slow consumers
//!
//! Every per-subscriber send is bounded by `send_timeout` and all sends in
//! a flush run concurrently, so one stalled subscriber delays nobody.
//! A subscriber that fails or times out is detached; the batch is not
//! retried for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT_MS, DEFAULT_QUEUE_CAPACITY, DEFAULT_REPLAY_CAPACITY,
    DEFAULT_SEND_TIMEOUT_MS, ENV_BATCH_SIZE, ENV_BATCH_TIMEOUT_MS, ENV_QUEUE_CAPACITY,
    ENV_REPLAY_CAPACITY, ENV_SEND_TIMEOUT_MS, METRICS_MAX_SAMPLES, SHUTDOWN_TIMEOUT_SECS,
    WORKER_ERROR_BACKOFF_MS, WORKER_MIN_WAIT_MS,
};

use super::message::Envelope;
use super::metrics::{RollingSample, TopicMetrics, TopicStats, round2};
use super::ring::ReplayRing;
use super::subscriber::{DeliveryGate, EventSink, SubscriberHandle};

/// Per-topic tunables
#[derive(Clone)]
pub struct TopicConfig {
    pub replay_capacity: usize,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub send_timeout: Duration,
    pub metrics_samples: usize,
}

impl Default for TopicConfig {
    fn default() -> Self {
        let env_usize = |key: &str, default: usize| {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };
        let env_ms = |key: &str, default: u64| {
            let ms = std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default);
            Duration::from_millis(ms)
        };

        Self {
            replay_capacity: env_usize(ENV_REPLAY_CAPACITY, DEFAULT_REPLAY_CAPACITY),
            queue_capacity: env_usize(ENV_QUEUE_CAPACITY, DEFAULT_QUEUE_CAPACITY),
            batch_size: env_usize(ENV_BATCH_SIZE, DEFAULT_BATCH_SIZE),
            batch_timeout: env_ms(ENV_BATCH_TIMEOUT_MS, DEFAULT_BATCH_TIMEOUT_MS),
            send_timeout: env_ms(ENV_SEND_TIMEOUT_MS, DEFAULT_SEND_TIMEOUT_MS),
            metrics_samples: METRICS_MAX_SAMPLES,
        }
    }
}

/// Result of attaching a subscriber: the replay prefix snapshot plus the
/// gate that releases live delivery once the prefix is on its way.
#[derive(Debug)]
pub struct AttachOutcome {
    pub replay: Vec<Arc<Envelope>>,
    pub gate: DeliveryGate,
}

/// Mutable topic state, guarded by the topic mutex.
///
/// The mutex is held only for short critical sections and never across an
/// outbound send. Attach, ring append and sequence assignment all happen
/// under it, which is what makes the replay/live seam exact.
struct TopicState {
    subscribers: HashMap<Uuid, Arc<SubscriberHandle>>,
    next_seq: u64,
    messages_published: u64,
    messages_delivered: u64,
    messages_dropped: u64,
    latencies: RollingSample,
    batch_sizes: RollingSample,
}

#[derive(Debug)]
enum SendFailure {
    Sink,
    Timeout,
}

/// A named channel with its own history and delivery worker.
pub struct Topic {
    name: String,
    config: TopicConfig,
    state: Mutex<TopicState>,
    ring: ReplayRing,
    ingest_tx: mpsc::Sender<Arc<Envelope>>,
    stop_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Topic {
    /// Create the topic and start its delivery worker.
    pub fn spawn(name: impl Into<String>, config: TopicConfig) -> Arc<Self> {
        let name = name.into();
        let (ingest_tx, ingest_rx) = mpsc::channel(config.queue_capacity);
        let (stop_tx, stop_rx) = watch::channel(false);

        let topic = Arc::new(Self {
            state: Mutex::new(TopicState {
                subscribers: HashMap::new(),
                next_seq: 0,
                messages_published: 0,
                messages_delivered: 0,
                messages_dropped: 0,
                latencies: RollingSample::new(config.metrics_samples),
                batch_sizes: RollingSample::new(config.metrics_samples),
            }),
            ring: ReplayRing::new(config.replay_capacity),
            ingest_tx,
            stop_tx,
            worker: Mutex::new(None),
            config,
            name,
        });

        let handle = tokio::spawn(Arc::clone(&topic).delivery_worker(ingest_rx, stop_rx));
        *topic.worker.lock() = Some(handle);
        tracing::info!(topic = %topic.name, "Started delivery worker");
        topic
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a subscriber and snapshot its replay prefix atomically.
    ///
    /// Runs entirely under the topic mutex, so a concurrently published
    /// message either lands in the returned prefix or reaches the new
    /// subscriber through the live stream, never both. An existing handle
    /// for the same client is replaced and closed.
    pub fn attach(&self, client_id: Uuid, sink: Arc<dyn EventSink>, last_n: usize) -> AttachOutcome {
        let mut state = self.state.lock();
        let (handle, gate) = SubscriberHandle::new(client_id, sink, state.next_seq);
        if let Some(previous) = state.subscribers.insert(client_id, handle) {
            previous.close();
        }
        let replay = self.ring.last_n(last_n);
        drop(state);
        tracing::info!(topic = %self.name, %client_id, "Attached subscriber");
        AttachOutcome { replay, gate }
    }

    /// Remove and close the subscriber; returns whether one was attached.
    pub fn detach(&self, client_id: Uuid) -> bool {
        let removed = self.state.lock().subscribers.remove(&client_id);
        match removed {
            Some(handle) => {
                handle.close();
                tracing::info!(topic = %self.name, %client_id, "Detached subscriber");
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Publish a payload. Never blocks: the envelope is appended to the
    /// replay ring, then offered to the ingest queue; on a full queue the
    /// envelope is dropped and counted. Returns the current subscriber
    /// count (delivery itself is asynchronous).
    pub fn publish(&self, data: Value) -> usize {
        let (envelope, subscriber_count) = {
            let mut state = self.state.lock();
            state.next_seq += 1;
            let envelope = Arc::new(Envelope::new(self.name.clone(), data, state.next_seq));
            self.ring.append(Arc::clone(&envelope));
            state.messages_published += 1;
            (envelope, state.subscribers.len())
        };

        if self.ingest_tx.try_send(envelope).is_err() {
            tracing::warn!(topic = %self.name, "Ingest queue full, dropping message");
            self.state.lock().messages_dropped += 1;
        }

        subscriber_count
    }

    /// Snapshot of the last `n` messages in publish order.
    pub fn replay(&self, last_n: usize) -> Vec<Arc<Envelope>> {
        self.ring.last_n(last_n)
    }

    /// Detailed metrics for the `/metrics` snapshot.
    pub fn metrics(&self) -> TopicMetrics {
        let queue_max = self.ingest_tx.max_capacity();
        let queue_depth = queue_max.saturating_sub(self.ingest_tx.capacity());
        let state = self.state.lock();
        TopicMetrics {
            queue_depth,
            queue_max_size: queue_max,
            batch_size_avg: round2(state.batch_sizes.avg()),
            messages_published: state.messages_published,
            messages_delivered: state.messages_delivered,
            messages_dropped: state.messages_dropped,
            subscriber_count: state.subscribers.len(),
            latency_ms: state.latencies.latency_stats(),
        }
    }

    /// Coarse stats for the `/stats` endpoint.
    pub fn stats(&self) -> TopicStats {
        let state = self.state.lock();
        TopicStats {
            message_count: state.messages_published,
            subscriber_count: state.subscribers.len(),
        }
    }

    /// Stop the worker (flushing its in-memory batch), then close and
    /// remove every subscriber. Messages still sitting in the ingest queue
    /// are discarded with the queue.
    pub async fn shutdown(&self) {
        let _ = self.stop_tx.send(true);

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
            if tokio::time::timeout(timeout, handle).await.is_err() {
                tracing::warn!(topic = %self.name, "Timed out waiting for delivery worker");
            }
        }

        let handles: Vec<Arc<SubscriberHandle>> = {
            let mut state = self.state.lock();
            state.subscribers.drain().map(|(_, h)| h).collect()
        };
        for handle in &handles {
            handle.close();
        }
        tracing::info!(
            topic = %self.name,
            subscribers = handles.len(),
            "Stopped delivery worker"
        );
    }

    /// Background loop: accumulate queued messages into a batch, flush on
    /// size or timeout, final-flush on stop.
    async fn delivery_worker(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<Arc<Envelope>>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut batch: Vec<Arc<Envelope>> = Vec::with_capacity(self.config.batch_size);
        let mut last_flush = Instant::now();
        let min_wait = Duration::from_millis(WORKER_MIN_WAIT_MS);

        loop {
            let remaining = self
                .config
                .batch_timeout
                .saturating_sub(last_flush.elapsed())
                .max(min_wait);

            tokio::select! {
                biased;
                _ = wait_for_stop(&mut stop_rx) => {
                    self.flush_guarded(&mut batch).await;
                    break;
                }
                next = tokio::time::timeout(remaining, rx.recv()) => match next {
                    Ok(Some(envelope)) => {
                        batch.push(envelope);
                        if batch.len() >= self.config.batch_size {
                            self.flush_guarded(&mut batch).await;
                            last_flush = Instant::now();
                        }
                    }
                    Ok(None) => {
                        self.flush_guarded(&mut batch).await;
                        break;
                    }
                    Err(_) => {
                        if !batch.is_empty() {
                            self.flush_guarded(&mut batch).await;
                        }
                        last_flush = Instant::now();
                    }
                }
            }
        }

        tracing::debug!(topic = %self.name, "Delivery worker exited");
    }

    /// Flush with a panic guard: an unexpected failure is logged and
    /// followed by a short backoff instead of killing the worker.
    async fn flush_guarded(&self, batch: &mut Vec<Arc<Envelope>>) {
        let flush = std::panic::AssertUnwindSafe(self.flush(batch)).catch_unwind();
        if flush.await.is_err() {
            tracing::error!(topic = %self.name, "Delivery worker error during flush");
            batch.clear();
            tokio::time::sleep(Duration::from_millis(WORKER_ERROR_BACKOFF_MS)).await;
        }
    }

    /// Fan the batch out to every attached subscriber concurrently.
    ///
    /// The subscriber snapshot is taken under the topic mutex; the mutex is
    /// released before any send starts. Each send is bounded by the send
    /// timeout, and a failed or timed-out subscriber is detached. The
    /// delivered counter aggregates successful message-subscriber pairs.
    async fn flush(&self, batch: &mut Vec<Arc<Envelope>>) {
        if batch.is_empty() {
            return;
        }

        let handles: Vec<Arc<SubscriberHandle>> = {
            let mut state = self.state.lock();
            state.batch_sizes.push(batch.len() as f64);
            state
                .subscribers
                .values()
                .filter(|h| !h.is_closed())
                .cloned()
                .collect()
        };

        if handles.is_empty() {
            batch.clear();
            return;
        }

        let sends = handles.iter().map(|handle| {
            // Messages at or below the attach horizon belong to this
            // subscriber's replay prefix, or predate it entirely.
            let to_send: Vec<Arc<Envelope>> = batch
                .iter()
                .filter(|m| m.seq > handle.attach_horizon())
                .cloned()
                .collect();
            async move {
                if to_send.is_empty() {
                    return Ok(0u64);
                }
                match tokio::time::timeout(self.config.send_timeout, handle.deliver(&to_send))
                    .await
                {
                    Ok(Ok(())) => Ok(to_send.len() as u64),
                    Ok(Err(_)) => Err(SendFailure::Sink),
                    Err(_) => Err(SendFailure::Timeout),
                }
            }
        });
        let results = join_all(sends).await;

        let mut delivered = 0u64;
        for (handle, result) in handles.iter().zip(results) {
            match result {
                Ok(sent) => delivered += sent,
                Err(failure) => {
                    tracing::warn!(
                        topic = %self.name,
                        client_id = %handle.client_id(),
                        failure = ?failure,
                        "Subscriber send failed, detaching"
                    );
                    handle.close();
                    self.detach(handle.client_id());
                }
            }
        }

        let now = Instant::now();
        {
            let mut state = self.state.lock();
            state.messages_delivered += delivered;
            for envelope in batch.iter() {
                let latency_ms = now.duration_since(envelope.published_at).as_secs_f64() * 1000.0;
                state.latencies.push(latency_ms);
            }
        }

        batch.clear();
    }
}

/// Wait until the stop flag flips to `true`. Kept as its own async fn
/// (rather than inlined in a `select!` branch) so the `watch::Ref` borrowed
/// from `borrow()` is dropped before any `.await`, keeping the future `Send`.
async fn wait_for_stop(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}
