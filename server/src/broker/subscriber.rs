//! Subscriber handles and the outbound sink seam
//!
//! A `SubscriberHandle` represents one consumer attached to one topic. The
//! transport behind it is opaque to the broker: delivery goes through the
//! `EventSink` trait, implemented by the WebSocket session layer and by
//! test sinks. Batches are delivered one-at-a-time per subscriber, so a
//! sink never sees overlapping `send_batch` calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use super::error::SinkError;
use super::message::Envelope;

/// Outbound transport for one subscriber.
///
/// `send_batch` must emit every message in order and return `Ok` only if
/// all of them were accepted. Implementations may suspend while the
/// transport applies backpressure; the delivery worker bounds each call
/// with the topic's send timeout.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send_batch(&self, batch: &[Arc<Envelope>]) -> Result<(), SinkError>;
}

/// Opens a subscriber's live delivery after the replay prefix is queued.
///
/// Returned from attach. The session layer calls `open` once the subscribe
/// ack and replay events sit in the outbound queue, which keeps the live
/// stream strictly after the replay stream on the wire. Dropping the gate
/// unopened leaves the subscriber undeliverable; the next flush times out
/// on it and detaches it.
#[derive(Debug)]
pub struct DeliveryGate {
    tx: watch::Sender<bool>,
}

impl DeliveryGate {
    pub fn open(self) {
        let _ = self.tx.send(true);
    }
}

/// One attached consumer on one topic.
pub struct SubscriberHandle {
    client_id: Uuid,
    sink: Arc<dyn EventSink>,
    closed: AtomicBool,
    attach_horizon: u64,
    ready: watch::Receiver<bool>,
}

impl SubscriberHandle {
    /// Create a handle plus the gate that releases its live stream.
    ///
    /// `attach_horizon` is the topic publish sequence at attach time;
    /// live delivery skips anything at or below it (those messages belong
    /// to the replay prefix, or predate the subscriber entirely).
    pub fn new(
        client_id: Uuid,
        sink: Arc<dyn EventSink>,
        attach_horizon: u64,
    ) -> (Arc<Self>, DeliveryGate) {
        let (tx, rx) = watch::channel(false);
        let handle = Arc::new(Self {
            client_id,
            sink,
            closed: AtomicBool::new(false),
            attach_horizon,
            ready: rx,
        });
        (handle, DeliveryGate { tx })
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn attach_horizon(&self) -> u64 {
        self.attach_horizon
    }

    /// Idempotent; a closed handle accepts no further sends.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait for the gate, then send. Called by the delivery worker under
    /// the per-subscriber send timeout.
    pub async fn deliver(&self, batch: &[Arc<Envelope>]) -> Result<(), SinkError> {
        let mut ready = self.ready.clone();
        if ready.wait_for(|&open| open).await.is_err() {
            // Gate dropped without opening: the session abandoned the
            // subscription before queueing its replay.
            self.close();
            return Err(SinkError::Closed);
        }
        self.send_batch(batch).await
    }

    /// Send a batch through the sink; any failure closes the handle.
    pub async fn send_batch(&self, batch: &[Arc<Envelope>]) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        match self.sink.send_batch(batch).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Sink that records delivered messages on an unbounded channel.
    pub struct RecordingSink {
        tx: mpsc::UnboundedSender<Arc<Envelope>>,
    }

    impl RecordingSink {
        pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Arc<Envelope>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { tx }), rx)
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn send_batch(&self, batch: &[Arc<Envelope>]) -> Result<(), SinkError> {
            for env in batch {
                self.tx.send(Arc::clone(env)).map_err(|_| SinkError::Closed)?;
            }
            Ok(())
        }
    }

    /// Sink that sleeps on every batch, simulating a stalled consumer.
    pub struct StallingSink {
        pub delay: Duration,
    }

    #[async_trait]
    impl EventSink for StallingSink {
        async fn send_batch(&self, _batch: &[Arc<Envelope>]) -> Result<(), SinkError> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    /// Sink that fails every batch.
    pub struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        async fn send_batch(&self, _batch: &[Arc<Envelope>]) -> Result<(), SinkError> {
            Err(SinkError::Closed)
        }
    }

    /// Drain everything currently buffered in a recording receiver.
    pub fn drain(rx: &mut mpsc::UnboundedReceiver<Arc<Envelope>>) -> Vec<Arc<Envelope>> {
        let mut out = Vec::new();
        while let Ok(env) = rx.try_recv() {
            out.push(env);
        }
        out
    }
}
