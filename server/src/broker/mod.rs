//! Topic delivery engine
//!
//! In-memory pub/sub with named topics, bounded replay history and
//! batched, concurrently fanned-out delivery:
//!
//! - `TopicRegistry`: name → topic map, creation/lookup/deletion, global
//!   subscriber cleanup by client id
//! - `Topic`: subscriber set, replay ring, ingest queue, one background
//!   delivery worker, metrics counters
//! - `SubscriberHandle` / `EventSink`: one attached consumer and the
//!   transport seam behind it
//! - `ReplayRing`: bounded "last N" history per topic
//!
//! Ordering is guaranteed within a topic only: publish order equals
//! delivery order for every subscriber that stays attached. Publishers are
//! never blocked on delivery; overload is shed at the ingest queue with an
//! explicit drop counter.

mod error;
mod message;
mod metrics;
mod registry;
mod ring;
mod subscriber;
mod topic;

pub use error::{BrokerError, SinkError};
pub use message::Envelope;
pub use metrics::{GlobalMetrics, LatencyStats, MetricsSnapshot, TopicMetrics, TopicStats};
pub use registry::{TopicRegistry, validate_topic_name};
pub use ring::ReplayRing;
pub use subscriber::{DeliveryGate, EventSink, SubscriberHandle};
pub use topic::{AttachOutcome, Topic, TopicConfig};
