// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "fanout";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "FANOUT_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "FANOUT_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "FANOUT_LOG";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 8000;

// =============================================================================
// Environment Variables - Topics
// =============================================================================

/// Environment variable for replay ring capacity
pub const ENV_REPLAY_CAPACITY: &str = "FANOUT_REPLAY_CAPACITY";

/// Environment variable for ingest queue capacity
pub const ENV_QUEUE_CAPACITY: &str = "FANOUT_QUEUE_CAPACITY";

/// Environment variable for delivery batch size
pub const ENV_BATCH_SIZE: &str = "FANOUT_BATCH_SIZE";

/// Environment variable for delivery batch timeout in milliseconds
pub const ENV_BATCH_TIMEOUT_MS: &str = "FANOUT_BATCH_TIMEOUT_MS";

/// Environment variable for per-subscriber send timeout in milliseconds
pub const ENV_SEND_TIMEOUT_MS: &str = "FANOUT_SEND_TIMEOUT_MS";

// =============================================================================
// Topic Defaults
// =============================================================================

/// Default replay ring capacity (messages retained per topic)
pub const DEFAULT_REPLAY_CAPACITY: usize = 100;

/// Default ingest queue capacity (message count)
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default delivery batch size
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default delivery batch timeout in milliseconds
pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 20;

/// Default per-subscriber send timeout in milliseconds
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 500;

/// Maximum rolling metric samples retained per topic (latency, batch size)
pub const METRICS_MAX_SAMPLES: usize = 1_000;

/// Minimum wait the delivery worker blocks for when a batch window is
/// already exhausted
pub const WORKER_MIN_WAIT_MS: u64 = 1;

/// Backoff after an unexpected delivery worker error
pub const WORKER_ERROR_BACKOFF_MS: u64 = 100;

// =============================================================================
// Topic Names
// =============================================================================

/// Maximum topic name length
pub const TOPIC_NAME_MAX_LEN: usize = 255;

// =============================================================================
// WebSocket Sessions
// =============================================================================

/// Outbound frame queue capacity per session. A stalled client fills this
/// and back-pressures into the per-subscriber send timeout.
pub const WS_OUTBOUND_CAPACITY: usize = 256;

/// Maximum `last_n` a subscribe frame may request
pub const MAX_REPLAY_REQUEST: u32 = 1_000;

// =============================================================================
// Request Body Limits
// =============================================================================

/// Body limit for control-plane requests (1 MB)
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

// =============================================================================
// Shutdown
// =============================================================================

/// Grace period after the shutdown signal before topic teardown begins,
/// allowing in-flight acks to drain
pub const SHUTDOWN_GRACE_MS: u64 = 500;

/// Timeout waiting for registered background tasks during shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 5;
