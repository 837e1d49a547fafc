//! Broker error types

use thiserror::Error;

/// Error type for topic and registry operations
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BrokerError {
    /// Topic name failed validation
    #[error(
        "invalid topic name '{0}': use 1-255 alphanumeric, underscore, hyphen or dot characters"
    )]
    NameInvalid(String),

    /// Topic does not exist
    #[error("topic '{0}' not found")]
    NotFound(String),
}

/// Error type for outbound sink operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The sink's transport is gone; no further sends can succeed
    #[error("sink closed")]
    Closed,
}
