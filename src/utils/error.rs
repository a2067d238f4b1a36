//! The `error` module defines the error types used across `spreadbus`.
//!
//! Stale publishes, late replies and unknown correlation ids are not errors:
//! they are dropped where they are detected. Only failures a caller can act on
//! are represented here.

use thiserror::Error;

/// Errors raised by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The transport handle was closed.
    #[error("transport closed")]
    Closed,

    /// Publishing a body to `topic` failed.
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// The broker worker is gone, so the job could not be queued or answered.
    #[error("broker worker has stopped")]
    BrokerClosed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("message codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
