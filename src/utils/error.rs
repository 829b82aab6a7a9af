//! The `error` module defines the error types surfaced by `paystream`.
//!
//! Almost every broker operation is infallible by construction: closing an
//! unknown listener or deleting an unknown topic is a no-op. The only
//! condition a caller can observe is a control queue that will not take a
//! request right now, which the non-blocking `try_*` variants report.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    /// The control loop's inbound queue is at capacity.
    #[error("control queue is full")]
    QueueFull,

    /// The control loop has stopped and accepts no more requests.
    #[error("control loop has shut down")]
    Closed,
}

impl<T> From<tokio::sync::mpsc::error::TrySendError<T>> for BrokerError {
    fn from(err: tokio::sync::mpsc::error::TrySendError<T>) -> Self {
        match err {
            tokio::sync::mpsc::error::TrySendError::Full(_) => BrokerError::QueueFull,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => BrokerError::Closed,
        }
    }
}

/// Failures while pushing frames to a WebSocket client.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode server message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("client connection closed")]
    Disconnected,
}
