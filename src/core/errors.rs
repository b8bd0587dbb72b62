// src/core/errors.rs

//! Defines the primary error type for the connection engine.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure the connection engine surfaces
/// to callers: failed operations, dropped subscriptions and connection shutdown.
///
/// I/O errors are wrapped in an `Arc` so the enum stays cheaply cloneable; the same
/// error is often handed to an observer and to every abandoned operation.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Connection '{0}' is not active")]
    NotActive(String),

    #[error("Connection '{0}' is already active")]
    AlreadyActive(String),

    #[error("Connection '{0}' has been closed")]
    Closed(String),

    /// An in-flight or pending item was abandoned because the connection closed.
    #[error("Connection '{0}' was closed before the request completed")]
    ConnectionClosed(String),

    #[error("Couldn't resolve target endpoint: {0}")]
    EndpointDiscovery(String),

    #[error("Retries limit reached for {item} after {retries} retries")]
    RetriesLimitReached { item: String, retries: i32 },

    #[error("Operation timed out: {0}")]
    OperationTimedOut(String),

    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Unexpected command '{0}' received")]
    UnexpectedCommand(String),

    #[error("Pending queue is full ({0} items waiting)")]
    QueueFull(usize),

    #[error("Protocol Error: {0}")]
    Protocol(String),

    /// An Operation or Subscription returned a decision it may never produce.
    #[error("Invalid inspection decision: {0}")]
    InvalidDecision(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(Arc::new(e))
    }
}

impl From<std::string::FromUtf8Error> for ConnectionError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        ConnectionError::Protocol(format!("invalid UTF-8 in package: {e}"))
    }
}
