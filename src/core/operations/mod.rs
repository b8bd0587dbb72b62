// src/core/operations/mod.rs

//! Request/response operations multiplexed over the connection by correlation id.

use crate::core::ConnectionError;
use crate::core::inspection::InspectionResult;
use crate::core::protocol::TcpPackage;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

pub mod request;
pub mod tracker;

pub use request::RequestOperation;
pub use tracker::OperationTracker;

/// The capability the engine needs from a concrete operation (read a stream,
/// append events, ...). The tracker never looks past this trait.
pub trait Operation: Send {
    /// Builds the request for one attempt. Every attempt gets a fresh correlation id.
    fn create_package(&self, correlation_id: Uuid) -> TcpPackage;

    /// Interprets a response. The operation resolves or fails its caller itself
    /// before returning `EndOperation`.
    fn inspect_package(&mut self, package: &TcpPackage) -> InspectionResult;

    /// Fails the caller. Called at most once, by the engine, for outcomes the
    /// operation cannot observe itself (retries exhausted, timeout, shutdown).
    fn fail(&mut self, error: ConnectionError);

    /// Short human-readable description used in logs and errors.
    fn description(&self) -> String;
}

/// An operation together with its retry and timeout bookkeeping.
pub struct OperationItem {
    /// Creation order, used to re-send retried operations in submission order.
    pub(crate) seq_no: u64,
    pub correlation_id: Uuid,
    /// The transport the current attempt was sent on, if any.
    pub connection_id: Option<Uuid>,
    pub operation: Box<dyn Operation>,
    /// Negative means unlimited.
    pub max_retries: i32,
    /// Zero disables the timeout check for this item.
    pub timeout: Duration,
    pub retry_count: i32,
    pub created_at: Instant,
    pub last_updated: Instant,
}

impl OperationItem {
    pub fn new(
        seq_no: u64,
        operation: Box<dyn Operation>,
        max_retries: i32,
        timeout: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            seq_no,
            correlation_id: Uuid::new_v4(),
            connection_id: None,
            operation,
            max_retries,
            timeout,
            retry_count: 0,
            created_at: now,
            last_updated: now,
        }
    }
}

impl fmt::Display for OperationItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Operation {} ({}): {}, retry count: {}, created: {:?} ago, last updated: {:?} ago",
            self.correlation_id,
            self.seq_no,
            self.operation.description(),
            self.retry_count,
            self.created_at.elapsed(),
            self.last_updated.elapsed(),
        )
    }
}
