// src/core/operations/tracker.rs

//! Tracks in-flight and pending operations by correlation id.

use super::{Operation, OperationItem};
use crate::core::ConnectionError;
use crate::core::transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Owns every `OperationItem` of a connection.
///
/// Items live in exactly one of three places: `active` (sent, awaiting a response),
/// `waiting` (submitted while not connected) or `retry_pending` (a retry was
/// scheduled; re-sent on the next `schedule_waiting_operations`).
pub struct OperationTracker {
    connection_name: String,
    active: HashMap<Uuid, OperationItem>,
    waiting: VecDeque<OperationItem>,
    retry_pending: Vec<OperationItem>,
    max_queue_size: usize,
    next_seq_no: u64,
}

impl OperationTracker {
    pub fn new(connection_name: impl Into<String>, max_queue_size: usize) -> Self {
        Self {
            connection_name: connection_name.into(),
            active: HashMap::new(),
            waiting: VecDeque::new(),
            retry_pending: Vec::new(),
            max_queue_size,
            next_seq_no: 0,
        }
    }

    /// Wraps an operation into a trackable item.
    pub fn item(
        &mut self,
        operation: Box<dyn Operation>,
        max_retries: i32,
        timeout: Duration,
    ) -> OperationItem {
        let seq_no = self.next_seq_no;
        self.next_seq_no += 1;
        OperationItem::new(seq_no, operation, max_retries, timeout)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len() + self.retry_pending.len()
    }

    pub fn total_count(&self) -> usize {
        self.active_count() + self.waiting_count()
    }

    pub fn get_active_operation(&mut self, correlation_id: &Uuid) -> Option<&mut OperationItem> {
        self.active.get_mut(correlation_id)
    }

    /// Parks an operation until a transport is available. Fails it instead when the
    /// waiting queue is already at `max_queue_size`.
    pub fn enqueue_operation(&mut self, mut item: OperationItem) {
        if self.waiting.len() >= self.max_queue_size {
            warn!(
                "Connection '{}': pending queue full, rejecting {}.",
                self.connection_name,
                item.operation.description()
            );
            item.operation
                .fail(ConnectionError::QueueFull(self.waiting.len()));
            return;
        }
        debug!(
            "Connection '{}': enqueueing {}.",
            self.connection_name, item
        );
        self.waiting.push_back(item);
    }

    /// Sends an operation on `transport` and starts tracking it.
    pub fn schedule_operation(&mut self, mut item: OperationItem, transport: &dyn Transport) {
        item.connection_id = Some(transport.connection_id());
        item.last_updated = Instant::now();
        let package = item.operation.create_package(item.correlation_id);
        debug!(
            "Connection '{}': sending {} as {}.",
            self.connection_name, item, package.command
        );
        self.active.insert(item.correlation_id, item);
        transport.send(package);
    }

    pub fn remove_operation(&mut self, correlation_id: &Uuid) -> Option<OperationItem> {
        let removed = self.active.remove(correlation_id);
        if removed.is_none() {
            debug!(
                "Connection '{}': operation {} was not active, nothing to remove.",
                self.connection_name, correlation_id
            );
        }
        removed
    }

    /// Takes an active operation out of tracking and either fails it, when its retry
    /// budget is exhausted, or parks it for re-sending with a new correlation id.
    pub fn schedule_operation_retry(&mut self, correlation_id: &Uuid) {
        let Some(item) = self.remove_operation(correlation_id) else {
            return;
        };
        self.retry_item(item);
    }

    fn retry_item(&mut self, mut item: OperationItem) {
        item.retry_count = item.retry_count.saturating_add(1);
        if item.max_retries >= 0 && item.retry_count > item.max_retries {
            let retries = item.retry_count - 1;
            warn!(
                "Connection '{}': retries limit reached for {}.",
                self.connection_name, item
            );
            let description = item.operation.description();
            item.operation
                .fail(ConnectionError::RetriesLimitReached {
                    item: description,
                    retries,
                });
            return;
        }
        debug!(
            "Connection '{}': scheduling retry #{} for {}.",
            self.connection_name, item.retry_count, item
        );
        self.retry_pending.push(item);
    }

    /// Sends everything parked for retry (in submission order) and then everything
    /// that was waiting for a connection.
    pub fn schedule_waiting_operations(&mut self, transport: &dyn Transport) {
        if !self.retry_pending.is_empty() {
            let mut pending = std::mem::take(&mut self.retry_pending);
            pending.sort_by_key(|item| item.seq_no);
            for mut item in pending {
                item.correlation_id = Uuid::new_v4();
                self.schedule_operation(item, transport);
            }
        }

        while let Some(item) = self.waiting.pop_front() {
            self.schedule_operation(item, transport);
        }
    }

    /// Retries operations orphaned by a previous transport and handles operations
    /// that got no response within their timeout, then flushes all pending work.
    pub fn check_timeouts_and_retry(
        &mut self,
        transport: &dyn Transport,
        fail_on_no_server_response: bool,
    ) {
        let now = Instant::now();
        let current = transport.connection_id();
        let mut to_retry = Vec::new();
        let mut to_fail = Vec::new();

        for (id, item) in &self.active {
            if item.connection_id != Some(current) {
                to_retry.push(*id);
            } else if !item.timeout.is_zero()
                && now.duration_since(item.last_updated) > item.timeout
            {
                if fail_on_no_server_response {
                    to_fail.push(*id);
                } else {
                    to_retry.push(*id);
                }
            }
        }

        for id in to_fail {
            if let Some(mut item) = self.active.remove(&id) {
                warn!(
                    "Connection '{}': operation never got a response from the server: {}.",
                    self.connection_name, item
                );
                let description = item.operation.description();
                item.operation
                    .fail(ConnectionError::OperationTimedOut(description));
            }
        }

        for id in to_retry {
            self.schedule_operation_retry(&id);
        }

        self.schedule_waiting_operations(transport);
    }

    /// Fails every tracked operation; the connection is going away.
    pub fn clean_up(&mut self) {
        let error = ConnectionError::ConnectionClosed(self.connection_name.clone());
        let active = self.active.drain().map(|(_, item)| item);
        let retrying = self.retry_pending.drain(..);
        let waiting = self.waiting.drain(..);

        for mut item in active.chain(retrying).chain(waiting) {
            item.operation.fail(error.clone());
        }
    }
}
