// src/core/subscriptions/tracker.rs

//! Tracks active and pending subscriptions by correlation id.

use super::{Subscription, SubscriptionDropReason, SubscriptionItem};
use crate::core::ConnectionError;
use crate::core::transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Owns every `SubscriptionItem` of a connection. Mirrors `OperationTracker`, except
/// that confirmed subscriptions stay tracked until they are dropped.
pub struct SubscriptionTracker {
    connection_name: String,
    active: HashMap<Uuid, SubscriptionItem>,
    waiting: VecDeque<SubscriptionItem>,
    retry_pending: Vec<SubscriptionItem>,
    max_queue_size: usize,
}

impl SubscriptionTracker {
    pub fn new(connection_name: impl Into<String>, max_queue_size: usize) -> Self {
        Self {
            connection_name: connection_name.into(),
            active: HashMap::new(),
            waiting: VecDeque::new(),
            retry_pending: Vec::new(),
            max_queue_size,
        }
    }

    pub fn item(
        &self,
        key: u64,
        subscription: Box<dyn Subscription>,
        max_retries: i32,
        timeout: Duration,
    ) -> SubscriptionItem {
        SubscriptionItem::new(key, subscription, max_retries, timeout)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn confirmed_count(&self) -> usize {
        self.active.values().filter(|item| item.is_subscribed).count()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len() + self.retry_pending.len()
    }

    pub fn get_active_subscription(
        &mut self,
        correlation_id: &Uuid,
    ) -> Option<&mut SubscriptionItem> {
        self.active.get_mut(correlation_id)
    }

    pub fn enqueue_subscription(&mut self, mut item: SubscriptionItem) {
        if self.waiting.len() >= self.max_queue_size {
            warn!(
                "Connection '{}': pending queue full, rejecting {}.",
                self.connection_name,
                item.subscription.description()
            );
            item.subscription.drop_subscription(
                SubscriptionDropReason::SubscribingError,
                Some(ConnectionError::QueueFull(self.waiting.len())),
            );
            return;
        }
        debug!(
            "Connection '{}': enqueueing {}.",
            self.connection_name, item
        );
        self.waiting.push_back(item);
    }

    /// Sends the subscribe request on `transport` and starts tracking the item.
    pub fn start_subscription(&mut self, mut item: SubscriptionItem, transport: &dyn Transport) {
        if item.is_subscribed {
            // Re-subscribing a confirmed subscription would deliver events twice.
            warn!(
                "Connection '{}': {} is already confirmed, dropping instead of re-subscribing.",
                self.connection_name, item
            );
            item.subscription
                .drop_subscription(SubscriptionDropReason::SubscribingError, None);
            return;
        }

        item.connection_id = Some(transport.connection_id());
        item.last_updated = Instant::now();
        let package = item.subscription.create_subscribe_package(item.correlation_id);
        debug!(
            "Connection '{}': starting {} with {}.",
            self.connection_name, item, package.command
        );
        self.active.insert(item.correlation_id, item);
        transport.send(package);
    }

    pub fn remove_subscription(&mut self, correlation_id: &Uuid) -> Option<SubscriptionItem> {
        let removed = self.active.remove(correlation_id);
        if removed.is_none() {
            debug!(
                "Connection '{}': subscription {} was not active, nothing to remove.",
                self.connection_name, correlation_id
            );
        }
        removed
    }

    pub fn schedule_subscription_retry(&mut self, correlation_id: &Uuid) {
        let Some(mut item) = self.remove_subscription(correlation_id) else {
            return;
        };

        item.retry_count = item.retry_count.saturating_add(1);
        if item.max_retries >= 0 && item.retry_count > item.max_retries {
            let retries = item.retry_count - 1;
            warn!(
                "Connection '{}': retries limit reached for {}.",
                self.connection_name, item
            );
            let description = item.subscription.description();
            item.subscription.drop_subscription(
                SubscriptionDropReason::SubscribingError,
                Some(ConnectionError::RetriesLimitReached {
                    item: description,
                    retries,
                }),
            );
            return;
        }

        debug!(
            "Connection '{}': scheduling retry #{} for {}.",
            self.connection_name, item.retry_count, item
        );
        self.retry_pending.push(item);
    }

    pub fn schedule_waiting_subscriptions(&mut self, transport: &dyn Transport) {
        if !self.retry_pending.is_empty() {
            let mut pending = std::mem::take(&mut self.retry_pending);
            pending.sort_by_key(|item| item.key);
            for mut item in pending {
                item.correlation_id = Uuid::new_v4();
                self.start_subscription(item, transport);
            }
        }

        while let Some(item) = self.waiting.pop_front() {
            self.start_subscription(item, transport);
        }
    }

    /// Drops every confirmed subscription that was bound to the closed transport.
    /// Unconfirmed ones stay tracked and are retried on the next connection.
    pub fn purge_subscribed_and_dropped_subscriptions(&mut self, connection_id: Uuid) {
        let stale: Vec<Uuid> = self
            .active
            .values()
            .filter(|item| item.is_subscribed && item.connection_id == Some(connection_id))
            .map(|item| item.correlation_id)
            .collect();

        for id in stale {
            if let Some(mut item) = self.active.remove(&id) {
                info!(
                    "Connection '{}': dropping {} after its connection closed.",
                    self.connection_name, item
                );
                item.subscription.connection_closed();
            }
        }
    }

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
            } else if !item.is_subscribed
                && !item.timeout.is_zero()
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
                    "Connection '{}': subscription never got confirmation from the server: {}.",
                    self.connection_name, item
                );
                let description = item.subscription.description();
                item.subscription.drop_subscription(
                    SubscriptionDropReason::SubscribingError,
                    Some(ConnectionError::OperationTimedOut(description)),
                );
            }
        }

        for id in to_retry {
            self.schedule_subscription_retry(&id);
        }

        self.schedule_waiting_subscriptions(transport);
    }

    /// Handles an unsubscribe request from the public handle. A subscription that is
    /// live on `transport` is asked to unsubscribe and stays tracked until the server
    /// confirms the drop; anything else is dropped right away.
    pub fn unsubscribe(&mut self, key: u64, transport: Option<&dyn Transport>) {
        let active_id = self
            .active
            .values()
            .find(|item| item.key == key)
            .map(|item| (item.correlation_id, item.connection_id));

        if let Some((correlation_id, connection_id)) = active_id {
            if let Some(transport) = transport
                && connection_id == Some(transport.connection_id())
            {
                if let Some(item) = self.active.get(&correlation_id) {
                    debug!(
                        "Connection '{}': unsubscribing {}.",
                        self.connection_name, item
                    );
                    transport.send(item.subscription.create_unsubscribe_package(correlation_id));
                }
                return;
            }
            if let Some(mut item) = self.active.remove(&correlation_id) {
                item.subscription
                    .drop_subscription(SubscriptionDropReason::Unsubscribed, None);
            }
            return;
        }

        let parked = if let Some(pos) = self.waiting.iter().position(|item| item.key == key) {
            self.waiting.remove(pos)
        } else if let Some(pos) = self.retry_pending.iter().position(|item| item.key == key) {
            Some(self.retry_pending.remove(pos))
        } else {
            None
        };

        match parked {
            Some(mut item) => {
                debug!(
                    "Connection '{}': {} unsubscribed before it was sent.",
                    self.connection_name, item
                );
                item.subscription
                    .drop_subscription(SubscriptionDropReason::Unsubscribed, None);
            }
            None => debug!(
                "Connection '{}': unsubscribe for unknown subscription key {}.",
                self.connection_name, key
            ),
        }
    }

    /// Drops every tracked subscription; the connection is going away.
    pub fn clean_up(&mut self) {
        let error = ConnectionError::ConnectionClosed(self.connection_name.clone());
        let active = self.active.drain().map(|(_, item)| item);
        let retrying = self.retry_pending.drain(..);
        let waiting = self.waiting.drain(..);

        for mut item in active.chain(retrying).chain(waiting) {
            item.subscription
                .drop_subscription(SubscriptionDropReason::ConnectionClosed, Some(error.clone()));
        }
    }
}
