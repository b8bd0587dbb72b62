// src/core/subscriptions/mod.rs

//! Long-lived subscriptions multiplexed over the connection by correlation id.

use crate::core::ConnectionError;
use crate::core::inspection::InspectionResult;
use crate::core::protocol::{TcpCommand, TcpPackage};
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

pub mod stream;
pub mod tracker;

pub use stream::{StreamSubscription, SubscriptionEvent};
pub use tracker::SubscriptionTracker;

/// Why a subscription stopped delivering events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionDropReason {
    Unsubscribed,
    ConnectionClosed,
    SubscribingError,
    ServerError,
    AccessDenied,
    NotAuthenticated,
}

impl fmt::Display for SubscriptionDropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The capability the engine needs from a concrete subscription.
pub trait Subscription: Send {
    fn create_subscribe_package(&self, correlation_id: Uuid) -> TcpPackage;

    fn create_unsubscribe_package(&self, correlation_id: Uuid) -> TcpPackage {
        TcpPackage::new(TcpCommand::UnsubscribeFromStream, correlation_id, Bytes::new())
    }

    fn inspect_package(&mut self, package: &TcpPackage) -> InspectionResult;

    /// Terminal notification; no further packages will be routed to this subscription.
    fn drop_subscription(&mut self, reason: SubscriptionDropReason, error: Option<ConnectionError>);

    /// The confirmed subscription lost its transport.
    fn connection_closed(&mut self) {
        self.drop_subscription(
            SubscriptionDropReason::ConnectionClosed,
            Some(ConnectionError::ConnectionClosed(
                "subscription transport closed".to_string(),
            )),
        );
    }

    fn description(&self) -> String;
}

/// A subscription together with its retry, timeout and confirmation bookkeeping.
pub struct SubscriptionItem {
    /// Stable across retries; the public handle refers to the subscription by it.
    pub key: u64,
    pub correlation_id: Uuid,
    pub connection_id: Option<Uuid>,
    pub subscription: Box<dyn Subscription>,
    pub max_retries: i32,
    pub timeout: Duration,
    pub retry_count: i32,
    /// False until the server confirms the subscription.
    pub is_subscribed: bool,
    pub created_at: Instant,
    pub last_updated: Instant,
}

impl SubscriptionItem {
    pub fn new(
        key: u64,
        subscription: Box<dyn Subscription>,
        max_retries: i32,
        timeout: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            key,
            correlation_id: Uuid::new_v4(),
            connection_id: None,
            subscription,
            max_retries,
            timeout,
            retry_count: 0,
            is_subscribed: false,
            created_at: now,
            last_updated: now,
        }
    }
}

impl fmt::Display for SubscriptionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Subscription {} (key {}): {}, subscribed: {}, retry count: {}, created: {:?} ago",
            self.correlation_id,
            self.key,
            self.subscription.description(),
            self.is_subscribed,
            self.retry_count,
            self.created_at.elapsed(),
        )
    }
}
