// src/connection/subscription.rs

use crate::core::actor::Message;
use tokio::sync::mpsc;
use tracing::debug;

/// Refers to a subscription started through `Connection`. Dropping the handle
/// does not unsubscribe; the subscription lives until it is dropped by the
/// server, the connection closes, or `unsubscribe` is called.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    key: u64,
    sender: mpsc::WeakUnboundedSender<Message>,
}

impl SubscriptionHandle {
    pub(crate) fn new(key: u64, sender: mpsc::WeakUnboundedSender<Message>) -> Self {
        Self { key, sender }
    }

    /// The key identifying this subscription for its whole life, across retries.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Asks the server to stop the subscription. Completion is observed as a
    /// `SubscriptionEvent::Dropped` on the subscription's event channel.
    pub fn unsubscribe(&self) {
        let posted = self
            .sender
            .upgrade()
            .is_some_and(|sender| sender.send(Message::Unsubscribe { key: self.key }).is_ok());
        if !posted {
            debug!(
                "Unsubscribe for subscription {} ignored: connection is gone.",
                self.key
            );
        }
    }
}
