// src/connection/client.rs

//! Defines `Connection`, the handle applications use to drive a connection actor.

use super::SubscriptionHandle;
use crate::config::ConnectionSettings;
use crate::core::ConnectionError;
use crate::core::actor::{ConnectionActor, ConnectionStats, Message};
use crate::core::discovery::EndpointDiscoverer;
use crate::core::events::{ConnectionEvent, event_bus};
use crate::core::operations::{Operation, RequestOperation};
use crate::core::protocol::{TcpCommand, TcpPackage};
use crate::core::subscriptions::{StreamSubscription, Subscription, SubscriptionEvent};
use crate::core::transport::{TcpTransportFactory, TransportFactory};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

/// A logical connection to the event store.
///
/// Creating a `Connection` spawns its actor; nothing touches the network until
/// `connect` is called. Dropping it closes the connection.
pub struct Connection {
    name: String,
    settings: ConnectionSettings,
    sender: mpsc::UnboundedSender<Message>,
    events: broadcast::Sender<ConnectionEvent>,
    next_subscription_key: AtomicU64,
}

impl Connection {
    /// Creates a connection that uses real TCP sockets. Must be called within a
    /// tokio runtime.
    pub fn new(settings: ConnectionSettings) -> Self {
        let factory = Arc::new(TcpTransportFactory::new(settings.connect_timeout));
        Self::with_transport(settings, factory)
    }

    /// Creates a connection whose transports come from `factory`.
    pub fn with_transport(settings: ConnectionSettings, factory: Arc<dyn TransportFactory>) -> Self {
        let events = event_bus();
        let sender = ConnectionActor::spawn(settings.clone(), factory, events.clone());
        Self {
            name: settings.connection_name.clone(),
            settings,
            sender,
            events,
            next_subscription_key: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Starts the connection. Resolves once the first endpoint has been
    /// discovered, not once the connection is established; watch `events` for
    /// `ConnectionEvent::Connected`.
    pub async fn connect(&self, discoverer: Arc<dyn EndpointDiscoverer>) -> Result<(), ConnectionError> {
        let (reply, result) = oneshot::channel();
        self.post(Message::StartConnection {
            discoverer,
            reply: Some(reply),
        });
        result
            .await
            .map_err(|_| ConnectionError::Closed(self.name.clone()))?
    }

    /// Closes the connection, failing everything still in flight.
    pub fn close(&self, reason: impl Into<String>) {
        self.post(Message::CloseConnection {
            reason: reason.into(),
            error: None,
        });
    }

    pub fn start_operation(&self, operation: Box<dyn Operation>, max_retries: i32, timeout: Duration) {
        self.post(Message::StartOperation {
            operation,
            max_retries,
            timeout,
        });
    }

    /// Sends `command` and waits for `expected_response`, retrying and timing out
    /// according to the connection settings.
    pub async fn request(
        &self,
        command: TcpCommand,
        expected_response: TcpCommand,
        payload: impl Into<Bytes>,
    ) -> Result<TcpPackage, ConnectionError> {
        let (operation, result) = RequestOperation::new(command, expected_response, payload);
        self.start_operation(
            Box::new(operation),
            self.settings.max_retries,
            self.settings.operation_timeout,
        );
        result
            .await
            .map_err(|_| ConnectionError::Closed(self.name.clone()))?
    }

    /// Starts a custom subscription and returns a handle to stop it.
    pub fn start_subscription(
        &self,
        subscription: Box<dyn Subscription>,
        max_retries: i32,
        timeout: Duration,
    ) -> SubscriptionHandle {
        let key = self.next_subscription_key.fetch_add(1, Ordering::Relaxed);
        self.post(Message::StartSubscription {
            key,
            subscription,
            max_retries,
            timeout,
        });
        SubscriptionHandle::new(key, self.sender.downgrade())
    }

    /// Subscribes with a `StreamSubscription` and the connection's retry and
    /// timeout settings.
    pub fn subscribe(
        &self,
        command: TcpCommand,
        payload: impl Into<Bytes>,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let (subscription, events) = StreamSubscription::new(command, payload);
        let handle = self.start_subscription(
            Box::new(subscription),
            self.settings.max_retries,
            self.settings.operation_timeout,
        );
        (handle, events)
    }

    /// A new receiver of connection notifications. Only events published after
    /// this call are observed.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// A snapshot of the actor's state, taken after every previously posted
    /// message has been handled.
    pub async fn stats(&self) -> Result<ConnectionStats, ConnectionError> {
        let (reply, stats) = oneshot::channel();
        self.post(Message::GetStats { reply });
        stats
            .await
            .map_err(|_| ConnectionError::Closed(self.name.clone()))
    }

    fn post(&self, message: Message) {
        let name = message.name();
        if self.sender.send(message).is_err() {
            warn!(
                "Connection '{}': actor has stopped, {} discarded.",
                self.name, name
            );
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!("Connection '{}' dropped, closing.", self.name);
        self.post(Message::CloseConnection {
            reason: "Connection dropped.".into(),
            error: None,
        });
    }
}
