// src/core/events.rs

//! Notifications the connection actor publishes to observers of a connection.

use crate::core::ConnectionError;
use std::net::SocketAddr;
use tokio::sync::broadcast;

/// The capacity of the broadcast channel for connection events. Observers that
/// fall further behind than this skip the oldest events.
pub const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The connection reached `Connected` on this endpoint.
    Connected(SocketAddr),
    /// A previously connected transport went away. Fires at most once per cycle.
    Disconnected(SocketAddr),
    /// A reconnection attempt is starting.
    Reconnecting,
    /// The server rejected the credentials, or never answered. The connection
    /// proceeds without authentication.
    AuthenticationFailed(String),
    ErrorOccurred(ConnectionError),
    /// Terminal. Nothing is published after this.
    Closed(String),
}

/// Creates the sender side of a connection's event bus.
pub fn event_bus() -> broadcast::Sender<ConnectionEvent> {
    let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
    sender
}
