// src/core/actor/state.rs

//! Connection states, connecting phases and the records the actor keeps per phase.

use std::fmt;
use std::net::SocketAddr;
use tokio::time::Instant;
use uuid::Uuid;

/// The top-level state of a logical connection. Selects the handler for every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    Connecting,
    Connected,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Sub-state of `Connecting`. The declaration order is significant: heartbeats
/// only run once the phase is at least `ConnectionEstablishing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectingPhase {
    Invalid,
    Reconnecting,
    EndpointDiscovery,
    ConnectionEstablishing,
    Authentication,
    Connected,
}

impl fmt::Display for ConnectingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One authentication attempt. A new record is created per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthInfo {
    pub correlation_id: Uuid,
    pub time_stamp: Instant,
}

impl AuthInfo {
    pub fn new(correlation_id: Uuid, time_stamp: Instant) -> Self {
        Self {
            correlation_id,
            time_stamp,
        }
    }
}

/// A point-in-time view of the actor, answered through `Message::GetStats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub phase: ConnectingPhase,
    /// The id of the transport the actor currently tracks, if any.
    pub connection_id: Option<Uuid>,
    pub remote_endpoint: Option<SocketAddr>,
    pub active_operations: usize,
    pub waiting_operations: usize,
    pub active_subscriptions: usize,
    pub confirmed_subscriptions: usize,
    pub waiting_subscriptions: usize,
    /// Inbound packages accepted since the actor started.
    pub package_number: u64,
    pub reconnection_attempt: u32,
}
