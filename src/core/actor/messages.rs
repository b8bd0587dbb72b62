// src/core/actor/messages.rs

//! Every input of the connection actor, whether it comes from the public API,
//! the periodic timer, a discovery task or a transport.

use super::state::ConnectionStats;
use crate::core::ConnectionError;
use crate::core::discovery::EndpointDiscoverer;
use crate::core::operations::Operation;
use crate::core::protocol::TcpPackage;
use crate::core::subscriptions::Subscription;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

pub type ConnectReply = oneshot::Sender<Result<(), ConnectionError>>;

pub enum Message {
    /// Begin endpoint discovery. `reply` completes once discovery has finished.
    StartConnection {
        discoverer: Arc<dyn EndpointDiscoverer>,
        reply: Option<ConnectReply>,
    },
    CloseConnection {
        reason: String,
        error: Option<ConnectionError>,
    },
    StartOperation {
        operation: Box<dyn Operation>,
        max_retries: i32,
        timeout: Duration,
    },
    StartSubscription {
        /// Caller-chosen key that stays stable across retries.
        key: u64,
        subscription: Box<dyn Subscription>,
        max_retries: i32,
        timeout: Duration,
    },
    Unsubscribe {
        key: u64,
    },
    /// Posted by the discovery task once an endpoint is known.
    EstablishTcpConnection {
        endpoint: SocketAddr,
    },
    TcpConnectionEstablished {
        connection_id: Uuid,
    },
    TcpConnectionError {
        connection_id: Uuid,
        error: ConnectionError,
    },
    TcpConnectionClosed {
        connection_id: Uuid,
    },
    HandleTcpPackage {
        connection_id: Uuid,
        package: TcpPackage,
    },
    TimerTick,
    GetStats {
        reply: oneshot::Sender<ConnectionStats>,
    },
}

impl Message {
    /// The message name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Message::StartConnection { .. } => "StartConnection",
            Message::CloseConnection { .. } => "CloseConnection",
            Message::StartOperation { .. } => "StartOperation",
            Message::StartSubscription { .. } => "StartSubscription",
            Message::Unsubscribe { .. } => "Unsubscribe",
            Message::EstablishTcpConnection { .. } => "EstablishTcpConnection",
            Message::TcpConnectionEstablished { .. } => "TcpConnectionEstablished",
            Message::TcpConnectionError { .. } => "TcpConnectionError",
            Message::TcpConnectionClosed { .. } => "TcpConnectionClosed",
            Message::HandleTcpPackage { .. } => "HandleTcpPackage",
            Message::TimerTick => "TimerTick",
            Message::GetStats { .. } => "GetStats",
        }
    }
}
