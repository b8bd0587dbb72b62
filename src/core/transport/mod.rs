// src/core/transport/mod.rs

//! The boundary between the connection actor and the physical socket.
//!
//! A transport never touches actor state. It reports everything that happens to
//! it through a `TransportEvents` sink, which turns each event into a message on
//! the actor's queue tagged with the transport's connection id.

use crate::core::ConnectionError;
use crate::core::actor::Message;
use crate::core::protocol::TcpPackage;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

pub mod tcp;

pub use tcp::{TcpTransport, TcpTransportFactory};

/// One physical connection to a node.
///
/// `send` and `close` must return immediately; completions arrive later as events.
pub trait Transport: Send + Sync {
    /// Unique per physical connection; identifies which socket an event came from.
    fn connection_id(&self) -> Uuid;

    fn remote_endpoint(&self) -> SocketAddr;

    /// Known only once the socket is connected.
    fn local_endpoint(&self) -> Option<SocketAddr>;

    fn is_closed(&self) -> bool;

    fn send(&self, package: TcpPackage);

    fn close(&self, reason: &str);
}

/// Creates transports on behalf of the actor. The returned transport starts
/// connecting on its own and reports through `events`.
pub trait TransportFactory: Send + Sync {
    fn create(&self, endpoint: SocketAddr, events: TransportEvents) -> Arc<dyn Transport>;
}

/// The event sink handed to a transport. Cloneable so a transport can share it
/// between its reader and writer halves.
#[derive(Clone)]
pub struct TransportEvents {
    connection_id: Uuid,
    sender: mpsc::UnboundedSender<Message>,
}

impl TransportEvents {
    pub(crate) fn new(connection_id: Uuid, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            connection_id,
            sender,
        }
    }

    /// The id the transport must report from `Transport::connection_id`.
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn connected(&self) {
        self.post(Message::TcpConnectionEstablished {
            connection_id: self.connection_id,
        });
    }

    pub fn package(&self, package: TcpPackage) {
        self.post(Message::HandleTcpPackage {
            connection_id: self.connection_id,
            package,
        });
    }

    pub fn error(&self, error: ConnectionError) {
        self.post(Message::TcpConnectionError {
            connection_id: self.connection_id,
            error,
        });
    }

    pub fn closed(&self) {
        self.post(Message::TcpConnectionClosed {
            connection_id: self.connection_id,
        });
    }

    fn post(&self, message: Message) {
        // The actor is gone once the owning connection is dropped; late events are moot.
        if self.sender.send(message).is_err() {
            trace!(
                "Dropping transport event for {}: actor has stopped.",
                self.connection_id
            );
        }
    }
}
