// src/core/transport/tcp.rs

//! The production transport: a framed tokio `TcpStream`.

use super::{Transport, TransportEvents, TransportFactory};
use crate::core::ConnectionError;
use crate::core::protocol::{TcpPackage, TcpPackageCodec};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Work handed from the actor to the connection task.
enum Outbound {
    Package(TcpPackage),
    Close(String),
}

/// A single TCP connection. All socket I/O happens on a dedicated task; the
/// methods here only enqueue work for it.
pub struct TcpTransport {
    connection_id: Uuid,
    remote_endpoint: SocketAddr,
    local_endpoint: Mutex<Option<SocketAddr>>,
    closed: AtomicBool,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TcpTransport {
    /// Spawns the connection task and returns immediately. The outcome of the
    /// connect attempt is reported through `events`.
    pub fn connect(
        remote_endpoint: SocketAddr,
        connect_timeout: Duration,
        events: TransportEvents,
    ) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            connection_id: events.connection_id(),
            remote_endpoint,
            local_endpoint: Mutex::new(None),
            closed: AtomicBool::new(false),
            outbound,
        });

        tokio::spawn(run_connection(
            transport.clone(),
            outbound_rx,
            events,
            connect_timeout,
        ));
        transport
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Transport for TcpTransport {
    fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    fn remote_endpoint(&self) -> SocketAddr {
        self.remote_endpoint
    }

    fn local_endpoint(&self) -> Option<SocketAddr> {
        *self.local_endpoint.lock()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn send(&self, package: TcpPackage) {
        if self.outbound.send(Outbound::Package(package)).is_err() {
            debug!(
                "Connection {}: send after connection task ended, package discarded.",
                self.connection_id
            );
        }
    }

    fn close(&self, reason: &str) {
        self.mark_closed();
        // The task may already be gone, which is just as closed.
        let _ = self.outbound.send(Outbound::Close(reason.to_string()));
    }
}

/// Drives one connection from connect to close. Always ends by reporting `closed`.
async fn run_connection(
    transport: Arc<TcpTransport>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: TransportEvents,
    connect_timeout: Duration,
) {
    let remote = transport.remote_endpoint;
    let id = transport.connection_id;

    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(remote)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("Connection {id}: failed to connect to {remote}: {e}");
            transport.mark_closed();
            events.closed();
            return;
        }
        Err(_) => {
            warn!("Connection {id}: connect to {remote} timed out after {connect_timeout:?}");
            transport.mark_closed();
            events.closed();
            return;
        }
    };

    if transport.is_closed() {
        debug!("Connection {id}: closed while connecting to {remote}.");
        events.closed();
        return;
    }

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Connection {id}: could not set TCP_NODELAY: {e}");
    }
    *transport.local_endpoint.lock() = stream.local_addr().ok();
    info!("Connection {id}: connected to {remote}.");
    events.connected();

    let mut framed = Framed::new(stream, TcpPackageCodec);
    loop {
        tokio::select! {
            inbound = framed.next() => match inbound {
                Some(Ok(package)) => events.package(package),
                Some(Err(ConnectionError::Io(e))) => {
                    info!("Connection {id}: I/O error from {remote}: {e}");
                    break;
                }
                Some(Err(e)) => {
                    error!("Connection {id}: invalid package from {remote}: {e}");
                    events.error(e);
                    break;
                }
                None => {
                    info!("Connection {id}: closed by {remote}.");
                    break;
                }
            },
            command = outbound.recv() => match command {
                Some(Outbound::Package(package)) => {
                    let command = package.command;
                    match framed.send(package).await {
                        Ok(()) => {}
                        Err(ConnectionError::Io(e)) => {
                            info!("Connection {id}: write to {remote} failed: {e}");
                            break;
                        }
                        Err(e) => warn!("Connection {id}: could not encode {command}: {e}"),
                    }
                }
                Some(Outbound::Close(reason)) => {
                    info!("Connection {id}: closing connection to {remote}: {reason}");
                    break;
                }
                None => break,
            },
        }
    }

    transport.mark_closed();
    if let Err(e) = framed.close().await {
        debug!("Connection {id}: error while shutting down: {e}");
    }
    events.closed();
}

/// Creates a `TcpTransport` per connection attempt.
#[derive(Debug, Clone)]
pub struct TcpTransportFactory {
    connect_timeout: Duration,
}

impl TcpTransportFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl TransportFactory for TcpTransportFactory {
    fn create(&self, endpoint: SocketAddr, events: TransportEvents) -> Arc<dyn Transport> {
        TcpTransport::connect(endpoint, self.connect_timeout, events)
    }
}
