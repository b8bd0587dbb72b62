// src/core/discovery.rs

//! Endpoint discovery: deciding which node the next transport connects to.

use crate::core::ConnectionError;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use tokio::net::lookup_host;
use tracing::debug;

/// Resolves the endpoint for the next connection attempt. `previous` is the
/// endpoint of the transport that was just lost, if any.
#[async_trait]
pub trait EndpointDiscoverer: Send + Sync {
    async fn discover(&self, previous: Option<SocketAddr>) -> Result<SocketAddr, ConnectionError>;
}

/// Always targets the same `host:port`. When the host name resolves to several
/// addresses, one other than `previous` is picked at random.
#[derive(Debug, Clone)]
pub struct StaticEndpointDiscoverer {
    host: String,
    port: u16,
}

impl StaticEndpointDiscoverer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl EndpointDiscoverer for StaticEndpointDiscoverer {
    async fn discover(&self, previous: Option<SocketAddr>) -> Result<SocketAddr, ConnectionError> {
        let target = format!("{}:{}", self.host, self.port);
        let addrs: Vec<SocketAddr> = lookup_host(&target)
            .await
            .map_err(|e| ConnectionError::EndpointDiscovery(format!("{target}: {e}")))?
            .collect();

        let candidates: Vec<SocketAddr> = match previous {
            Some(prev) if addrs.len() > 1 => {
                addrs.iter().copied().filter(|a| *a != prev).collect()
            }
            _ => addrs,
        };

        let chosen = candidates
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or_else(|| {
                ConnectionError::EndpointDiscovery(format!("{target} resolved to no addresses"))
            })?;
        debug!("Discovered endpoint {chosen} for {target}.");
        Ok(chosen)
    }
}
