//! Group discovery
//!
//! Nodes find each other through a single directory process: a `JOIN`
//! registers the caller's key and address, and the reply is the full
//! membership the directory has seen so far.

pub mod directory;

pub use directory::*;

use std::net::SocketAddr;
use tokio::net::lookup_host;
use tracing::debug;

use crate::p2p::cluster::Membership;
use crate::p2p::network::{NetworkMessage, Transport};
use crate::p2p::{NetworkConfig, P2PError, P2PResult, PriorityKey};

/// Client for the directory's `JOIN` exchange
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    address: String,
    transport: Transport,
}

impl DirectoryClient {
    /// `address` is `host:port`; it is resolved on every join
    pub fn new(address: String, config: NetworkConfig) -> Self {
        Self {
            address,
            transport: Transport::new(config),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Register `key` at `listen_addr` and return the directory's membership.
    ///
    /// Every failure is reported as `DirectoryUnavailable`.
    pub async fn join(&self, key: PriorityKey, listen_addr: SocketAddr) -> P2PResult<Membership> {
        let addr = self.resolve().await?;
        debug!("JOIN {} at {} -> {}", key, listen_addr, addr);

        let request = NetworkMessage::Join { key, address: listen_addr };
        match self.transport.request(addr, &request).await {
            Ok(NetworkMessage::Members(members)) => Ok(members),
            Ok(other) => Err(P2PError::DirectoryUnavailable(format!(
                "{} answered JOIN with {}",
                self.address,
                other.kind()
            ))),
            Err(e) => Err(P2PError::DirectoryUnavailable(format!("{}: {}", self.address, e))),
        }
    }

    async fn resolve(&self) -> P2PResult<SocketAddr> {
        let mut addrs = lookup_host(self.address.as_str())
            .await
            .map_err(|e| P2PError::DirectoryUnavailable(format!("{}: {}", self.address, e)))?;
        addrs.next().ok_or_else(|| {
            P2PError::DirectoryUnavailable(format!("{} resolved to no address", self.address))
        })
    }
}
