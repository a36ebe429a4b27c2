//! Directory server
//!
//! Records every `JOIN` (last writer wins per key) and answers with the full
//! membership. Entries are never removed.

use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::p2p::cluster::Membership;
use crate::p2p::network::{Listener, MessageHandler, NetworkMessage};
use crate::p2p::{NetworkConfig, P2PResult};

#[derive(Debug, Default)]
struct Registry {
    members: RwLock<Membership>,
}

#[async_trait]
impl MessageHandler for Registry {
    async fn handle(&self, message: NetworkMessage, remote: SocketAddr) -> Option<NetworkMessage> {
        match message {
            NetworkMessage::Join { key, address } => {
                let mut members = self.members.write().await;
                if let Some(previous) = members.insert(key, address) {
                    if previous != address {
                        info!("JOIN {} moved from {} to {}", key, previous, address);
                    }
                } else {
                    info!("JOIN {} at {} ({} members)", key, address, members.len());
                }
                Some(NetworkMessage::Members(members.clone()))
            }
            other => {
                debug!("Directory ignoring {} from {}", other.kind(), remote);
                None
            }
        }
    }
}

/// The rendezvous process nodes join through
#[derive(Debug)]
pub struct DirectoryServer {
    listener: Listener,
    registry: Arc<Registry>,
}

impl DirectoryServer {
    pub async fn bind(addr: SocketAddr, config: NetworkConfig) -> P2PResult<Self> {
        let mut listener = Listener::bind(addr, config).await?;
        let registry = Arc::new(Registry::default());
        listener.serve(Arc::clone(&registry))?;
        info!("Directory listening on {}", listener.local_addr());
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Everything registered so far
    pub async fn members(&self) -> Membership {
        self.registry.members.read().await.clone()
    }

    pub async fn shutdown(mut self) {
        self.listener.shutdown().await;
        info!("Directory on {} shut down", self.listener.local_addr());
    }
}
