//! Bully leader election over TCP
//!
//! Nodes join through a directory, elect the member with the largest
//! priority key, watch the leader with periodic probes and re-elect when it
//! disappears. An optional fault injector simulates crashes to exercise the
//! recovery paths.

pub mod types;
pub mod error;
pub mod network;
pub mod discovery;
pub mod consensus;
pub mod cluster;
pub mod node;

// Re-export core types and functions
pub use types::*;
pub use error::*;
pub use node::{BullyNode, NodeStats};

// Re-export network components
pub use network::{MessageKind, MessageProtocol, NetworkMessage, Transport};

// Re-export discovery components
pub use discovery::{DirectoryClient, DirectoryServer};

// Re-export consensus components
pub use consensus::{ElectionControl, ElectionOutcome, ElectionState};

// Re-export cluster components
pub use cluster::{FailureDetector, FaultInjector, Membership, MembershipView, ProbeOutcome};

use std::net::SocketAddr;

/// Start a node whose rank is derived from a `MM-DD` birthday
pub async fn start_node(birthday: &str, tiebreak: u64, config: NodeConfig) -> P2PResult<BullyNode> {
    let key = PriorityKey::from_birthday(birthday, tiebreak)?;
    BullyNode::start(key, config).await
}

/// Start a directory server on `addr`
pub async fn start_directory(addr: SocketAddr, config: NetworkConfig) -> P2PResult<DirectoryServer> {
    DirectoryServer::bind(addr, config).await
}
