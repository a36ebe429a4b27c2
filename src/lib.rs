//! # ream-bully
//!
//! A group member that elects its leader with the bully algorithm.
//!
//! Nodes discover each other through a directory, exchange `ELECT`,
//! `GOT_IT`, `I_AM_LEADER` and `PROBE` messages over short-lived TCP
//! connections, and converge on the member with the largest priority key.

#![warn(clippy::all)]

pub mod p2p;
pub mod error;
pub mod config;
/// Command-line interface and argument parsing
pub mod cli;
/// Command execution
pub mod commands;

// Re-export main types
pub use error::{BullyError, BullyResult};
pub use config::load_config;
pub use p2p::{
    BullyNode, DirectoryServer, ElectionOutcome, Membership, NodeConfig, NodeStats, P2PError,
    P2PResult, PriorityKey,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
