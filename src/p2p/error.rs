//! Error types for the bully node
//!
//! Peer and directory failures are never fatal: callers fold them into
//! their timeout-driven decisions and log them.

use std::net::SocketAddr;
use thiserror::Error;

/// Result type for P2P operations
pub type P2PResult<T> = Result<T, P2PError>;

/// Main error type for P2P operations
#[derive(Error, Debug, Clone)]
pub enum P2PError {
    /// Join or re-join with the directory failed
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// A peer did not answer (timeout, refused, empty or undecodable reply)
    #[error("Peer {addr} unreachable: {reason}")]
    PeerUnreachable { addr: SocketAddr, reason: String },

    /// An inbound frame could not be decoded
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The listener could not bind
    #[error("Bind error: {0}")]
    Bind(String),

    /// Connection-level I/O failure
    #[error("Connection error: {0}")]
    Io(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl P2PError {
    pub fn unreachable(addr: SocketAddr, reason: impl ToString) -> Self {
        P2PError::PeerUnreachable { addr, reason: reason.to_string() }
    }
}

impl From<std::io::Error> for P2PError {
    fn from(err: std::io::Error) -> Self {
        P2PError::Io(err.to_string())
    }
}

impl From<bincode::Error> for P2PError {
    fn from(err: bincode::Error) -> Self {
        P2PError::Serialization(err.to_string())
    }
}
