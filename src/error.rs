//! Error types for ream-bully

use std::path::PathBuf;
use thiserror::Error;

use crate::p2p::P2PError;

/// Main error type for ream-bully operations
#[derive(Error, Debug)]
pub enum BullyError {
    /// Protocol and networking errors
    #[error("P2P error: {0}")]
    P2P(#[from] P2PError),

    /// Configuration file could not be read or parsed
    #[error("Config error in {path}: {reason}")]
    Config {
        path: PathBuf,
        reason: String,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl BullyError {
    pub fn config(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        BullyError::Config {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for ream-bully operations
pub type BullyResult<T> = Result<T, BullyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p2p_errors_convert() {
        let err: BullyError = P2PError::DirectoryUnavailable("localhost:50600".to_string()).into();
        assert!(matches!(err, BullyError::P2P(P2PError::DirectoryUnavailable(_))));
        assert!(err.to_string().contains("localhost:50600"));
    }

    #[test]
    fn test_config_error_names_the_file() {
        let err = BullyError::config("/etc/bully.toml", "missing field");
        assert_eq!(err.to_string(), "Config error in /etc/bully.toml: missing field");
    }
}
