//! Error types for Tidelog
//!
//! This module defines the main error type used throughout the broker core.
//! Framing errors are fatal to the connection that produced them; dispatch
//! errors are isolated to a single request; transport errors are decomposed
//! per replication group by the heartbeat manager.

use thiserror::Error;

/// Result type alias for Tidelog operations
pub type Result<T> = std::result::Result<T, TidelogError>;

/// Main error type for Tidelog
#[derive(Error, Debug)]
pub enum TidelogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Invalid request size: {0}")]
    InvalidRequestSize(i32),

    #[error("Request too large: size={size}, estimate={estimate}, allowed={allowed}")]
    RequestTooLarge {
        size: usize,
        estimate: usize,
        allowed: usize,
    },

    #[error("Invalid client ID: {0}")]
    InvalidClientId(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::raft::transport::TransportError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Server is shutting down")]
    ShuttingDown,
}

impl TidelogError {
    /// Create a framing error with a message
    pub fn framing(msg: impl Into<String>) -> Self {
        Self::Framing(msg.into())
    }

    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether this error is fatal to the connection that produced it
    ///
    /// Fatal errors close both halves of the connection. Non-fatal errors
    /// (dispatch failures) are answered with an error response in the
    /// request's ordering slot and the connection stays healthy.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Framing(_)
                | Self::InvalidRequestSize(_)
                | Self::RequestTooLarge { .. }
                | Self::InvalidClientId(_)
                | Self::ShuttingDown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_errors_are_fatal() {
        assert!(TidelogError::framing("bad frame").is_connection_fatal());
        assert!(TidelogError::InvalidRequestSize(-1).is_connection_fatal());
        assert!(TidelogError::RequestTooLarge {
            size: 1,
            estimate: 2,
            allowed: 1,
        }
        .is_connection_fatal());
        assert!(TidelogError::InvalidClientId("\u{fffd}".into()).is_connection_fatal());
    }

    #[test]
    fn test_dispatch_errors_are_not_fatal() {
        assert!(!TidelogError::Dispatch("handler failed".into()).is_connection_fatal());
        assert!(!TidelogError::RequestTimeout.is_connection_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = TidelogError::RequestTooLarge {
            size: 100,
            estimate: 8200,
            allowed: 4096,
        };
        let msg = err.to_string();
        assert!(msg.contains("8200"));
        assert!(msg.contains("4096"));
    }
}
