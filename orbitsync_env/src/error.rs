//! Error types for the orbitsync environment abstraction.

use thiserror::Error;

/// Errors that can occur while talking to sibling instances.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Send failed (connection refused, channel closed, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Target peer is unreachable
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    /// Envelope serialization/deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Peer answered with a non-success status
    #[error("Peer {peer} answered with HTTP {status}")]
    HttpStatus { peer: String, status: u16 },

    /// Endpoint string could not be parsed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates an unreachable error.
    pub fn unreachable(peer: impl std::fmt::Display) -> Self {
        Self::PeerUnreachable(peer.to_string())
    }
}
