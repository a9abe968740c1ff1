//! Network error types.

use thiserror::Error;

/// Network errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Malformed node identifier.
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    /// Malformed enode URL.
    #[error("invalid enode url: {0}")]
    InvalidEnode(String),

    /// Peer not found.
    #[error("peer not found: {0}")]
    PeerNotFound(String),
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;
