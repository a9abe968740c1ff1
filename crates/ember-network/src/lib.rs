//! # ember-network
//!
//! Peer-facing primitives for the ember node.
//!
//! This crate provides:
//! - Peer identifiers and handshake status messages
//! - The peer session surface consumed by the sync layer
//! - Channel bookkeeping for the connection lifecycle
//! - The discovery registry and its listener interface

mod channel;
pub mod discovery;
mod error;
mod message;
mod peer;

pub use channel::Channel;
pub use discovery::{DiscoverListener, Node, NodeHandler, NodeManager, NodeStatistics};
pub use error::{NetworkError, NetworkResult};
pub use message::{PeerCommand, Status};
pub use peer::{NodeId, PeerHandle, PeerSession};

/// Requests an outbound connection to a node. Fire and forget: the
/// transport reports the result through its own channel lifecycle.
pub trait Connector: Send + Sync {
    fn connect(&self, node: &Node);
}

/// Default devp2p listen port.
pub const DEFAULT_PORT: u16 = 30303;

/// Protocol version advertised in the status message.
pub const PROTOCOL_VERSION: u8 = 61;
