//! Protocol-level messages exchanged with peers.

use ember_core::{BlockHash, TotalDifficulty, Transaction};

/// Status message exchanged during the protocol handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Protocol version the remote speaks.
    pub protocol_version: u8,
    /// Network the remote is on.
    pub network_id: u64,
    /// Total difficulty of the remote's best chain.
    pub total_difficulty: TotalDifficulty,
    /// Hash of the remote's best block.
    pub best_hash: BlockHash,
    /// Hash of the remote's genesis block.
    pub genesis_hash: BlockHash,
}

/// Commands a session forwards to its transport task.
///
/// The transport resolves retrieval starting points from the shared
/// hash store when a round begins.
#[derive(Debug, Clone)]
pub enum PeerCommand {
    /// Begin a hash retrieval round, asking for at most `max_hashes`
    /// per request.
    StartHashRetrieval { max_hashes: usize },
    /// Begin fetching blocks for hashes pending in the hash store.
    StartBlockRetrieval,
    /// Forward a transaction to the remote.
    SendTransaction(Transaction),
    /// Close the connection.
    Disconnect,
}
