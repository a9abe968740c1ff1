//! Block, transaction and queue-wrapper types.

use crate::{BlockHash, TotalDifficulty};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A transaction as carried over the wire and through the broadcast
/// path. Payload decoding happens outside the sync core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender account nonce.
    pub nonce: u64,
    /// Raw encoded payload.
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Create a transaction from its raw payload.
    pub fn new(nonce: u64, payload: Vec<u8>) -> Self {
        Self { nonce, payload }
    }
}

/// A block as exchanged during synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block height.
    pub number: u64,
    /// Hash of this block.
    pub hash: BlockHash,
    /// Hash of the parent block.
    pub parent_hash: BlockHash,
    /// Difficulty contribution of this block.
    pub difficulty: TotalDifficulty,
    /// Creation timestamp, unix seconds.
    pub timestamp: u64,
    /// Included transactions.
    pub transactions: Vec<Transaction>,
}

/// A block pending import, parked between download and the importer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockWrapper {
    /// The wrapped block.
    pub block: Block,
    /// Whether the block arrived via a NewBlock announcement rather
    /// than regular sync.
    pub is_new_block: bool,
    /// Receipt time, unix epoch milliseconds. Kept as wall-clock time
    /// so the value stays meaningful across restarts.
    pub received_at: u64,
}

impl BlockWrapper {
    /// Wrap a block obtained through regular synchronization.
    pub fn new(block: Block) -> Self {
        Self {
            block,
            is_new_block: false,
            received_at: now_millis(),
        }
    }

    /// Wrap a block announced via NewBlock.
    pub fn new_announced(block: Block) -> Self {
        Self {
            block,
            is_new_block: true,
            received_at: now_millis(),
        }
    }

    /// Block height.
    pub fn number(&self) -> u64 {
        self.block.number
    }

    /// Block hash.
    pub fn hash(&self) -> BlockHash {
        self.block.hash
    }

    /// Parent block hash.
    pub fn parent_hash(&self) -> BlockHash {
        self.block.parent_hash
    }

    /// Milliseconds elapsed since the block was received.
    pub fn time_since_receiving(&self) -> u64 {
        now_millis().saturating_sub(self.received_at)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
