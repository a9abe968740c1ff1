//! Local chain tip tracking.

use ember_core::{Block, BlockHash, Chain, TotalDifficulty};
use ember_storage::{ColumnFamily, Database, StorageError, StorageResult};
use num_bigint::BigUint;
use parking_lot::RwLock;
use tracing::info;

const BEST_BLOCK_KEY: &[u8] = b"chain:best";
const TOTAL_DIFFICULTY_KEY: &[u8] = b"chain:td";

/// Hash of the mainnet genesis block.
pub const GENESIS_HASH: BlockHash = BlockHash([
    0xd4, 0xe5, 0x67, 0x40, 0xf8, 0x76, 0xae, 0xf8, 0xc0, 0x10, 0xb8, 0x6a, 0x40, 0xd5, 0xf5,
    0x67, 0x45, 0xa1, 0x18, 0xd0, 0x90, 0x6a, 0x34, 0xe6, 0x9a, 0xec, 0x8c, 0x0d, 0xb1, 0xcb,
    0x8f, 0xa3,
]);

/// The mainnet genesis block.
pub fn genesis_block() -> Block {
    Block {
        number: 0,
        hash: GENESIS_HASH,
        parent_hash: BlockHash::ZERO,
        difficulty: BigUint::from(17_179_869_184u64),
        timestamp: 0,
        transactions: Vec::new(),
    }
}

/// Outcome of offering a block to the local chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The block extended the chain.
    Imported,
    /// The block is already part of the chain.
    Exists,
    /// The block's parent is not known locally.
    NoParent,
}

/// Minimal chain-tip tracker backing the sync core.
///
/// Block validation and execution live outside this repository; the
/// tracker maintains only the tip linkage and cumulative difficulty the
/// importer and the sync machine need, persisted in the metadata
/// column family.
pub struct LocalChain {
    db: Database,
    tip: RwLock<Tip>,
}

struct Tip {
    best: Block,
    total_difficulty: TotalDifficulty,
}

impl LocalChain {
    /// Open the tracker, restoring the persisted tip or installing the
    /// genesis block.
    pub fn open(db: Database, genesis: Block) -> StorageResult<Self> {
        let tip = match db.get(ColumnFamily::Metadata, BEST_BLOCK_KEY)? {
            Some(bytes) => {
                let best: Block = bincode::deserialize(&bytes)?;
                let td_bytes = db
                    .get(ColumnFamily::Metadata, TOTAL_DIFFICULTY_KEY)?
                    .ok_or_else(|| {
                        StorageError::Corruption("best block persisted without difficulty".into())
                    })?;
                info!(number = best.number, hash = %best.hash.short(), "Chain tip restored");
                Tip {
                    best,
                    total_difficulty: BigUint::from_bytes_be(&td_bytes),
                }
            }
            None => {
                let total_difficulty = genesis.difficulty.clone();
                let encoded = bincode::serialize(&genesis)?;
                db.commit(|commit| {
                    commit.put(ColumnFamily::Metadata, BEST_BLOCK_KEY, &encoded);
                    commit.put(
                        ColumnFamily::Metadata,
                        TOTAL_DIFFICULTY_KEY,
                        total_difficulty.to_bytes_be(),
                    );
                })?;
                info!(hash = %genesis.hash.short(), "Chain initialized at genesis");
                Tip {
                    best: genesis,
                    total_difficulty,
                }
            }
        };

        Ok(Self {
            db,
            tip: RwLock::new(tip),
        })
    }

    /// Attempt to connect a block to the chain tip.
    pub fn try_import(&self, block: &Block) -> StorageResult<ImportOutcome> {
        let mut tip = self.tip.write();

        if block.number <= tip.best.number {
            return Ok(ImportOutcome::Exists);
        }
        if block.parent_hash != tip.best.hash || block.number != tip.best.number + 1 {
            return Ok(ImportOutcome::NoParent);
        }

        let total_difficulty = &tip.total_difficulty + &block.difficulty;
        let encoded = bincode::serialize(block)?;
        self.db.commit(|commit| {
            commit.put(ColumnFamily::Metadata, BEST_BLOCK_KEY, &encoded);
            commit.put(
                ColumnFamily::Metadata,
                TOTAL_DIFFICULTY_KEY,
                total_difficulty.to_bytes_be(),
            );
        })?;

        tip.best = block.clone();
        tip.total_difficulty = total_difficulty;
        Ok(ImportOutcome::Imported)
    }
}

impl Chain for LocalChain {
    fn total_difficulty(&self) -> TotalDifficulty {
        self.tip.read().total_difficulty.clone()
    }

    fn best_block(&self) -> Block {
        self.tip.read().best.clone()
    }
}
