//! Ordered store of block hashes awaiting retrieval.

use crate::{ColumnFamily, Database, StorageError, StorageResult};
use ember_core::{BlockHash, TotalDifficulty};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use tracing::info;

/// Durable, ordered store of block hashes scheduled for block
/// retrieval, consumed from the front by downloading peers.
///
/// Also carries the sync-wide scalars tied to the current retrieval
/// round: the hash retrieval starts from and the highest total
/// difficulty observed so far. Those are in-memory only; the hash list
/// itself is persisted, so hashes left over from an interrupted run are
/// visible after a restart.
pub struct HashStore {
    db: Database,
    /// Pending hashes with their persisted sequence keys, front first.
    entries: Mutex<VecDeque<(i64, BlockHash)>>,
    best_hash: RwLock<Option<BlockHash>>,
    highest_total_difficulty: RwLock<Option<TotalDifficulty>>,
}

impl HashStore {
    /// Open the store, restoring pending hashes. With `reset` set,
    /// previously persisted entries are dropped first.
    pub fn open(db: Database, reset: bool) -> StorageResult<Self> {
        if reset {
            let dropped = db.clear(ColumnFamily::HashStore)?;
            if dropped > 0 {
                info!(dropped, "Resetting hash store");
            }
        }

        let mut loaded = Vec::new();
        for (key, value) in db.entries(ColumnFamily::HashStore)? {
            loaded.push((decode_sequence(&key)?, decode_hash(&value)?));
        }
        loaded.sort_by_key(|(sequence, _)| *sequence);

        if !loaded.is_empty() {
            info!(pending = loaded.len(), "Hash store restored pending hashes");
        }

        Ok(Self {
            db,
            entries: Mutex::new(loaded.into_iter().collect()),
            best_hash: RwLock::new(None),
            highest_total_difficulty: RwLock::new(None),
        })
    }

    /// Append a hash to the back of the store.
    pub fn add(&self, hash: &BlockHash) -> StorageResult<()> {
        let mut entries = self.entries.lock();
        let sequence = entries.back().map(|(s, _)| s + 1).unwrap_or(0);
        self.persist(sequence, hash)?;
        entries.push_back((sequence, *hash));
        Ok(())
    }

    /// Push a hash onto the front of the store, ahead of everything
    /// already pending.
    pub fn add_first(&self, hash: &BlockHash) -> StorageResult<()> {
        let mut entries = self.entries.lock();
        let sequence = entries.front().map(|(s, _)| s - 1).unwrap_or(0);
        self.persist(sequence, hash)?;
        entries.push_front((sequence, *hash));
        Ok(())
    }

    /// Append a batch of hashes in a single commit.
    pub fn add_batch(&self, hashes: &[BlockHash]) -> StorageResult<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        let mut entries = self.entries.lock();
        let mut sequence = entries.back().map(|(s, _)| s + 1).unwrap_or(0);
        let mut appended = Vec::with_capacity(hashes.len());
        for hash in hashes {
            appended.push((sequence, *hash));
            sequence += 1;
        }
        self.db.commit(|commit| {
            for (sequence, hash) in &appended {
                commit.put(ColumnFamily::HashStore, sequence.to_be_bytes(), hash.0);
            }
        })?;
        entries.extend(appended);
        Ok(())
    }

    /// Remove and return up to `count` hashes from the front.
    pub fn poll_batch(&self, count: usize) -> StorageResult<Vec<BlockHash>> {
        let mut entries = self.entries.lock();
        let take = count.min(entries.len());
        if take == 0 {
            return Ok(Vec::new());
        }
        self.db.commit(|commit| {
            for (sequence, _) in entries.iter().take(take) {
                commit.delete(ColumnFamily::HashStore, sequence.to_be_bytes());
            }
        })?;
        let polled = entries.drain(..take).map(|(_, hash)| hash).collect();
        Ok(polled)
    }

    /// Drop every pending hash.
    pub fn clear(&self) -> StorageResult<()> {
        let mut entries = self.entries.lock();
        if !entries.is_empty() {
            self.db.commit(|commit| {
                for (sequence, _) in entries.iter() {
                    commit.delete(ColumnFamily::HashStore, sequence.to_be_bytes());
                }
            })?;
        }
        entries.clear();
        Ok(())
    }

    /// Number of pending hashes.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check whether any hashes are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether a previous block retrieval run left unfetched hashes
    /// behind. Meaningful right after opening.
    pub fn sync_was_interrupted(&self) -> bool {
        !self.is_empty()
    }

    /// Hash the next retrieval round starts from.
    pub fn best_hash(&self) -> Option<BlockHash> {
        *self.best_hash.read()
    }

    /// Record the hash the next retrieval round starts from.
    pub fn set_best_hash(&self, hash: BlockHash) {
        *self.best_hash.write() = Some(hash);
    }

    /// Highest total difficulty observed across admitted peers, if any.
    pub fn highest_total_difficulty(&self) -> Option<TotalDifficulty> {
        self.highest_total_difficulty.read().clone()
    }

    /// Record a new highest observed total difficulty.
    pub fn set_highest_total_difficulty(&self, difficulty: TotalDifficulty) {
        *self.highest_total_difficulty.write() = Some(difficulty);
    }

    fn persist(&self, sequence: i64, hash: &BlockHash) -> StorageResult<()> {
        self.db
            .commit(|commit| commit.put(ColumnFamily::HashStore, sequence.to_be_bytes(), hash.0))
    }
}

fn decode_sequence(key: &[u8]) -> StorageResult<i64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| StorageError::Corruption(format!("bad sequence key: {:?}", key)))?;
    Ok(i64::from_be_bytes(bytes))
}

fn decode_hash(value: &[u8]) -> StorageResult<BlockHash> {
    let bytes: [u8; 32] = value
        .try_into()
        .map_err(|_| StorageError::Corruption(format!("bad hash of length {}", value.len())))?;
    Ok(BlockHash(bytes))
}
