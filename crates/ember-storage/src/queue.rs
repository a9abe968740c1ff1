//! Persistent, ordered queue of blocks awaiting import.

use crate::{ColumnFamily, Database, StorageError, StorageResult};
use ember_core::{BlockHash, BlockWrapper};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Durable, ordered, blocking queue of blocks pending import.
///
/// Blocks are keyed by height and deduplicated by it; `poll` and `take`
/// always drain the lowest-numbered block. Every mutation is committed
/// to the backing store before the call returns, so pending blocks
/// survive restarts.
///
/// Initialization runs on a background thread; every operation waits
/// for it to finish before acting. A failed initialization is reported
/// through the operation's `Err` instead of blocking callers forever.
pub struct BlockQueue {
    state: Mutex<InitState>,
    /// Signalled once background initialization settles.
    init: Condvar,
    /// Signalled when a block lands in the queue, and on close.
    not_empty: Condvar,
}

enum InitState {
    Pending,
    Ready(Inner),
    Failed(String),
    Closed,
}

struct Inner {
    db: Database,
    /// Pending block numbers, sorted ascending.
    index: Vec<u64>,
    /// Hashes of all pending blocks.
    hashes: HashSet<BlockHash>,
}

impl BlockQueue {
    /// Open the queue over the given store, initializing in the
    /// background. With `reset` set, previously persisted entries are
    /// dropped first.
    pub fn open(db: Database, reset: bool) -> Arc<Self> {
        let queue = Arc::new(Self {
            state: Mutex::new(InitState::Pending),
            init: Condvar::new(),
            not_empty: Condvar::new(),
        });

        let handle = Arc::clone(&queue);
        std::thread::spawn(move || handle.run_init(db, reset));

        queue
    }

    fn run_init(&self, db: Database, reset: bool) {
        let outcome = Inner::load(db, reset);
        let mut state = self.state.lock();
        *state = match outcome {
            Ok(inner) => {
                info!(pending = inner.index.len(), "Block queue opened");
                InitState::Ready(inner)
            }
            Err(e) => {
                warn!(error = %e, "Block queue initialization failed");
                InitState::Failed(e.to_string())
            }
        };
        self.init.notify_all();
    }

    /// Enqueue a block; duplicates by height are ignored.
    pub fn add(&self, wrapper: BlockWrapper) -> StorageResult<()> {
        self.add_all(vec![wrapper])
    }

    /// Enqueue a batch of blocks in a single commit; duplicates by
    /// height, within the batch or against pending blocks, are ignored.
    pub fn add_all(&self, wrappers: Vec<BlockWrapper>) -> StorageResult<()> {
        let mut state = self.lock_ready()?;
        let added = Self::inner(&mut state)?.insert_all(&wrappers)?;
        if added > 0 {
            self.not_empty.notify_all();
        }
        Ok(())
    }

    /// Remove and return the lowest-numbered pending block, or `None`
    /// if the queue is empty.
    pub fn poll(&self) -> StorageResult<Option<BlockWrapper>> {
        let mut state = self.lock_ready()?;
        Self::inner(&mut state)?.poll_lowest()
    }

    /// Return the lowest-numbered pending block without removing it.
    pub fn peek(&self) -> StorageResult<Option<BlockWrapper>> {
        let mut state = self.lock_ready()?;
        Self::inner(&mut state)?.peek_lowest()
    }

    /// Block until a block is available, then remove and return it.
    ///
    /// Wakes with `Err(StorageError::NotOpen)` if the queue is closed
    /// while waiting.
    pub fn take(&self) -> StorageResult<BlockWrapper> {
        let mut state = self.lock_ready()?;
        loop {
            match &mut *state {
                InitState::Ready(inner) => {
                    if let Some(wrapper) = inner.poll_lowest()? {
                        return Ok(wrapper);
                    }
                }
                InitState::Closed => return Err(StorageError::NotOpen),
                InitState::Failed(e) => return Err(StorageError::InitFailed(e.clone())),
                InitState::Pending => {}
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Number of pending blocks.
    pub fn size(&self) -> StorageResult<usize> {
        let mut state = self.lock_ready()?;
        Ok(Self::inner(&mut state)?.index.len())
    }

    /// Check whether the queue is empty.
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.size()? == 0)
    }

    /// Drop every pending block.
    pub fn clear(&self) -> StorageResult<()> {
        let mut state = self.lock_ready()?;
        Self::inner(&mut state)?.clear()
    }

    /// Return the subset of `candidates` whose blocks are not pending.
    pub fn filter_existing(&self, candidates: &[BlockHash]) -> StorageResult<Vec<BlockHash>> {
        let mut state = self.lock_ready()?;
        let inner = Self::inner(&mut state)?;
        Ok(candidates
            .iter()
            .filter(|hash| !inner.hashes.contains(hash))
            .copied()
            .collect())
    }

    /// Hashes of all pending blocks.
    pub fn hashes(&self) -> StorageResult<HashSet<BlockHash>> {
        let mut state = self.lock_ready()?;
        Ok(Self::inner(&mut state)?.hashes.clone())
    }

    /// Close the queue. Waits for initialization to settle, releases
    /// the store reference and wakes any blocked taker.
    pub fn close(&self) {
        let mut state = self.state.lock();
        while matches!(*state, InitState::Pending) {
            self.init.wait(&mut state);
        }
        *state = InitState::Closed;
        self.not_empty.notify_all();
    }

    /// Wait for initialization and return the guard, or the recorded
    /// failure.
    fn lock_ready(&self) -> StorageResult<parking_lot::MutexGuard<'_, InitState>> {
        let mut state = self.state.lock();
        while matches!(*state, InitState::Pending) {
            self.init.wait(&mut state);
        }
        match &*state {
            InitState::Ready(_) => Ok(state),
            InitState::Failed(e) => Err(StorageError::InitFailed(e.clone())),
            InitState::Closed => Err(StorageError::NotOpen),
            InitState::Pending => Err(StorageError::NotOpen),
        }
    }

    fn inner<'a>(state: &'a mut InitState) -> StorageResult<&'a mut Inner> {
        match state {
            InitState::Ready(inner) => Ok(inner),
            InitState::Failed(e) => Err(StorageError::InitFailed(e.clone())),
            _ => Err(StorageError::NotOpen),
        }
    }
}

impl Inner {
    fn load(db: Database, reset: bool) -> StorageResult<Self> {
        if reset {
            let stale_blocks = db.keys(ColumnFamily::BlockQueue)?;
            let stale_hashes = db.keys(ColumnFamily::HashSet)?;
            if !stale_blocks.is_empty() || !stale_hashes.is_empty() {
                info!(
                    dropped = stale_blocks.len() + stale_hashes.len(),
                    "Resetting block queue store"
                );
                db.commit(|commit| {
                    for key in &stale_blocks {
                        commit.delete(ColumnFamily::BlockQueue, key);
                    }
                    for key in &stale_hashes {
                        commit.delete(ColumnFamily::HashSet, key);
                    }
                })?;
            }
        }

        let mut index = Vec::new();
        for key in db.keys(ColumnFamily::BlockQueue)? {
            index.push(decode_number(&key)?);
        }
        index.sort_unstable();

        let mut hashes = HashSet::new();
        for key in db.keys(ColumnFamily::HashSet)? {
            hashes.insert(decode_hash(&key)?);
        }

        Ok(Self { db, index, hashes })
    }

    fn insert_all(&mut self, wrappers: &[BlockWrapper]) -> StorageResult<usize> {
        let mut accepted: Vec<(&BlockWrapper, Vec<u8>)> = Vec::new();

        for wrapper in wrappers {
            let number = wrapper.number();
            if self.index.binary_search(&number).is_ok()
                || accepted.iter().any(|(w, _)| w.number() == number)
            {
                continue;
            }
            accepted.push((wrapper, bincode::serialize(wrapper)?));
        }

        if accepted.is_empty() {
            return Ok(0);
        }

        // Commit first so the in-memory index never runs ahead of the
        // persisted state.
        self.db.commit(|commit| {
            for (wrapper, encoded) in &accepted {
                commit.put(
                    ColumnFamily::BlockQueue,
                    wrapper.number().to_be_bytes(),
                    encoded,
                );
                commit.put(ColumnFamily::HashSet, wrapper.hash().0, b"");
            }
        })?;

        for (wrapper, _) in &accepted {
            if let Err(position) = self.index.binary_search(&wrapper.number()) {
                self.index.insert(position, wrapper.number());
            }
            self.hashes.insert(wrapper.hash());
        }

        Ok(accepted.len())
    }

    fn poll_lowest(&mut self) -> StorageResult<Option<BlockWrapper>> {
        let Some(&number) = self.index.first() else {
            return Ok(None);
        };
        let wrapper = self.read_block(number)?;

        self.db.commit(|commit| {
            commit.delete(ColumnFamily::BlockQueue, number.to_be_bytes());
            commit.delete(ColumnFamily::HashSet, wrapper.hash().0);
        })?;

        self.index.remove(0);
        self.hashes.remove(&wrapper.hash());
        Ok(Some(wrapper))
    }

    fn peek_lowest(&mut self) -> StorageResult<Option<BlockWrapper>> {
        let Some(&number) = self.index.first() else {
            return Ok(None);
        };
        Ok(Some(self.read_block(number)?))
    }

    fn read_block(&self, number: u64) -> StorageResult<BlockWrapper> {
        let bytes = self
            .db
            .get(ColumnFamily::BlockQueue, &number.to_be_bytes())?
            .ok_or_else(|| {
                StorageError::Corruption(format!("indexed block {} missing from store", number))
            })?;
        Ok(bincode::deserialize(&bytes)?)
    }

    fn clear(&mut self) -> StorageResult<()> {
        if !self.index.is_empty() || !self.hashes.is_empty() {
            self.db.commit(|commit| {
                for number in &self.index {
                    commit.delete(ColumnFamily::BlockQueue, number.to_be_bytes());
                }
                for hash in &self.hashes {
                    commit.delete(ColumnFamily::HashSet, hash.0);
                }
            })?;
        }
        self.index.clear();
        self.hashes.clear();
        Ok(())
    }
}

fn decode_number(key: &[u8]) -> StorageResult<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| StorageError::Corruption(format!("bad block number key: {:?}", key)))?;
    Ok(u64::from_be_bytes(bytes))
}

fn decode_hash(key: &[u8]) -> StorageResult<BlockHash> {
    let bytes: [u8; 32] = key
        .try_into()
        .map_err(|_| StorageError::Corruption(format!("bad hash key of length {}", key.len())))?;
    Ok(BlockHash(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::Block;
    use num_bigint::BigUint;
    use std::time::Duration;
    use tempfile::TempDir;

    fn wrapper(number: u64) -> BlockWrapper {
        BlockWrapper::new(Block {
            number,
            hash: BlockHash([number as u8; 32]),
            parent_hash: BlockHash([number.wrapping_sub(1) as u8; 32]),
            difficulty: BigUint::from(1u8),
            timestamp: 0,
            transactions: Vec::new(),
        })
    }

    fn open_queue(tmp: &TempDir) -> Arc<BlockQueue> {
        let db = Database::open(tmp.path()).unwrap();
        BlockQueue::open(db, false)
    }

    #[test]
    fn test_add_and_poll_in_height_order() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);

        for number in [5, 3, 7, 3] {
            queue.add(wrapper(number)).unwrap();
        }

        assert_eq!(queue.size().unwrap(), 3);
        assert_eq!(queue.poll().unwrap().unwrap().number(), 3);
        assert_eq!(queue.poll().unwrap().unwrap().number(), 5);
        assert_eq!(queue.poll().unwrap().unwrap().number(), 7);
        assert!(queue.poll().unwrap().is_none());
        assert!(queue.hashes().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_by_height_ignored() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);

        queue.add(wrapper(10)).unwrap();
        queue.add(wrapper(10)).unwrap();

        assert_eq!(queue.size().unwrap(), 1);
    }

    #[test]
    fn test_add_all_deduplicates_within_batch() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);

        queue
            .add_all(vec![wrapper(2), wrapper(1), wrapper(2)])
            .unwrap();

        assert_eq!(queue.size().unwrap(), 2);
        assert_eq!(queue.peek().unwrap().unwrap().number(), 1);
    }

    #[test]
    fn test_peek_does_not_remove() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);

        queue.add(wrapper(4)).unwrap();
        assert_eq!(queue.peek().unwrap().unwrap().number(), 4);
        assert_eq!(queue.size().unwrap(), 1);
    }

    #[test]
    fn test_filter_existing() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);

        queue.add(wrapper(1)).unwrap();
        queue.add(wrapper(2)).unwrap();

        let unknown = BlockHash([0xee; 32]);
        let filtered = queue
            .filter_existing(&[wrapper(1).hash(), unknown])
            .unwrap();
        assert_eq!(filtered, vec![unknown]);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let tmp = TempDir::new().unwrap();

        let queue = open_queue(&tmp);
        queue.add(wrapper(42)).unwrap();
        queue.close();

        let queue = open_queue(&tmp);
        let polled = queue.poll().unwrap().unwrap();
        assert_eq!(polled.number(), 42);
        assert_eq!(polled.hash(), BlockHash([42; 32]));
    }

    #[test]
    fn test_reset_clears_persisted_entries() {
        let tmp = TempDir::new().unwrap();

        let queue = open_queue(&tmp);
        queue.add(wrapper(1)).unwrap();
        queue.add(wrapper(2)).unwrap();
        queue.close();

        let db = Database::open(tmp.path()).unwrap();
        let queue = BlockQueue::open(db, true);
        assert_eq!(queue.size().unwrap(), 0);
        assert!(queue.hashes().unwrap().is_empty());
    }

    #[test]
    fn test_clear() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);

        queue.add_all(vec![wrapper(1), wrapper(2)]).unwrap();
        queue.clear().unwrap();

        assert!(queue.is_empty().unwrap());
        assert!(queue.poll().unwrap().is_none());
    }

    #[test]
    fn test_take_blocks_until_a_block_arrives() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);

        let producer = Arc::clone(&queue);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            producer.add(wrapper(9)).unwrap();
        });

        let taken = queue.take().unwrap();
        assert_eq!(taken.number(), 9);
        handle.join().unwrap();
    }

    #[test]
    fn test_take_wakes_with_error_on_close() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);

        let closer = Arc::clone(&queue);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            closer.close();
        });

        assert!(matches!(queue.take(), Err(StorageError::NotOpen)));
        handle.join().unwrap();
    }

    #[test]
    fn test_operations_after_close_fail() {
        let tmp = TempDir::new().unwrap();
        let queue = open_queue(&tmp);

        queue.close();
        assert!(matches!(
            queue.add(wrapper(1)),
            Err(StorageError::NotOpen)
        ));
    }
}
