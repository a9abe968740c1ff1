//! Test harness for integration tests.
//!
//! Provides temp-dir databases and a fully wired sync core over test
//! doubles.

use crate::generators::{TestChain, TestConnector, TestPeer, TestSyncListener};
use ember_core::Chain;
use ember_network::{Connector, NodeManager};
use ember_storage::{BlockQueue, Database, HashStore};
use ember_sync::{ChannelManager, SyncConfig, SyncListener, SyncManager};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Test database in a temporary directory, cleaned up on drop.
pub struct TestDatabase {
    db: Database,
    _temp_dir: TempDir,
}

impl TestDatabase {
    /// Create a new test database in a temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(temp_dir.path()).expect("Failed to open database");
        Self {
            db,
            _temp_dir: temp_dir,
        }
    }

    /// Path of the database directory.
    pub fn path(&self) -> PathBuf {
        self._temp_dir.path().to_path_buf()
    }

    /// Clone of the database handle (shares the underlying store).
    pub fn db(&self) -> Database {
        self.db.clone()
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// The sync core wired over test doubles and a temp-dir store.
pub struct SyncHarness {
    pub sync: Arc<SyncManager>,
    pub channels: Arc<ChannelManager>,
    pub chain: Arc<TestChain>,
    pub queue: Arc<BlockQueue>,
    pub hash_store: Arc<HashStore>,
    pub node_manager: Arc<NodeManager>,
    pub connector: Arc<TestConnector>,
    pub listener: Arc<TestSyncListener>,
    _db: TestDatabase,
}

impl SyncHarness {
    /// Wire the core with the given local total difficulty.
    pub fn with_local_difficulty(difficulty: u64) -> Self {
        let db = TestDatabase::new();
        let queue = BlockQueue::open(db.db(), false);
        let hash_store =
            Arc::new(HashStore::open(db.db(), false).expect("Failed to open hash store"));
        let chain = TestChain::new(difficulty);
        let node_manager = Arc::new(NodeManager::new());
        let connector = Arc::new(TestConnector::default());
        let listener = Arc::new(TestSyncListener::default());

        let sync = SyncManager::new(
            SyncConfig::default(),
            Arc::clone(&chain) as Arc<dyn Chain>,
            Arc::clone(&hash_store),
            Arc::clone(&node_manager),
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::clone(&listener) as Arc<dyn SyncListener>,
        );
        let channels = ChannelManager::new(
            Arc::clone(&sync),
            Arc::clone(&node_manager),
            Arc::clone(&connector) as Arc<dyn Connector>,
        );

        Self {
            sync,
            channels,
            chain,
            queue,
            hash_store,
            node_manager,
            connector,
            listener,
            _db: db,
        }
    }

    /// A fresh test peer; tag doubles as node id and hash seed.
    pub fn peer(&self, tag: u8, difficulty: u64) -> Arc<TestPeer> {
        TestPeer::new(tag, difficulty)
    }
}
