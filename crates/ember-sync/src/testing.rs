//! Shared test doubles for the sync crate.

use crate::{SyncConfig, SyncListener, SyncManager};
use ember_core::{Block, BlockHash, BlockWrapper, Chain, SyncState, TotalDifficulty, Transaction};
use ember_network::{Connector, Node, NodeId, NodeManager, PeerHandle, Status};
use ember_storage::{Database, HashStore};
use num_bigint::BigUint;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Peer double with externally driven flags.
pub(crate) struct MockPeer {
    id: NodeId,
    status: Option<Status>,
    state: RwLock<SyncState>,
    max_hashes_ask: AtomicUsize,
    hash_retrieving_done: AtomicBool,
    no_more_blocks: AtomicBool,
    pub sent: Mutex<Vec<Transaction>>,
    pub disconnected: AtomicBool,
}

impl MockPeer {
    pub fn new(tag: u8, difficulty: u64) -> Arc<Self> {
        Self::build(
            tag,
            Some(Status {
                protocol_version: ember_network::PROTOCOL_VERSION,
                network_id: 1,
                total_difficulty: BigUint::from(difficulty),
                best_hash: BlockHash([tag; 32]),
                genesis_hash: BlockHash([0; 32]),
            }),
        )
    }

    /// A peer whose protocol handshake never completed.
    pub fn without_status(tag: u8) -> Arc<Self> {
        Self::build(tag, None)
    }

    fn build(tag: u8, status: Option<Status>) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId([tag; 64]),
            status,
            state: RwLock::new(SyncState::Idle),
            max_hashes_ask: AtomicUsize::new(0),
            hash_retrieving_done: AtomicBool::new(false),
            no_more_blocks: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        })
    }

    pub fn mark_hash_retrieving_done(&self) {
        self.hash_retrieving_done.store(true, Ordering::SeqCst);
    }

    pub fn mark_no_more_blocks(&self) {
        self.no_more_blocks.store(true, Ordering::SeqCst);
    }

    pub fn sent_transactions(&self) -> Vec<Transaction> {
        self.sent.lock().clone()
    }

    pub fn was_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl PeerHandle for MockPeer {
    fn peer_id(&self) -> NodeId {
        self.id
    }

    fn best_hash(&self) -> BlockHash {
        self.status
            .as_ref()
            .map(|s| s.best_hash)
            .unwrap_or(BlockHash::ZERO)
    }

    fn total_difficulty(&self) -> TotalDifficulty {
        self.status
            .as_ref()
            .map(|s| s.total_difficulty.clone())
            .unwrap_or_default()
    }

    fn handshake_status(&self) -> Option<Status> {
        self.status.clone()
    }

    fn sync_state(&self) -> SyncState {
        *self.state.read()
    }

    fn change_state(&self, state: SyncState) {
        if state == SyncState::HashRetrieving {
            self.hash_retrieving_done.store(false, Ordering::SeqCst);
        }
        *self.state.write() = state;
    }

    fn is_hash_retrieving_done(&self) -> bool {
        self.hash_retrieving_done.load(Ordering::SeqCst)
    }

    fn has_no_more_blocks(&self) -> bool {
        self.no_more_blocks.load(Ordering::SeqCst)
    }

    fn set_max_hashes_ask(&self, max: usize) {
        self.max_hashes_ask.store(max, Ordering::SeqCst);
    }

    fn max_hashes_ask(&self) -> usize {
        self.max_hashes_ask.load(Ordering::SeqCst)
    }

    fn send_transaction(&self, tx: &Transaction) {
        self.sent.lock().push(tx.clone());
    }

    fn on_disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        *self.state.write() = SyncState::Idle;
    }

    fn log_sync_stats(&self) {}
}

/// Chain double with settable tip and difficulty.
pub(crate) struct MockChain {
    total_difficulty: RwLock<TotalDifficulty>,
    best: RwLock<Block>,
}

impl MockChain {
    pub fn new(total_difficulty: TotalDifficulty) -> Arc<Self> {
        Arc::new(Self {
            total_difficulty: RwLock::new(total_difficulty),
            best: RwLock::new(make_block(0)),
        })
    }

    pub fn set_total_difficulty(&self, value: TotalDifficulty) {
        *self.total_difficulty.write() = value;
    }

    pub fn set_best_number(&self, number: u64) {
        *self.best.write() = make_block(number);
    }
}

impl Chain for MockChain {
    fn total_difficulty(&self) -> TotalDifficulty {
        self.total_difficulty.read().clone()
    }

    fn best_block(&self) -> Block {
        self.best.read().clone()
    }
}

/// Connector double recording every dialed node.
#[derive(Default)]
pub(crate) struct RecordingConnector {
    dialed: Mutex<Vec<NodeId>>,
}

impl RecordingConnector {
    pub fn dialed(&self) -> Vec<NodeId> {
        self.dialed.lock().clone()
    }
}

impl Connector for RecordingConnector {
    fn connect(&self, node: &Node) {
        self.dialed.lock().push(node.id);
    }
}

/// Sync listener double recording completion.
#[derive(Default)]
pub(crate) struct DoneListener {
    done: AtomicBool,
}

impl DoneListener {
    pub fn done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl SyncListener for DoneListener {
    fn on_sync_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }
}

/// Build a deterministic block at the given height.
pub(crate) fn make_block(number: u64) -> Block {
    Block {
        number,
        hash: BlockHash([number as u8; 32]),
        parent_hash: BlockHash([number.wrapping_sub(1) as u8; 32]),
        difficulty: BigUint::from(1u8),
        timestamp: 0,
        transactions: Vec::new(),
    }
}

/// Wrap a deterministic block, optionally as a NewBlock announcement.
pub(crate) fn make_wrapper(number: u64, announced: bool) -> BlockWrapper {
    if announced {
        BlockWrapper::new_announced(make_block(number))
    } else {
        BlockWrapper::new(make_block(number))
    }
}

/// Fully wired sync machine over mocks and a temp-dir hash store.
pub(crate) struct TestEnv {
    pub sync: Arc<SyncManager>,
    pub chain: Arc<MockChain>,
    pub hash_store: Arc<HashStore>,
    pub node_manager: Arc<NodeManager>,
    pub connector: Arc<RecordingConnector>,
    pub listener: Arc<DoneListener>,
    _tmp: TempDir,
}

impl TestEnv {
    pub fn with_local_difficulty(difficulty: u64) -> Self {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path()).unwrap();
        let hash_store = Arc::new(HashStore::open(db, false).unwrap());
        let chain = MockChain::new(BigUint::from(difficulty));
        let node_manager = Arc::new(NodeManager::new());
        let connector = Arc::new(RecordingConnector::default());
        let listener = Arc::new(DoneListener::default());
        let sync = SyncManager::new(
            SyncConfig::default(),
            Arc::clone(&chain) as Arc<dyn Chain>,
            Arc::clone(&hash_store),
            Arc::clone(&node_manager),
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::clone(&listener) as Arc<dyn SyncListener>,
        );
        Self {
            sync,
            chain,
            hash_store,
            node_manager,
            connector,
            listener,
            _tmp: tmp,
        }
    }

    /// A fresh mock peer; tag doubles as the node id and hash seed.
    pub fn peer(&self, tag: u8, difficulty: u64) -> Arc<MockPeer> {
        MockPeer::new(tag, difficulty)
    }
}
