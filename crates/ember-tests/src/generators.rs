//! Test data generators and doubles for integration tests.
//!
//! Provides deterministic blocks, peers, chains and collaborator
//! doubles for exercising the sync core without a live network.

use ember_core::{Block, BlockHash, BlockWrapper, Chain, SyncState, TotalDifficulty, Transaction};
use ember_network::{Connector, Node, NodeHandler, NodeId, PeerHandle, Status};
use num_bigint::BigUint;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Deterministic 32-byte hash seeded by a tag.
pub fn test_hash(tag: u8) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[0] = tag;
    bytes[31] = tag.wrapping_mul(7);
    BlockHash(bytes)
}

/// Deterministic block at the given height, linked to height - 1.
pub fn test_block(number: u64) -> Block {
    Block {
        number,
        hash: test_hash(number as u8),
        parent_hash: test_hash(number.wrapping_sub(1) as u8),
        difficulty: BigUint::from(100u32),
        timestamp: 1_438_269_988 + number * 13,
        transactions: Vec::new(),
    }
}

/// Wrap a deterministic block, optionally as a NewBlock announcement.
pub fn test_wrapper(number: u64, announced: bool) -> BlockWrapper {
    if announced {
        BlockWrapper::new_announced(test_block(number))
    } else {
        BlockWrapper::new(test_block(number))
    }
}

/// Status message advertising the given total difficulty.
pub fn test_status(tag: u8, difficulty: u64) -> Status {
    Status {
        protocol_version: ember_network::PROTOCOL_VERSION,
        network_id: 1,
        total_difficulty: BigUint::from(difficulty),
        best_hash: test_hash(tag),
        genesis_hash: test_hash(0),
    }
}

/// Discovered node handler with an optional inbound status.
pub fn test_node_handler(tag: u8, difficulty: Option<u64>) -> Arc<NodeHandler> {
    let node = Node::new(NodeId([tag; 64]), "127.0.0.1:30303".parse().unwrap());
    let handler = NodeHandler::new(node);
    if let Some(difficulty) = difficulty {
        handler
            .node_statistics()
            .set_eth_last_inbound_status(test_status(tag, difficulty));
    }
    Arc::new(handler)
}

/// Peer double with externally driven retrieval flags.
pub struct TestPeer {
    id: NodeId,
    status: Option<Status>,
    state: RwLock<SyncState>,
    max_hashes_ask: AtomicUsize,
    hash_retrieving_done: AtomicBool,
    no_more_blocks: AtomicBool,
    sent: Mutex<Vec<Transaction>>,
    disconnected: AtomicBool,
}

impl TestPeer {
    /// A handshaked peer advertising the given total difficulty.
    pub fn new(tag: u8, difficulty: u64) -> Arc<Self> {
        Self::build(tag, Some(test_status(tag, difficulty)))
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

    /// Simulate the remote finishing the current hash round.
    pub fn finish_hash_retrieval(&self) {
        self.hash_retrieving_done.store(true, Ordering::SeqCst);
    }

    /// Simulate the remote running out of blocks.
    pub fn run_out_of_blocks(&self) {
        self.no_more_blocks.store(true, Ordering::SeqCst);
    }

    /// Transactions forwarded to this peer.
    pub fn sent_transactions(&self) -> Vec<Transaction> {
        self.sent.lock().clone()
    }

    /// Whether the session was torn down.
    pub fn was_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl PeerHandle for TestPeer {
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

/// Chain double with a settable tip and difficulty.
pub struct TestChain {
    total_difficulty: RwLock<TotalDifficulty>,
    best: RwLock<Block>,
}

impl TestChain {
    pub fn new(total_difficulty: u64) -> Arc<Self> {
        Arc::new(Self {
            total_difficulty: RwLock::new(BigUint::from(total_difficulty)),
            best: RwLock::new(test_block(0)),
        })
    }

    pub fn set_total_difficulty(&self, value: TotalDifficulty) {
        *self.total_difficulty.write() = value;
    }

    pub fn set_best_block(&self, block: Block) {
        *self.best.write() = block;
    }
}

impl Chain for TestChain {
    fn total_difficulty(&self) -> TotalDifficulty {
        self.total_difficulty.read().clone()
    }

    fn best_block(&self) -> Block {
        self.best.read().clone()
    }
}

/// Connector double recording every dialed node.
#[derive(Default)]
pub struct TestConnector {
    dialed: Mutex<Vec<NodeId>>,
}

impl TestConnector {
    pub fn dialed(&self) -> Vec<NodeId> {
        self.dialed.lock().clone()
    }
}

impl Connector for TestConnector {
    fn connect(&self, node: &Node) {
        self.dialed.lock().push(node.id);
    }
}

/// Sync listener double recording completion.
#[derive(Default)]
pub struct TestSyncListener {
    done: AtomicBool,
}

impl TestSyncListener {
    pub fn sync_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl ember_sync::SyncListener for TestSyncListener {
    fn on_sync_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }
}
