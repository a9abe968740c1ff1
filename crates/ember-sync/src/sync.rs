//! Global synchronization state machine.

use crate::{
    CONNECTION_TIMEOUT, LARGE_GAP_THRESHOLD, LOG_WORKER_PERIOD, PEERS_COUNT,
    TIME_TO_IMPORT_THRESHOLD, WORKER_PERIOD,
};
use ember_core::{within_twenty_percent, BlockHash, BlockWrapper, Chain, SyncState};
use ember_network::{Connector, DiscoverListener, Node, NodeHandler, NodeManager, PeerHandle};
use ember_storage::HashStore;
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{self, AtomicUsize};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sync tuning options.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Ceiling on hashes requested from a peer per round.
    pub max_hashes_ask: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_hashes_ask: 10_000,
        }
    }
}

/// Receives lifecycle notifications from the sync machine.
pub trait SyncListener: Send + Sync {
    /// The chain has caught up with the network.
    fn on_sync_done(&self);
}

/// Orchestrates hash and block retrieval across the peer pool.
///
/// Keeps up to [`PEERS_COUNT`] useful peers, elects the highest-
/// difficulty one as master for hash retrieval, fans block retrieval
/// across the rest, and recovers chain gaps reported by the importer.
pub struct SyncManager {
    config: SyncConfig,
    chain: Arc<dyn Chain>,
    hash_store: Arc<HashStore>,
    node_manager: Arc<NodeManager>,
    connector: Arc<dyn Connector>,
    listener: Arc<dyn SyncListener>,

    /// Global state machine; one lock orders all transitions.
    machine: Mutex<StateMachine>,
    /// Peers admitted for retrieval.
    peers: RwLock<Vec<Arc<dyn PeerHandle>>>,
    /// Hashes-per-request cap for the current retrieval round.
    max_hashes_ask: AtomicUsize,
    /// Hash the next retrieval round starts from.
    best_hash: RwLock<Option<BlockHash>>,
    /// Peers at or below this difficulty are not worth connecting.
    /// Written only from the maintenance worker, read by the discovery
    /// candidate filter.
    lower_useful_difficulty: RwLock<ember_core::TotalDifficulty>,
    /// Outbound connections awaiting a handshake, by hex node id.
    connect_timestamps: Mutex<HashMap<String, Instant>>,
}

struct StateMachine {
    state: SyncState,
    prev_state: SyncState,
    master: Option<Arc<dyn PeerHandle>>,
}

impl SyncManager {
    /// Create the sync machine over its collaborators.
    pub fn new(
        config: SyncConfig,
        chain: Arc<dyn Chain>,
        hash_store: Arc<HashStore>,
        node_manager: Arc<NodeManager>,
        connector: Arc<dyn Connector>,
        listener: Arc<dyn SyncListener>,
    ) -> Arc<Self> {
        let lower_useful_difficulty = chain.total_difficulty();
        let max_hashes_ask = config.max_hashes_ask;
        Arc::new(Self {
            config,
            chain,
            hash_store,
            node_manager,
            connector,
            listener,
            machine: Mutex::new(StateMachine {
                state: SyncState::Init,
                prev_state: SyncState::Init,
                master: None,
            }),
            peers: RwLock::new(Vec::new()),
            max_hashes_ask: AtomicUsize::new(max_hashes_ask),
            best_hash: RwLock::new(None),
            lower_useful_difficulty: RwLock::new(lower_useful_difficulty),
            connect_timestamps: Mutex::new(HashMap::new()),
        })
    }

    /// Subscribe to discovery so nodes advertising a better chain than
    /// anything known get dialed as they appear.
    pub fn register_discovery(self: &Arc<Self>) {
        let hash_store = Arc::clone(&self.hash_store);
        self.node_manager.add_discover_listener(
            Arc::new(ConnectOnAppear {
                manager: Arc::clone(self),
            }),
            Box::new(move |stats| {
                let Some(status) = stats.eth_last_inbound_status() else {
                    return false;
                };
                match hash_store.highest_total_difficulty() {
                    None => true,
                    Some(known) => status.total_difficulty > known,
                }
            }),
        );
    }

    /// Spawn the periodic maintenance and statistics workers.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let maintenance = {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(WORKER_PERIOD);
                loop {
                    ticker.tick().await;
                    manager.tick();
                }
            })
        };
        let stats = {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(LOG_WORKER_PERIOD);
                loop {
                    ticker.tick().await;
                    manager.log_stats();
                }
            })
        };
        vec![maintenance, stats]
    }

    /// One round of the maintenance worker.
    pub fn tick(&self) {
        self.check_master();
        self.check_peers();
        self.remove_outdated_connections();
        self.ask_new_peers();
    }

    /// Admit a handshaked peer to the retrieval pool.
    pub fn add_peer(&self, peer: Arc<dyn PeerHandle>) {
        if self.is_sync_done() {
            return;
        }

        self.forget_pending_connect(&peer.peer_id().to_hex());

        let peer_td = peer.total_difficulty();
        let local_td = self.chain.total_difficulty();
        if peer_td <= local_td {
            info!(
                peer = %peer.peer_id().short(),
                peer_td = %peer_td,
                local_td = %local_td,
                "Peer difficulty not above ours, skipping"
            );
            return;
        }

        self.peers.write().push(Arc::clone(&peer));
        info!(peer = %peer.peer_id().short(), "Peer added to pool");

        match self.hash_store.highest_total_difficulty() {
            Some(known) if within_twenty_percent(&known, &peer_td) => {
                if self.state() == SyncState::BlockRetrieving {
                    peer.change_state(SyncState::BlockRetrieving);
                }
            }
            known => {
                info!(
                    peer = %peer.peer_id().short(),
                    peer_td = %peer_td,
                    known_td = %known.unwrap_or_default(),
                    "Peer chain is better than previously known"
                );
                debug!(
                    peer = %peer.peer_id().short(),
                    best = %peer.best_hash(),
                    "Peer best hash"
                );
                self.change_state(SyncState::HashRetrieving);
            }
        }
    }

    /// Drop a peer from the retrieval pool.
    pub fn remove_peer(&self, peer: &dyn PeerHandle) {
        if self.is_sync_done() {
            return;
        }

        let peer_id = peer.peer_id();
        self.forget_pending_connect(&peer_id.to_hex());
        peer.change_state(SyncState::Idle);
        self.peers.write().retain(|p| p.peer_id() != peer_id);
        info!(peer = %peer_id.short(), "Peer removed from pool");
    }

    /// React to the importer finding a block whose parent is missing.
    pub fn recover_gap(&self, wrapper: &BlockWrapper) {
        if self.state() == SyncState::GapRecovery {
            info!("Gap recovery is already in progress, postponing");
            return;
        }
        if wrapper.is_new_block && !self.allow_new_block_gap_recovery() {
            info!(
                state = ?self.state(),
                number = wrapper.number(),
                "Postponing gap recovery for announced block"
            );
            return;
        }

        let best = self.chain.best_block();
        let gap = wrapper.number().saturating_sub(best.number);
        info!(
            block = wrapper.number(),
            best = best.number,
            announced = wrapper.is_new_block,
            "Trying to recover chain gap"
        );
        if gap > LARGE_GAP_THRESHOLD {
            let ask = (gap as usize).min(self.config.max_hashes_ask);
            self.max_hashes_ask.store(ask, atomic::Ordering::SeqCst);
            *self.best_hash.write() = Some(wrapper.hash());
            debug!(
                number = wrapper.number(),
                hash = %wrapper.hash().short(),
                "Recovering block gap"
            );
            self.change_state(SyncState::GapRecovery);
        } else {
            info!(number = wrapper.number(), "Forcing parent download");
            if let Err(e) = self.hash_store.add_first(&wrapper.parent_hash()) {
                warn!(error = %e, "Failed to enqueue parent hash");
            }
        }
    }

    fn allow_new_block_gap_recovery(&self) -> bool {
        let state = self.state();
        (state == SyncState::BlockRetrieving && self.hash_store_empty())
            || state == SyncState::DoneSync
            || state == SyncState::DoneGapRecovery
    }

    /// React to the importer connecting an announced block.
    pub fn notify_new_block_imported(&self, wrapper: &BlockWrapper) {
        let state = self.state();
        if matches!(
            state,
            SyncState::DoneSync | SyncState::GapRecovery | SyncState::DoneGapRecovery
        ) {
            return;
        }
        if wrapper.time_since_receiving() <= TIME_TO_IMPORT_THRESHOLD.as_millis() as u64 {
            info!(number = wrapper.number(), "Announced block imported");
            self.change_state(SyncState::DoneSync);
        } else {
            info!(
                number = wrapper.number(),
                mins_since_receiving = wrapper.time_since_receiving() / 1000 / 60,
                "Announced block import exceeded the time limit, sync continues"
            );
        }
    }

    /// The single mutator of the global sync state.
    pub fn change_state(&self, new_state: SyncState) {
        let mut machine = self.machine.lock();
        self.transition(&mut machine, new_state);
    }

    fn transition(&self, machine: &mut StateMachine, new_state: SyncState) {
        match new_state {
            SyncState::HashRetrieving => {
                let Some(master) = self.elect_master() else {
                    return;
                };
                machine.master = Some(Arc::clone(&master));
                self.hash_store
                    .set_highest_total_difficulty(master.total_difficulty());

                if machine.state == SyncState::Init && self.hash_store.sync_was_interrupted() {
                    info!("Block retrieval was interrupted previously, resuming");
                    self.transition(machine, SyncState::BlockRetrieving);
                    return;
                }

                *self.best_hash.write() = Some(master.best_hash());
                if let Err(e) = self.hash_store.clear() {
                    warn!(error = %e, "Failed to clear hash store");
                }
                self.change_peers_state(SyncState::Idle);
                self.max_hashes_ask
                    .store(self.config.max_hashes_ask, atomic::Ordering::SeqCst);
                self.run_hash_retrieving_on_master(&master);
            }
            SyncState::GapRecovery => {
                let Some(master) = self.elect_master() else {
                    return;
                };
                machine.master = Some(Arc::clone(&master));
                self.run_hash_retrieving_on_master(&master);
                info!("Gap recovery initiated");
            }
            SyncState::BlockRetrieving => {
                self.change_peers_state(SyncState::BlockRetrieving);
                info!("Block retrieval initiated");
            }
            SyncState::DoneGapRecovery => {
                self.change_peers_state(SyncState::BlockRetrieving);
                info!("Gap recovery finished");
            }
            SyncState::DoneSync => {
                if machine.state == SyncState::DoneSync {
                    return;
                }
                self.change_peers_state(SyncState::DoneSync);
                self.listener.on_sync_done();
                info!("Main synchronization is finished");
            }
            SyncState::Init | SyncState::Idle => {}
        }
        machine.prev_state = machine.state;
        machine.state = new_state;
    }

    /// Pick the pool peer with the highest advertised difficulty; ties
    /// go to the earliest admitted.
    fn elect_master(&self) -> Option<Arc<dyn PeerHandle>> {
        let peers = self.peers.read();
        let mut best: Option<&Arc<dyn PeerHandle>> = None;
        for peer in peers.iter() {
            match best {
                Some(current) if peer.total_difficulty() > current.total_difficulty() => {
                    best = Some(peer)
                }
                None => best = Some(peer),
                _ => {}
            }
        }
        best.cloned()
    }

    fn run_hash_retrieving_on_master(&self, master: &Arc<dyn PeerHandle>) {
        let ask = self.max_hashes_ask.load(atomic::Ordering::SeqCst);
        let best_hash = *self.best_hash.read();
        if let Some(best_hash) = best_hash {
            self.hash_store.set_best_hash(best_hash);
            info!(
                ask_limit = ask,
                best = %best_hash,
                "Master hash retrieval initiated"
            );
        }
        master.set_max_hashes_ask(ask);
        master.change_state(SyncState::HashRetrieving);
        debug!(local_best = %self.chain.best_block_hash(), "Local best block hash");
    }

    fn change_peers_state(&self, new_state: SyncState) {
        let snapshot: Vec<_> = self.peers.read().iter().cloned().collect();
        for peer in snapshot {
            peer.change_state(new_state);
        }
    }

    fn check_master(&self) {
        let mut machine = self.machine.lock();
        let Some(master) = machine.master.clone() else {
            return;
        };
        match machine.state {
            SyncState::HashRetrieving if master.is_hash_retrieving_done() => {
                self.transition(&mut machine, SyncState::BlockRetrieving);
            }
            SyncState::GapRecovery if master.is_hash_retrieving_done() => {
                if machine.prev_state == SyncState::BlockRetrieving {
                    self.transition(&mut machine, SyncState::BlockRetrieving);
                } else {
                    self.transition(&mut machine, SyncState::DoneGapRecovery);
                }
            }
            _ => {}
        }
    }

    fn check_peers(&self) {
        let snapshot: Vec<_> = self.peers.read().iter().cloned().collect();
        let mut drained = Vec::new();
        for peer in &snapshot {
            if peer.has_no_more_blocks() {
                info!(peer = %peer.peer_id().short(), "Peer has no more blocks, removing");
                peer.change_state(SyncState::Idle);
                let td = peer.total_difficulty();
                let mut lower = self.lower_useful_difficulty.write();
                if td > *lower {
                    *lower = td;
                }
                drained.push(peer.peer_id());
            }
        }
        {
            let local = self.chain.total_difficulty();
            let mut lower = self.lower_useful_difficulty.write();
            if local > *lower {
                *lower = local;
            }
        }
        if !drained.is_empty() {
            self.peers.write().retain(|p| !drained.contains(&p.peer_id()));
        }

        // Idle peers resume downloading while hashes are still pending;
        // an empty hash store mid-round does not end the sync.
        let state = self.state();
        if matches!(
            state,
            SyncState::BlockRetrieving | SyncState::DoneSync | SyncState::DoneGapRecovery
        ) && !self.hash_store_empty()
        {
            for peer in self.peers.read().iter() {
                if peer.is_idle() {
                    peer.change_state(SyncState::BlockRetrieving);
                }
            }
        }
    }

    fn remove_outdated_connections(&self) {
        let mut timestamps = self.connect_timestamps.lock();
        timestamps.retain(|_, at| at.elapsed() <= CONNECTION_TIMEOUT);
    }

    fn ask_new_peers(&self) {
        let lack = PEERS_COUNT.saturating_sub(self.peers.read().len());
        if lack == 0 {
            return;
        }

        let mut in_use: HashSet<String> = self
            .peers
            .read()
            .iter()
            .map(|p| p.peer_id().to_hex())
            .collect();
        in_use.extend(self.connect_timestamps.lock().keys().cloned());

        let lower = self.lower_useful_difficulty.read().clone();
        let candidates = self.node_manager.get_nodes(
            |handler| {
                let Some(status) = handler.node_statistics().eth_last_inbound_status() else {
                    return false;
                };
                if in_use.contains(&handler.node().id.to_hex()) {
                    return false;
                }
                status.total_difficulty > lower
            },
            candidate_difficulty_order,
            lack,
        );

        for handler in candidates {
            self.initiate_connection(handler.node());
        }
    }

    fn log_stats(&self) {
        let peers = self.peers.read();
        if peers.is_empty() {
            return;
        }
        info!("Active peers");
        for peer in peers.iter() {
            peer.log_sync_stats();
        }
        info!(state = ?self.state(), "Sync state");
    }

    fn initiate_connection(&self, node: &Node) {
        let mut timestamps = self.connect_timestamps.lock();
        let node_id = node.id.to_hex();
        if timestamps.contains_key(&node_id) {
            return;
        }
        debug!(node = %node.id.short(), "Initiating connection");
        self.connector.connect(node);
        timestamps.insert(node_id, Instant::now());
    }

    fn forget_pending_connect(&self, node_id: &str) {
        self.connect_timestamps.lock().remove(node_id);
    }

    fn hash_store_empty(&self) -> bool {
        self.hash_store.is_empty()
    }

    /// Current global state.
    pub fn state(&self) -> SyncState {
        self.machine.lock().state
    }

    /// State preceding the most recent transition.
    pub fn prev_state(&self) -> SyncState {
        self.machine.lock().prev_state
    }

    /// The peer currently authoritative for hash retrieval, if any.
    pub fn master_peer(&self) -> Option<Arc<dyn PeerHandle>> {
        self.machine.lock().master.clone()
    }

    /// Number of peers in the pool.
    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Whether the sync has finished.
    pub fn is_sync_done(&self) -> bool {
        self.state() == SyncState::DoneSync
    }

    /// Number of outbound connections awaiting a handshake.
    pub fn pending_connect_count(&self) -> usize {
        self.connect_timestamps.lock().len()
    }

    /// Whether an outbound connection to the given hex id is pending.
    pub fn has_pending_connect(&self, node_id: &str) -> bool {
        self.connect_timestamps.lock().contains_key(node_id)
    }

    /// Difficulty floor below which candidates are not dialed.
    pub fn lower_useful_difficulty(&self) -> ember_core::TotalDifficulty {
        self.lower_useful_difficulty.read().clone()
    }

    /// Current hashes-per-request cap.
    pub fn max_hashes_ask(&self) -> usize {
        self.max_hashes_ask.load(atomic::Ordering::SeqCst)
    }

    /// Hash the next retrieval round starts from, if decided.
    pub fn best_hash(&self) -> Option<BlockHash> {
        *self.best_hash.read()
    }

    #[cfg(test)]
    pub(crate) fn backdate_pending_connect(&self, node_id: &str, age: std::time::Duration) {
        if let Some(at) = self.connect_timestamps.lock().get_mut(node_id) {
            *at = Instant::now() - age;
        }
    }
}

/// Descending total difficulty; candidates without a status sort last.
fn candidate_difficulty_order(a: &Arc<NodeHandler>, b: &Arc<NodeHandler>) -> Ordering {
    let td = |handler: &Arc<NodeHandler>| {
        handler
            .node_statistics()
            .eth_last_inbound_status()
            .map(|status| status.total_difficulty)
    };
    match (td(a), td(b)) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

struct ConnectOnAppear {
    manager: Arc<SyncManager>,
}

impl DiscoverListener for ConnectOnAppear {
    fn node_appeared(&self, handler: &NodeHandler) {
        self.manager.initiate_connection(handler.node());
    }
}
