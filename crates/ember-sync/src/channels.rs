//! Peer channel supervision.

use crate::{SyncManager, CHANNEL_WORKER_PERIOD, RECONNECT_PERIOD};
use ember_core::Transaction;
use ember_network::{Channel, Connector, NodeManager};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Supervises peer channels from handshake to teardown.
///
/// Channels start in `new_peers`; once protocol initialization passes,
/// useful ones are registered with the sync pool and move to
/// `active_peers`. A disconnected active peer gets exactly one free
/// reconnect attempt; a second disconnect sidelines it for good.
pub struct ChannelManager {
    sync_manager: Arc<SyncManager>,
    node_manager: Arc<NodeManager>,
    connector: Arc<dyn Connector>,
    /// Channels whose handshake has not completed yet.
    new_peers: RwLock<Vec<Arc<Channel>>>,
    /// Handshaked channels registered with the sync pool.
    active_peers: RwLock<Vec<Arc<Channel>>>,
    /// Reconnect bookkeeping; one lock guards both sets.
    reconnects: Mutex<ReconnectBook>,
}

#[derive(Default)]
struct ReconnectBook {
    /// Ids awaiting their single free reconnect attempt.
    disconnected: HashSet<String>,
    /// Ids that already used their reconnect attempt.
    reconnected: HashSet<String>,
}

impl ChannelManager {
    /// Create the supervisor over its collaborators.
    pub fn new(
        sync_manager: Arc<SyncManager>,
        node_manager: Arc<NodeManager>,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sync_manager,
            node_manager,
            connector,
            new_peers: RwLock::new(Vec::new()),
            active_peers: RwLock::new(Vec::new()),
            reconnects: Mutex::new(ReconnectBook::default()),
        })
    }

    /// Spawn the promotion and reconnect workers.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let promotion = {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(CHANNEL_WORKER_PERIOD);
                loop {
                    ticker.tick().await;
                    manager.process_new_peers();
                }
            })
        };
        let reconnect = {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(RECONNECT_PERIOD);
                loop {
                    ticker.tick().await;
                    manager.process_reconnects();
                }
            })
        };
        vec![promotion, reconnect]
    }

    /// Track a freshly opened channel.
    pub fn add_channel(&self, channel: Arc<Channel>) {
        self.new_peers.write().push(channel);
    }

    /// Broadcast a transaction to every active peer.
    pub fn send_transaction(&self, tx: &Transaction) {
        let active: Vec<_> = self.active_peers.read().iter().cloned().collect();
        for channel in active {
            channel.send_transaction(tx);
        }
    }

    /// Promote channels that finished protocol initialization. Useful
    /// ones join the sync pool before they become visible as active.
    pub fn process_new_peers(&self) {
        let snapshot: Vec<_> = self.new_peers.read().iter().cloned().collect();
        let mut processed = Vec::new();
        for channel in snapshot {
            if channel.has_init_passed() {
                if channel.is_useful() {
                    self.process_useful(&channel);
                }
                processed.push(channel);
            }
        }
        if !processed.is_empty() {
            self.new_peers
                .write()
                .retain(|c| !processed.iter().any(|p| Arc::ptr_eq(p, c)));
        }
    }

    fn process_useful(&self, channel: &Arc<Channel>) {
        if channel.session().has_status_succeeded() {
            self.sync_manager
                .add_peer(Arc::clone(channel.session()));
            self.active_peers.write().push(Arc::clone(channel));
        }
    }

    /// Handle a dropped connection. Channels that never went active are
    /// ignored; active peers get one reconnect attempt.
    pub fn notify_disconnect(&self, channel: &Arc<Channel>) {
        let was_active = self
            .active_peers
            .read()
            .iter()
            .any(|c| Arc::ptr_eq(c, channel));
        if !was_active {
            return;
        }

        channel.on_disconnect();
        self.sync_manager.remove_peer(channel.session().as_ref());
        self.active_peers
            .write()
            .retain(|c| !Arc::ptr_eq(c, channel));

        let mut book = self.reconnects.lock();
        let remote_id = channel.remote_id().to_string();
        if book.reconnected.contains(&remote_id) {
            info!(peer = %short_id(&remote_id), "Peer hit too many disconnects, dropping");
            book.reconnected.remove(&remote_id);
        } else {
            info!(peer = %short_id(&remote_id), "Peer disconnected");
            book.disconnected.insert(remote_id);
        }
    }

    /// Dial every peer awaiting its reconnect attempt; each id moves to
    /// the used-up set so the next disconnect drops it.
    pub fn process_reconnects(&self) {
        let mut book = self.reconnects.lock();
        for remote_id in book.disconnected.iter() {
            match self.node_manager.find_by_id(remote_id) {
                Some(handler) => {
                    info!(peer = %short_id(remote_id), "Reconnecting peer");
                    self.connector.connect(handler.node());
                }
                None => {
                    debug!(
                        peer = %short_id(remote_id),
                        "Peer unknown to discovery, skipping reconnect"
                    );
                }
            }
        }
        let used: Vec<_> = book.disconnected.drain().collect();
        book.reconnected.extend(used);
    }

    /// Number of channels awaiting handshake completion.
    pub fn new_peer_count(&self) -> usize {
        self.new_peers.read().len()
    }

    /// Number of active channels.
    pub fn active_peer_count(&self) -> usize {
        self.active_peers.read().len()
    }

    /// Snapshot of ids awaiting their reconnect attempt.
    pub fn disconnected_ids(&self) -> HashSet<String> {
        self.reconnects.lock().disconnected.clone()
    }

    /// Snapshot of ids that already used their reconnect attempt.
    pub fn reconnected_ids(&self) -> HashSet<String> {
        self.reconnects.lock().reconnected.clone()
    }
}

fn short_id(hex_id: &str) -> &str {
    &hex_id[..hex_id.len().min(8)]
}
