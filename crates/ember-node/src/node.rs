//! Node composition root.

use crate::chain::{genesis_block, LocalChain};
use crate::config::NodeConfig;
use crate::importer;
use anyhow::Result;
use ember_core::Chain;
use ember_network::{Connector, Node as DiscoveredNode, NodeHandler, NodeManager};
use ember_storage::{BlockQueue, Database, HashStore};
use ember_sync::{ChannelManager, SyncConfig, SyncListener, SyncManager};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

/// Logs sync completion; richer observers plug in the same way.
struct LogSyncListener;

impl SyncListener for LogSyncListener {
    fn on_sync_done(&self) {
        info!("Chain is in sync with the network");
    }
}

/// Connector handing dial requests to the transport layer.
struct DialQueue {
    tx: mpsc::UnboundedSender<DiscoveredNode>,
}

impl Connector for DialQueue {
    fn connect(&self, node: &DiscoveredNode) {
        if self.tx.send(node.clone()).is_err() {
            warn!(node = %node.id.short(), "Transport gone, dial request dropped");
        }
    }
}

/// The running node: storage, chain tip, discovery and sync wiring.
pub struct Node {
    queue: Arc<BlockQueue>,
    channels: Arc<ChannelManager>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    import_worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    shutdown: Notify,
}

impl Node {
    /// Wire all components and start the workers.
    pub fn start(config: NodeConfig) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir)?;

        let db_path = config.data_dir.join("db");
        let db = Database::open(&db_path)?;

        let chain = Arc::new(LocalChain::open(db.clone(), genesis_block())?);
        let queue = BlockQueue::open(db.clone(), config.database_reset);
        let hash_store = Arc::new(HashStore::open(db, config.database_reset)?);

        let node_manager = Arc::new(NodeManager::new());
        let (dial_tx, dial_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(DialQueue { tx: dial_tx });

        let sync = SyncManager::new(
            SyncConfig {
                max_hashes_ask: config.sync.max_hashes_ask,
            },
            Arc::clone(&chain) as Arc<dyn Chain>,
            Arc::clone(&hash_store),
            Arc::clone(&node_manager),
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::new(LogSyncListener),
        );
        sync.register_discovery();

        let channels = ChannelManager::new(
            Arc::clone(&sync),
            Arc::clone(&node_manager),
            Arc::clone(&connector) as Arc<dyn Connector>,
        );

        seed_known_peers(&config, &node_manager);

        let mut workers = sync.start();
        workers.extend(channels.start());
        workers.push(spawn_transport(dial_rx));

        let import_worker = importer::spawn(Arc::clone(&queue), chain, Arc::clone(&sync))?;

        info!(
            name = %config.node_name,
            network = config.network_id,
            bind = %config.network.bind_address,
            "Node started"
        );

        Ok(Arc::new(Self {
            queue,
            channels,
            workers: Mutex::new(workers),
            import_worker: Mutex::new(Some(import_worker)),
            shutdown: Notify::new(),
        }))
    }

    /// The channel supervisor, for callers forwarding transactions.
    pub fn channel_manager(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    /// Park until shutdown is requested, then stop the workers.
    pub async fn run(&self) -> Result<()> {
        self.shutdown.notified().await;

        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }

        // Closing the queue wakes the blocked import thread.
        self.queue.close();
        if let Some(handle) = self.import_worker.lock().take() {
            if handle.join().is_err() {
                warn!("Import worker exited abnormally");
            }
        }

        info!("Node stopped");
        Ok(())
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
        self.shutdown.notify_one();
    }
}

fn seed_known_peers(config: &NodeConfig, node_manager: &Arc<NodeManager>) {
    for enode in &config.network.known_peers {
        match DiscoveredNode::from_enode(enode) {
            Ok(node) => {
                node_manager.node_appeared(Arc::new(NodeHandler::new(node)));
            }
            Err(e) => warn!(enode = %enode, error = %e, "Ignoring malformed known peer"),
        }
    }
}

/// Placeholder transport driver: drains dial requests until the wire
/// layer picks them up.
///
/// The devp2p transport establishes the TCP session, runs the
/// encryption and protocol handshakes, and hands the resulting channel
/// to the channel supervisor.
fn spawn_transport(
    mut dial_rx: mpsc::UnboundedReceiver<DiscoveredNode>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(node) = dial_rx.recv().await {
            info!(node = %node.id.short(), addr = %node.addr, "Dialing peer");
        }
    })
}
