//! Node discovery registry.
//!
//! The discovery transport feeds the registry as nodes come and go;
//! consumers subscribe with a predicate over node statistics and query
//! ranked candidate lists.

use crate::{NetworkError, NetworkResult, NodeId, Status};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// A discovered node: identity plus dialable address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Node identifier.
    pub id: NodeId,
    /// Address the node listens on.
    pub addr: SocketAddr,
}

impl Node {
    /// Create a node from its parts.
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }

    /// Parse an `enode://<id>@<host>:<port>` URL.
    pub fn from_enode(url: &str) -> NetworkResult<Self> {
        let rest = url
            .strip_prefix("enode://")
            .ok_or_else(|| NetworkError::InvalidEnode(format!("missing scheme in {}", url)))?;
        let (id_part, addr_part) = rest
            .split_once('@')
            .ok_or_else(|| NetworkError::InvalidEnode(format!("missing address in {}", url)))?;
        let id = NodeId::from_hex(id_part)?;
        let addr = addr_part
            .parse()
            .map_err(|_| NetworkError::InvalidEnode(format!("bad address in {}", url)))?;
        Ok(Self { id, addr })
    }
}

/// Statistics gathered for a discovered node.
#[derive(Debug, Default)]
pub struct NodeStatistics {
    last_inbound_status: RwLock<Option<Status>>,
}

impl NodeStatistics {
    /// Create empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// The last status message received from the node, if any.
    pub fn eth_last_inbound_status(&self) -> Option<Status> {
        self.last_inbound_status.read().clone()
    }

    /// Record a status message received from the node.
    pub fn set_eth_last_inbound_status(&self, status: Status) {
        *self.last_inbound_status.write() = Some(status);
    }
}

/// A discovered node together with its statistics.
#[derive(Debug)]
pub struct NodeHandler {
    node: Node,
    stats: NodeStatistics,
}

impl NodeHandler {
    /// Wrap a discovered node.
    pub fn new(node: Node) -> Self {
        Self {
            node,
            stats: NodeStatistics::new(),
        }
    }

    /// The underlying node.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Statistics for the node.
    pub fn node_statistics(&self) -> &NodeStatistics {
        &self.stats
    }
}

/// Receives notifications as discovered nodes match a predicate.
pub trait DiscoverListener: Send + Sync {
    /// A node matching the subscription predicate appeared.
    fn node_appeared(&self, handler: &NodeHandler);

    /// A previously seen node went away.
    fn node_disappeared(&self, _handler: &NodeHandler) {}
}

type ListenerEntry = (
    Arc<dyn DiscoverListener>,
    Box<dyn Fn(&NodeStatistics) -> bool + Send + Sync>,
);

/// Registry of discovered nodes.
#[derive(Default)]
pub struct NodeManager {
    /// Known nodes keyed by hex node id.
    nodes: DashMap<String, Arc<NodeHandler>>,
    listeners: RwLock<Vec<ListenerEntry>>,
}

impl NodeManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to node appearances filtered by `predicate`.
    pub fn add_discover_listener(
        &self,
        listener: Arc<dyn DiscoverListener>,
        predicate: Box<dyn Fn(&NodeStatistics) -> bool + Send + Sync>,
    ) {
        self.listeners.write().push((listener, predicate));
    }

    /// Register or refresh a node and notify matching listeners.
    pub fn node_appeared(&self, handler: Arc<NodeHandler>) {
        let key = handler.node().id.to_hex();
        debug!(node = %handler.node().id.short(), "Node appeared");
        self.nodes.insert(key, Arc::clone(&handler));

        for (listener, predicate) in self.listeners.read().iter() {
            if predicate(handler.node_statistics()) {
                listener.node_appeared(&handler);
            }
        }
    }

    /// Remove a node from the registry and notify listeners.
    pub fn node_disappeared(&self, id: &NodeId) {
        if let Some((_, handler)) = self.nodes.remove(&id.to_hex()) {
            for (listener, _) in self.listeners.read().iter() {
                listener.node_disappeared(&handler);
            }
        }
    }

    /// Look a node up by its hex id.
    pub fn find_by_id(&self, hex_id: &str) -> Option<Arc<NodeHandler>> {
        self.nodes.get(hex_id).map(|entry| Arc::clone(&entry))
    }

    /// Select up to `limit` nodes matching `predicate`, ranked by
    /// `comparator`.
    pub fn get_nodes<P, C>(&self, predicate: P, comparator: C, limit: usize) -> Vec<Arc<NodeHandler>>
    where
        P: Fn(&NodeHandler) -> bool,
        C: FnMut(&Arc<NodeHandler>, &Arc<NodeHandler>) -> Ordering,
    {
        let mut selected: Vec<_> = self
            .nodes
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        selected.sort_by(comparator);
        selected.truncate(limit);
        selected
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
