//! Peer sessions.

use crate::{NetworkError, NetworkResult, PeerCommand, Status};
use ember_core::{BlockHash, SyncState, TotalDifficulty, Transaction};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 64-byte node identifier derived from the remote's public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; 64]);

impl NodeId {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Parse from a 128-character hex string.
    pub fn from_hex(value: &str) -> NetworkResult<Self> {
        let bytes = hex::decode(value).map_err(|e| NetworkError::InvalidNodeId(e.to_string()))?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| NetworkError::InvalidNodeId(format!("bad length in {}", value)))?;
        Ok(Self(bytes))
    }

    /// Hex form used as a map key for connection bookkeeping.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated form for logs.
    pub fn short(&self) -> String {
        format!("{}...", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Surface a peer session exposes to the sync layer.
pub trait PeerHandle: Send + Sync {
    /// Node identifier established during the encryption handshake.
    fn peer_id(&self) -> NodeId;

    /// Best block hash advertised in the status message.
    fn best_hash(&self) -> BlockHash;

    /// Total difficulty advertised in the status message.
    fn total_difficulty(&self) -> TotalDifficulty;

    /// The status message received during the protocol handshake.
    fn handshake_status(&self) -> Option<Status>;

    /// Whether the protocol handshake completed successfully.
    fn has_status_succeeded(&self) -> bool {
        self.handshake_status().is_some()
    }

    /// Current retrieval sub-state.
    fn sync_state(&self) -> SyncState;

    /// Move the peer into a new retrieval sub-state.
    fn change_state(&self, state: SyncState);

    /// Whether the peer is sitting idle.
    fn is_idle(&self) -> bool {
        self.sync_state() == SyncState::Idle
    }

    /// Whether the current hash retrieval round has finished.
    fn is_hash_retrieving_done(&self) -> bool;

    /// Whether the remote reported it has run out of blocks to serve.
    fn has_no_more_blocks(&self) -> bool;

    /// Cap the number of hashes requested per round.
    fn set_max_hashes_ask(&self, max: usize);

    /// Current hashes-per-request cap.
    fn max_hashes_ask(&self) -> usize;

    /// Forward a transaction to the remote.
    fn send_transaction(&self, tx: &Transaction);

    /// Tear down session state after the wire connection dropped.
    fn on_disconnect(&self);

    /// Emit one line of per-peer sync statistics.
    fn log_sync_stats(&self);
}

/// Live session with a remote peer.
///
/// Wire I/O happens in a transport task owned by the channel; the
/// session records protocol state and forwards retrieval commands to
/// that task through an unbounded channel.
pub struct PeerSession {
    node_id: NodeId,
    status: RwLock<Option<Status>>,
    sync_state: RwLock<SyncState>,
    max_hashes_ask: AtomicUsize,
    hash_retrieving_done: AtomicBool,
    no_more_blocks: AtomicBool,
    commands: mpsc::UnboundedSender<PeerCommand>,
}

impl PeerSession {
    /// Create a session for a freshly connected peer.
    pub fn new(node_id: NodeId, commands: mpsc::UnboundedSender<PeerCommand>) -> Self {
        Self {
            node_id,
            status: RwLock::new(None),
            sync_state: RwLock::new(SyncState::Idle),
            max_hashes_ask: AtomicUsize::new(0),
            hash_retrieving_done: AtomicBool::new(false),
            no_more_blocks: AtomicBool::new(false),
            commands,
        }
    }

    /// Record the status message received from the remote.
    pub fn set_status(&self, status: Status) {
        *self.status.write() = Some(status);
    }

    /// Mark the current hash retrieval round as finished. Called by the
    /// transport when the remote returns fewer hashes than asked.
    pub fn mark_hash_retrieving_done(&self) {
        self.hash_retrieving_done.store(true, Ordering::SeqCst);
    }

    /// Record that the remote has no more blocks for our requests.
    pub fn mark_no_more_blocks(&self) {
        self.no_more_blocks.store(true, Ordering::SeqCst);
    }

    fn send_command(&self, command: PeerCommand) {
        if self.commands.send(command).is_err() {
            warn!(peer = %self.node_id.short(), "Transport task gone, command dropped");
        }
    }
}

impl PeerHandle for PeerSession {
    fn peer_id(&self) -> NodeId {
        self.node_id
    }

    fn best_hash(&self) -> BlockHash {
        self.status
            .read()
            .as_ref()
            .map(|s| s.best_hash)
            .unwrap_or(BlockHash::ZERO)
    }

    fn total_difficulty(&self) -> TotalDifficulty {
        self.status
            .read()
            .as_ref()
            .map(|s| s.total_difficulty.clone())
            .unwrap_or_default()
    }

    fn handshake_status(&self) -> Option<Status> {
        self.status.read().clone()
    }

    fn sync_state(&self) -> SyncState {
        *self.sync_state.read()
    }

    fn change_state(&self, state: SyncState) {
        let mut current = self.sync_state.write();
        debug!(
            peer = %self.node_id.short(),
            from = ?*current,
            to = ?state,
            "Peer sync state changed"
        );
        match state {
            SyncState::HashRetrieving => {
                self.hash_retrieving_done.store(false, Ordering::SeqCst);
                self.send_command(PeerCommand::StartHashRetrieval {
                    max_hashes: self.max_hashes_ask.load(Ordering::SeqCst),
                });
            }
            SyncState::BlockRetrieving => {
                self.send_command(PeerCommand::StartBlockRetrieval);
            }
            _ => {}
        }
        *current = state;
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
        self.send_command(PeerCommand::SendTransaction(tx.clone()));
    }

    fn on_disconnect(&self) {
        self.send_command(PeerCommand::Disconnect);
        *self.sync_state.write() = SyncState::Idle;
    }

    fn log_sync_stats(&self) {
        info!(
            peer = %self.node_id.short(),
            state = ?self.sync_state(),
            td = %self.total_difficulty(),
            best = %self.best_hash().short(),
            "Peer sync stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    fn session() -> (PeerSession, mpsc::UnboundedReceiver<PeerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PeerSession::new(NodeId([7; 64]), tx), rx)
    }

    fn status(td: u64) -> Status {
        Status {
            protocol_version: crate::PROTOCOL_VERSION,
            network_id: 1,
            total_difficulty: BigUint::from(td),
            best_hash: BlockHash([0xbb; 32]),
            genesis_hash: BlockHash([0x11; 32]),
        }
    }

    #[test]
    fn test_node_id_hex_round_trip() {
        let id = NodeId([0xcd; 64]);
        let parsed = NodeId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_node_id_rejects_bad_length() {
        assert!(NodeId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_defaults_before_status() {
        let (session, _rx) = session();
        assert_eq!(session.best_hash(), BlockHash::ZERO);
        assert_eq!(session.total_difficulty(), BigUint::default());
        assert!(!session.has_status_succeeded());
        assert!(session.is_idle());
    }

    #[test]
    fn test_status_backs_accessors() {
        let (session, _rx) = session();
        session.set_status(status(900));
        assert!(session.has_status_succeeded());
        assert_eq!(session.total_difficulty(), BigUint::from(900u32));
        assert_eq!(session.best_hash(), BlockHash([0xbb; 32]));
    }

    #[test]
    fn test_hash_retrieval_resets_done_flag_and_sends_command() {
        let (session, mut rx) = session();
        session.set_max_hashes_ask(64);
        session.mark_hash_retrieving_done();

        session.change_state(SyncState::HashRetrieving);

        assert!(!session.is_hash_retrieving_done());
        match rx.try_recv().unwrap() {
            PeerCommand::StartHashRetrieval { max_hashes } => assert_eq!(max_hashes, 64),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_idle_transition_sends_no_command() {
        let (session, mut rx) = session();
        session.change_state(SyncState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_repeated_hash_retrieval_reissues_command() {
        let (session, mut rx) = session();
        session.change_state(SyncState::HashRetrieving);
        session.mark_hash_retrieving_done();
        session.change_state(SyncState::HashRetrieving);

        assert!(!session.is_hash_retrieving_done());
        let mut commands = 0;
        while rx.try_recv().is_ok() {
            commands += 1;
        }
        assert_eq!(commands, 2);
    }

    #[test]
    fn test_disconnect_resets_state() {
        let (session, mut rx) = session();
        session.change_state(SyncState::BlockRetrieving);
        session.on_disconnect();
        assert!(session.is_idle());

        assert!(matches!(
            rx.try_recv().unwrap(),
            PeerCommand::StartBlockRetrieval
        ));
        assert!(matches!(rx.try_recv().unwrap(), PeerCommand::Disconnect));
    }
}
