//! Peer channel lifecycle.

use crate::PeerHandle;
use ember_core::Transaction;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A connection to a remote peer, tracked from accept to teardown.
///
/// The channel owns the session handed to the sync layer; the wire
/// handlers flip the lifecycle flags as the handshake progresses.
pub struct Channel {
    session: Arc<dyn PeerHandle>,
    /// Hex node id of the remote, used for reconnect bookkeeping.
    remote_id: String,
    init_passed: AtomicBool,
    useful: AtomicBool,
}

impl Channel {
    /// Wrap a freshly created session.
    pub fn new(session: Arc<dyn PeerHandle>) -> Self {
        let remote_id = session.peer_id().to_hex();
        Self {
            session,
            remote_id,
            init_passed: AtomicBool::new(false),
            useful: AtomicBool::new(false),
        }
    }

    /// The protocol session exposed to the sync layer.
    pub fn session(&self) -> &Arc<dyn PeerHandle> {
        &self.session
    }

    /// Hex node id of the remote.
    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Mark protocol initialization finished; `useful` records whether
    /// the remote speaks a compatible protocol set.
    pub fn mark_init_passed(&self, useful: bool) {
        self.useful.store(useful, Ordering::SeqCst);
        self.init_passed.store(true, Ordering::SeqCst);
    }

    /// Whether protocol initialization has finished.
    pub fn has_init_passed(&self) -> bool {
        self.init_passed.load(Ordering::SeqCst)
    }

    /// Whether the remote is worth handing to the sync layer.
    pub fn is_useful(&self) -> bool {
        self.useful.load(Ordering::SeqCst)
    }

    /// Forward a transaction to the remote.
    pub fn send_transaction(&self, tx: &Transaction) {
        self.session.send_transaction(tx);
    }

    /// Tear the session down after the wire connection dropped.
    pub fn on_disconnect(&self) {
        self.session.on_disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NodeId, PeerCommand, PeerSession};
    use tokio::sync::mpsc;

    #[test]
    fn test_lifecycle_flags() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Arc::new(PeerSession::new(NodeId([1; 64]), tx));
        let channel = Channel::new(session);

        assert!(!channel.has_init_passed());
        assert!(!channel.is_useful());

        channel.mark_init_passed(true);
        assert!(channel.has_init_passed());
        assert!(channel.is_useful());
        assert_eq!(channel.remote_id(), NodeId([1; 64]).to_hex());
    }

    #[test]
    fn test_transaction_forwarded_to_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Arc::new(PeerSession::new(NodeId([2; 64]), tx));
        let channel = Channel::new(session);

        channel.send_transaction(&Transaction::new(1, vec![0xde, 0xad]));
        assert!(matches!(
            rx.try_recv().unwrap(),
            PeerCommand::SendTransaction(_)
        ));
    }
}
