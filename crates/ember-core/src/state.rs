//! Synchronization states.

/// State of the global sync machine, also used as the per-peer
/// retrieval sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Before the first peer is admitted.
    Init,
    /// The master peer is downloading block hashes.
    HashRetrieving,
    /// Peers are downloading block bodies.
    BlockRetrieving,
    /// The master peer is re-downloading hashes to fill a chain gap.
    GapRecovery,
    /// Gap hashes are retrieved; blocks for them are being fetched.
    DoneGapRecovery,
    /// The chain has caught up with the network.
    DoneSync,
    /// Not participating in any retrieval.
    Idle,
}
