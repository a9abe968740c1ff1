//! # ember-sync
//!
//! Chain synchronization for the ember node.
//!
//! This crate provides:
//! - The global sync state machine and master-peer election
//! - Gap detection and recovery
//! - Channel lifecycle supervision with reconnect bookkeeping

mod channels;
mod sync;

pub use channels::ChannelManager;
pub use sync::{SyncConfig, SyncListener, SyncManager};

use std::time::Duration;

/// Target number of useful peers in the sync pool.
pub const PEERS_COUNT: usize = 5;

/// How long a pending outbound connection is tracked before being
/// forgotten.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Gaps wider than this trigger full gap recovery instead of a single
/// parent fetch.
pub const LARGE_GAP_THRESHOLD: u64 = 5;

/// Announced blocks imported within this window complete the sync.
pub const TIME_TO_IMPORT_THRESHOLD: Duration = Duration::from_secs(600);

/// Period of the sync maintenance worker.
pub const WORKER_PERIOD: Duration = Duration::from_secs(3);

/// Period of the sync statistics logger.
pub const LOG_WORKER_PERIOD: Duration = Duration::from_secs(30);

/// Period of the channel promotion worker.
pub const CHANNEL_WORKER_PERIOD: Duration = Duration::from_secs(1);

/// Period of the reconnect worker.
pub const RECONNECT_PERIOD: Duration = Duration::from_secs(5);

#[cfg(test)]
pub(crate) mod testing;
