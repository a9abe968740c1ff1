//! # ember-storage
//!
//! Storage layer for the ember node.
//!
//! This crate provides the RocksDB store plus the two durable
//! sync-side structures built on top of it:
//! - [`BlockQueue`]: ordered, blocking queue of blocks awaiting import
//! - [`HashStore`]: ordered store of block hashes awaiting retrieval
//!
//! The store exposes point reads, whole-family scans for rebuilding
//! in-memory state on startup, and atomic commits staged through a
//! closure ([`Database::commit`]).
//!
//! ## Column Families
//!
//! - `blockqueue`: pending blocks keyed by big-endian block number
//! - `hashset`: hashes of all pending blocks
//! - `hashstore`: ordered hashes awaiting block retrieval
//! - `metadata`: chain tip and other node metadata

mod database;
mod error;
mod hash_store;
mod queue;

pub use database::{ColumnFamily, Commit, Database};
pub use error::{StorageError, StorageResult};
pub use hash_store::HashStore;
pub use queue::BlockQueue;
