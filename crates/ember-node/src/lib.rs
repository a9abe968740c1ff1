//! # ember-node
//!
//! Composition root for the ember chain synchronization node: config
//! loading, chain tip tracking, the import worker and component wiring.

pub mod chain;
pub mod config;
pub mod importer;
pub mod node;

pub use chain::{genesis_block, ImportOutcome, LocalChain, GENESIS_HASH};
pub use config::{Args, NodeConfig};
pub use node::Node;
