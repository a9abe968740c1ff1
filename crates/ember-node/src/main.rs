//! ember node - chain synchronization core for an Ethereum-family
//! network.
//!
//! This is the main entry point for the ember-node binary.

use anyhow::Result;
use clap::Parser;
use ember_node::{Args, Node, NodeConfig};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting ember node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::load(&args.config, &args)?;

    info!("Network id: {}", config.network_id);
    info!("Data directory: {:?}", config.data_dir);
    info!("P2P: {}", config.network.bind_address);

    let node = Node::start(config)?;

    let node_handle = Arc::clone(&node);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        node_handle.shutdown();
    });

    node.run().await?;

    Ok(())
}
