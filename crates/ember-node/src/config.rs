//! Node configuration.

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Ethereum-family chain synchronization node.
#[derive(Parser, Debug)]
#[command(name = "ember-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ember.toml")]
    pub config: PathBuf,

    /// Data directory
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// P2P bind address
    #[arg(long)]
    pub p2p_bind: Option<String>,

    /// Clear the sync queue stores on startup
    #[arg(long)]
    pub reset_db: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name.
    pub node_name: String,
    /// Chain network id (1 = mainnet).
    pub network_id: u64,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Clear the sync queue stores on startup.
    #[serde(default)]
    pub database_reset: bool,
    /// Sync configuration.
    #[serde(default)]
    pub sync: SyncSettings,
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkSettings,
}

/// Sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Ceiling on hashes requested from a peer per round.
    #[serde(default = "default_max_hashes_ask")]
    pub max_hashes_ask: usize,
}

fn default_max_hashes_ask() -> usize {
    10_000
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_hashes_ask: default_max_hashes_ask(),
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// P2P bind address.
    pub bind_address: String,
    /// Known peers, as `enode://<id>@<host>:<port>` URLs.
    pub known_peers: Vec<String>,
    /// Maximum connections.
    pub max_connections: usize,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", ember_network::DEFAULT_PORT),
            known_peers: Vec::new(),
            max_connections: 30,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "ember".to_string(),
            network_id: 1,
            data_dir: PathBuf::from(".ember"),
            database_reset: false,
            sync: SyncSettings::default(),
            network: NetworkSettings::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default()
        };

        // Override with CLI args
        if let Some(ref data_dir) = args.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(ref p2p_bind) = args.p2p_bind {
            config.network.bind_address = p2p_bind.clone();
        }
        if args.reset_db {
            config.database_reset = true;
        }

        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            config: PathBuf::from("ember.toml"),
            data_dir: None,
            p2p_bind: None,
            reset_db: false,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_defaults_when_file_missing() {
        let config = NodeConfig::load(Path::new("/nonexistent/ember.toml"), &args()).unwrap();
        assert_eq!(config.network_id, 1);
        assert_eq!(config.sync.max_hashes_ask, 10_000);
        assert!(!config.database_reset);
    }

    #[test]
    fn test_cli_overrides() {
        let mut args = args();
        args.data_dir = Some(PathBuf::from("/tmp/ember-test"));
        args.reset_db = true;

        let config = NodeConfig::load(Path::new("/nonexistent/ember.toml"), &args).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/ember-test"));
        assert!(config.database_reset);
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("ember.toml");

        let mut config = NodeConfig::default();
        config.sync.max_hashes_ask = 64;
        config.save(&path).unwrap();

        let reloaded = NodeConfig::load(&path, &args()).unwrap();
        assert_eq!(reloaded.sync.max_hashes_ask, 64);
    }
}
