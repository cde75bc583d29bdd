//! Configuration management for ledgerline

use crate::crypto::Keypair;
use crate::error::{ChainError, Result};
use crate::ledger::DEFAULT_MINING_REWARD;
use crate::miner::PowConfig;
use crate::persistence::DEFAULT_NAMESPACE;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pow: PowConfig,
    #[serde(default)]
    pub miner: MinerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    /// Reconciliation peers registered at startup.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
    /// Where new blocks are sent over UDP.
    #[serde(default)]
    pub peer_udp_addrs: Vec<String>,
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            udp_port: default_udp_port(),
            bootstrap_peers: Vec::new(),
            peer_udp_addrs: Vec::new(),
            peer_timeout_secs: default_peer_timeout_secs(),
        }
    }
}

impl NetworkConfig {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            namespace: default_namespace(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_reward")]
    pub reward: i64,
    /// Hex private key of the node identity. A fresh one is generated per run
    /// when absent.
    #[serde(default)]
    pub private_key: Option<String>,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            reward: default_reward(),
            private_key: None,
        }
    }
}

impl MinerConfig {
    pub fn identity(&self) -> Result<Keypair> {
        match &self.private_key {
            Some(key) => Keypair::from_private(key.trim().as_bytes()),
            None => Ok(Keypair::generate()),
        }
    }
}

fn default_api_port() -> u16 {
    8000
}

fn default_udp_port() -> u16 {
    10001
}

fn default_peer_timeout_secs() -> u64 {
    5
}

fn default_database_path() -> String {
    "./data/ledgerline.db".to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_reward() -> i64 {
    DEFAULT_MINING_REWARD
}

/// Reads `path`; a missing file yields the defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(text) => parse_config(&text),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(ChainError::Config(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

pub fn parse_config(text: &str) -> Result<Config> {
    let config: Config =
        toml::from_str(text).map_err(|e| ChainError::Config(format!("Invalid config: {}", e)))?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate critical values
    pub fn validate(&self) -> Result<()> {
        if self.database.path.is_empty() {
            return Err(ChainError::Config("database.path must be set".to_string()));
        }
        if self.database.namespace.is_empty() {
            return Err(ChainError::Config("database.namespace must be set".to_string()));
        }
        if self.network.peer_timeout_secs == 0 {
            return Err(ChainError::Config(
                "network.peer_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
