//! # Node Configuration
//!
//! Process-level settings read from the environment. Overlay tuning lives
//! in the TOML file named by `QC_CONFIG`.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use qc_01_peer_routing::{ConfigError, ConfigProvider, StaticConfigProvider, TomlConfigProvider};

/// Default P2P listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:4001";

/// Errors in the process environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeConfigError {
    #[error("QC_LISTEN_ADDR is not a socket address: {0}")]
    ListenAddr(String),
    #[error("QC_NODE_KEY must be non-empty hex: {0}")]
    NodeKey(String),
}

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// P2P listen address.
    pub listen: SocketAddr,
    /// Public key the node id is derived from. Random when unset.
    pub public_key: Option<Vec<u8>>,
    /// Overlay TOML file; built-in defaults when unset.
    pub overlay_config: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 4001)),
            public_key: None,
            overlay_config: None,
        }
    }
}

impl NodeConfig {
    /// Read `QC_LISTEN_ADDR`, `QC_NODE_KEY` and `QC_CONFIG`.
    pub fn from_env() -> Result<Self, NodeConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build from a variable lookup. Unset variables keep their defaults.
    pub fn from_vars<F>(var: F) -> Result<Self, NodeConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(listen) = var("QC_LISTEN_ADDR") {
            config.listen = listen
                .parse()
                .map_err(|_| NodeConfigError::ListenAddr(listen.clone()))?;
        }
        if let Some(key) = var("QC_NODE_KEY") {
            let bytes = hex::decode(key.trim()).map_err(|e| NodeConfigError::NodeKey(e.to_string()))?;
            if bytes.is_empty() {
                return Err(NodeConfigError::NodeKey("empty key".into()));
            }
            config.public_key = Some(bytes);
        }
        config.overlay_config = var("QC_CONFIG").map(PathBuf::from);

        Ok(config)
    }

    /// The configured public key, or a fresh random one.
    pub fn node_key(&self) -> Vec<u8> {
        self.public_key
            .clone()
            .unwrap_or_else(|| rand::random::<[u8; 32]>().to_vec())
    }

    /// Load the overlay configuration and bootstrap list.
    pub fn overlay_provider(&self) -> Result<Box<dyn ConfigProvider>, ConfigError> {
        match &self.overlay_config {
            Some(path) => Ok(Box::new(TomlConfigProvider::load(path)?)),
            None => Ok(Box::new(StaticConfigProvider::new())),
        }
    }
}
