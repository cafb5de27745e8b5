use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::domain::{
    AdaptiveTimeoutConfig, KademliaConfig, NetworkAddress, OverlayConfig, ReachabilityConfig,
};
use crate::ports::ConfigProvider;

// ============================================================================
// StaticConfigProvider - Hardcoded config for testing/development
// ============================================================================

/// Static configuration provider with hardcoded values.
///
/// Useful for testing and development. For production, use `TomlConfigProvider`.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    bootstrap_nodes: Vec<NetworkAddress>,
    config: OverlayConfig,
}

impl StaticConfigProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bootstrap_nodes(mut self, nodes: Vec<NetworkAddress>) -> Self {
        self.bootstrap_nodes = nodes;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: OverlayConfig) -> Self {
        self.config = config;
        self
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn get_bootstrap_nodes(&self) -> Vec<NetworkAddress> {
        self.bootstrap_nodes.clone()
    }

    fn get_overlay_config(&self) -> OverlayConfig {
        self.config.clone()
    }
}

// ============================================================================
// TomlConfigProvider - Production Config Loading
// ============================================================================

/// Errors that can occur during config loading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {error}")]
    Io { path: String, error: String },
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// Values parse but cannot work together
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    bootstrap: BootstrapSection,
    #[serde(default)]
    kademlia: KademliaSection,
    #[serde(default)]
    reachability: ReachabilitySection,
    #[serde(default)]
    timeout: TimeoutSection,
    #[serde(default)]
    network: NetworkSection,
}

#[derive(Debug, Deserialize, Default)]
struct BootstrapSection {
    #[serde(default)]
    nodes: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct KademliaSection {
    k: Option<usize>,
    alpha: Option<usize>,
    query_timeout_secs: Option<u64>,
    max_inbound_streams: Option<usize>,
    max_outbound_streams: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ReachabilitySection {
    required_successful_dials: Option<usize>,
    max_concurrent_probes: Option<usize>,
    timeout_secs: Option<u64>,
    startup_delay_secs: Option<u64>,
    refresh_interval_secs: Option<u64>,
    max_inbound_streams: Option<usize>,
    max_outbound_streams: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TimeoutSection {
    initial_timeout_ms: Option<u64>,
    min_timeout_ms: Option<u64>,
    max_timeout_ms: Option<u64>,
    failure_multiplier: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct NetworkSection {
    protocol_prefix: Option<String>,
    max_frame_size: Option<usize>,
}

/// TOML-based configuration provider.
///
/// Every field is optional; missing ones take their defaults.
///
/// # Config File Format
///
/// ```toml
/// [bootstrap]
/// nodes = ["/ip4/203.0.113.7/tcp/4001"]
///
/// [kademlia]
/// k = 20
/// alpha = 3
/// query_timeout_secs = 60
/// max_inbound_streams = 32
/// max_outbound_streams = 64
///
/// [reachability]
/// timeout_secs = 30
/// startup_delay_secs = 5
/// refresh_interval_secs = 60
///
/// [timeout]
/// initial_timeout_ms = 10000
/// min_timeout_ms = 2000
/// max_timeout_ms = 60000
///
/// [network]
/// protocol_prefix = "qc"
/// max_frame_size = 4194304
/// ```
#[derive(Debug, Clone)]
pub struct TomlConfigProvider {
    bootstrap_nodes: Vec<NetworkAddress>,
    config: OverlayConfig,
}

impl TomlConfigProvider {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let bootstrap_nodes = file
            .bootstrap
            .nodes
            .iter()
            .filter_map(|node| match node.parse::<NetworkAddress>() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    warn!(node = %node, error = %e, "[qc-01] Ignoring bad bootstrap address");
                    None
                }
            })
            .collect();

        let kd = KademliaConfig::default();
        let kc = file.kademlia;
        let kademlia = KademliaConfig {
            k: kc.k.unwrap_or(kd.k),
            alpha: kc.alpha.unwrap_or(kd.alpha),
            query_timeout_secs: kc.query_timeout_secs.unwrap_or(kd.query_timeout_secs),
            max_inbound_streams: kc.max_inbound_streams.unwrap_or(kd.max_inbound_streams),
            max_outbound_streams: kc.max_outbound_streams.unwrap_or(kd.max_outbound_streams),
        };

        let rd = ReachabilityConfig::default();
        let rc = file.reachability;
        let reachability = ReachabilityConfig {
            required_successful_dials: rc
                .required_successful_dials
                .unwrap_or(rd.required_successful_dials),
            max_concurrent_probes: rc.max_concurrent_probes.unwrap_or(rd.max_concurrent_probes),
            timeout_secs: rc.timeout_secs.unwrap_or(rd.timeout_secs),
            startup_delay_secs: rc.startup_delay_secs.unwrap_or(rd.startup_delay_secs),
            refresh_interval_secs: rc.refresh_interval_secs.unwrap_or(rd.refresh_interval_secs),
            max_inbound_streams: rc.max_inbound_streams.unwrap_or(rd.max_inbound_streams),
            max_outbound_streams: rc.max_outbound_streams.unwrap_or(rd.max_outbound_streams),
        };

        let td = AdaptiveTimeoutConfig::default();
        let tc = file.timeout;
        let timeout = AdaptiveTimeoutConfig {
            initial_timeout_ms: tc.initial_timeout_ms.unwrap_or(td.initial_timeout_ms),
            min_timeout_ms: tc.min_timeout_ms.unwrap_or(td.min_timeout_ms),
            max_timeout_ms: tc.max_timeout_ms.unwrap_or(td.max_timeout_ms),
            failure_multiplier: tc.failure_multiplier.unwrap_or(td.failure_multiplier),
        };

        let od = OverlayConfig::default();
        let config = OverlayConfig {
            kademlia,
            reachability,
            timeout,
            protocol_prefix: file.network.protocol_prefix.unwrap_or(od.protocol_prefix),
            max_frame_size: file.network.max_frame_size.unwrap_or(od.max_frame_size),
        };
        validate(&config)?;

        Ok(Self {
            bootstrap_nodes,
            config,
        })
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn get_bootstrap_nodes(&self) -> Vec<NetworkAddress> {
        self.bootstrap_nodes.clone()
    }

    fn get_overlay_config(&self) -> OverlayConfig {
        self.config.clone()
    }
}

/// Reject settings that would stall or break the overlay.
pub fn validate(config: &OverlayConfig) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

    if config.kademlia.k == 0 {
        return invalid("kademlia.k must be at least 1");
    }
    if config.kademlia.alpha == 0 {
        return invalid("kademlia.alpha must be at least 1");
    }
    if config.kademlia.max_inbound_streams == 0 || config.kademlia.max_outbound_streams == 0 {
        return invalid("kademlia stream limits must be at least 1");
    }
    if config.reachability.required_successful_dials == 0 {
        return invalid("reachability.required_successful_dials must be at least 1");
    }
    if config.reachability.max_concurrent_probes == 0 {
        return invalid("reachability.max_concurrent_probes must be at least 1");
    }
    if config.timeout.max_timeout_ms < config.timeout.min_timeout_ms {
        return invalid("timeout.max_timeout_ms is below timeout.min_timeout_ms");
    }
    if config.timeout.failure_multiplier < 1.0 {
        return invalid("timeout.failure_multiplier must be at least 1.0");
    }
    if config.protocol_prefix.is_empty() || config.protocol_prefix.contains('/') {
        return invalid("network.protocol_prefix must be a non-empty path segment");
    }
    if config.max_frame_size == 0 {
        return invalid("network.max_frame_size must be positive");
    }
    Ok(())
}
