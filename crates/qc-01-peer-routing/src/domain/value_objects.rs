//! Value Objects for Peer Routing

use std::time::Duration;

/// XOR of two 256-bit distance keys.
///
/// Ordered as a big-endian unsigned integer, so smaller means closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Distance(pub [u8; 32]);

impl Distance {
    pub const ZERO: Distance = Distance([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Position of the highest set bit (0-255), `None` for a zero distance.
    ///
    /// Distances in `[2^i, 2^(i+1))` map to bucket `i`.
    pub fn bucket_index(&self) -> Option<usize> {
        let (byte_idx, byte) = self.0.iter().enumerate().find(|(_, b)| **b != 0)?;
        let leading = byte_idx * 8 + byte.leading_zeros() as usize;
        Some(255 - leading)
    }
}

/// Configuration constants for the Kademlia routing layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KademliaConfig {
    /// Bucket size and result-set size (default: 20)
    pub k: usize,
    /// Peers queried in parallel per traversal round (default: 3)
    pub alpha: usize,
    /// Upper bound on one full traversal (default: 60 seconds)
    pub query_timeout_secs: u64,
    /// Concurrent inbound routing-protocol streams (default: 32)
    pub max_inbound_streams: usize,
    /// Concurrent outbound routing-protocol streams (default: 64)
    pub max_outbound_streams: usize,
}

impl Default for KademliaConfig {
    fn default() -> Self {
        Self {
            k: 20,
            alpha: 3,
            query_timeout_secs: 60,
            max_inbound_streams: 32,
            max_outbound_streams: 64,
        }
    }
}

impl KademliaConfig {
    /// Create a config suitable for testing (smaller values)
    pub fn for_testing() -> Self {
        Self {
            k: 3, // Smaller buckets for easier testing
            alpha: 2,
            query_timeout_secs: 5,
            max_inbound_streams: 16,
            max_outbound_streams: 16,
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

/// Number of agreeing verifiers needed to confirm or reject an address.
pub const REQUIRED_SUCCESSFUL_DIALS: usize = 4;

/// Configuration for the reachability verifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachabilityConfig {
    /// Successes (or failures) from distinct segments that settle an address
    pub required_successful_dials: usize,
    /// Verifier peers probed in parallel (default: 4)
    pub max_concurrent_probes: usize,
    /// Bound on serving one inbound request and on one outbound round
    pub timeout_secs: u64,
    /// Delay before the first outbound round after start
    pub startup_delay_secs: u64,
    /// Delay between outbound rounds
    pub refresh_interval_secs: u64,
    /// Simultaneous inbound verification streams accepted
    pub max_inbound_streams: usize,
    /// Simultaneous outbound verification streams opened
    pub max_outbound_streams: usize,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            required_successful_dials: REQUIRED_SUCCESSFUL_DIALS,
            max_concurrent_probes: 4,
            timeout_secs: 30,
            startup_delay_secs: 5,
            refresh_interval_secs: 60,
            max_inbound_streams: 1,
            max_outbound_streams: 1,
        }
    }
}

impl ReachabilityConfig {
    pub fn for_testing() -> Self {
        Self {
            timeout_secs: 2,
            startup_delay_secs: 1,
            refresh_interval_secs: 5,
            max_inbound_streams: 8,
            max_outbound_streams: 8,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Bounds for the rolling-latency request deadline
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveTimeoutConfig {
    /// Deadline used before any latency sample exists
    pub initial_timeout_ms: u64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    /// Factor applied to the current deadline when an operation times out
    pub failure_multiplier: f64,
}

impl Default for AdaptiveTimeoutConfig {
    fn default() -> Self {
        Self {
            initial_timeout_ms: 10_000,
            min_timeout_ms: 2_000,
            max_timeout_ms: 60_000,
            failure_multiplier: 2.0,
        }
    }
}

impl AdaptiveTimeoutConfig {
    pub fn for_testing() -> Self {
        Self {
            initial_timeout_ms: 500,
            min_timeout_ms: 100,
            max_timeout_ms: 2_000,
            failure_multiplier: 2.0,
        }
    }
}

/// Default protocol prefix: `/qc/kad/1.0.0`, `/qc/autonat/1.0.0`.
pub const DEFAULT_PROTOCOL_PREFIX: &str = "qc";

/// Default maximum frame body size (4 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Complete overlay configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayConfig {
    pub kademlia: KademliaConfig,
    pub reachability: ReachabilityConfig,
    pub timeout: AdaptiveTimeoutConfig,
    pub protocol_prefix: String,
    pub max_frame_size: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            kademlia: KademliaConfig::default(),
            reachability: ReachabilityConfig::default(),
            timeout: AdaptiveTimeoutConfig::default(),
            protocol_prefix: DEFAULT_PROTOCOL_PREFIX.to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl OverlayConfig {
    pub fn for_testing() -> Self {
        Self {
            kademlia: KademliaConfig::for_testing(),
            reachability: ReachabilityConfig::for_testing(),
            timeout: AdaptiveTimeoutConfig::for_testing(),
            ..Self::default()
        }
    }

    /// `/<prefix>/kad/1.0.0`
    pub fn routing_protocol(&self) -> String {
        format!("/{}/kad/1.0.0", self.protocol_prefix)
    }

    /// `/<prefix>/autonat/1.0.0`
    pub fn reachability_protocol(&self) -> String {
        format!("/{}/autonat/1.0.0", self.protocol_prefix)
    }
}
