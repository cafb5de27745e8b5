//! # Peer Routing & Reachability Subsystem
//!
//! **Subsystem ID:** 1
//!
//! This crate implements the network-reachability and peer-routing layer of
//! the Quantum-Chain overlay:
//!
//! - a **reachability verifier** that asks random peers to dial us back on
//!   our observed addresses, and answers the same request for others;
//! - a **Kademlia routing layer** that locates peers and values by
//!   iteratively querying ever-closer nodes.
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture with:
//! - **Domain Layer:** identities, XOR distance, k-buckets, reachability tally
//! - **Ports Layer:** the APIs we expose and the collaborators we need
//!   (connections, stream registration, address and peer books)
//! - **Protocol / Network Layers:** framed wire messages and single-peer
//!   exchanges under an adaptive deadline
//! - **Query / Service Layers:** the traversal engine and the lookup API
//! - **Adapters Layer:** in-memory stores, configuration, validation
//!
//! ## Example
//!
//! ```rust
//! use qc_01_peer_routing::{KadId, KademliaConfig, PeerId, RoutingTable, Timestamp};
//!
//! let local = PeerId::from_public_key(b"local node key");
//! let mut table = RoutingTable::new(local, &KademliaConfig::default());
//!
//! let remote = PeerId::from_public_key(b"remote node key");
//! table.insert(remote, Timestamp::new(1000)).unwrap();
//!
//! let closest = table.closest_peers(&KadId::from_key(b"some key"), 20);
//! assert_eq!(closest, vec![remote]);
//! ```

pub mod adapters;
pub mod domain;
pub mod network;
pub mod ports;
pub mod protocol;
pub mod query;
pub mod reachability;
pub mod service;

/// In-memory network and fixed collaborators.
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// =============================================================================
// RE-EXPORTS
// =============================================================================

// Domain
pub use domain::{
    Distance, Host, InsertOutcome, KadId, KademliaConfig, NetworkAddress, NetworkError,
    OverlayConfig, PeerDistanceList, PeerId, PeerInfo, ProtocolError, QueryError,
    ReachabilityConfig, Record, RoutingTable, RoutingTableError, RoutingTableStats, Timestamp,
    Transport, ValidationError,
};

// Port traits
pub use ports::{
    AddressClassifier, AddressManager, ConfigProvider, Connection, ConnectionManager, DialTarget,
    FindPeerOptions, LivenessChecker, PeerRoutingApi, PeerStore, ProtocolStream, RandomWalk,
    ReachabilityApi, RecordStore, RecordValidator, Registrar, StreamHandle, StreamHandler,
    StreamLimits, TimeSource,
};

// Network and query
pub use network::{NetworkTransport, QueryEvent, QueryStream};
pub use query::{QueryManager, QueryOptions};

// Services
pub use reachability::{ReachabilityEvent, ReachabilityVerifier, RoundOutcome, VerifierComponents};
pub use service::{KadRoutingTable, PeerRoutingService, RoutingRpcHandler};

// Adapters
pub use adapters::{
    ConfigError, ConnectionLivenessChecker, DefaultRecordValidator, MemoryPeerStore,
    MemoryRecordStore, PublicAddressClassifier, RoutingTableWalk, StaticAddressManager,
    StaticConfigProvider, SystemTimeSource, TomlConfigProvider,
};
