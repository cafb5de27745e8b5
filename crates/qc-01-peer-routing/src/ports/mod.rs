//! # Ports Layer - Hexagonal Architecture Boundaries
//!
//! - **Driving Ports (Inbound):** APIs this subsystem exposes to consumers
//! - **Driven Ports (Outbound):** SPIs this subsystem requires from adapters

pub mod inbound;
pub mod outbound;

pub use inbound::{FindPeerOptions, PeerRoutingApi, ReachabilityApi};
pub use outbound::{
    AddressClassifier, AddressManager, ConfigProvider, Connection, ConnectionManager, DialTarget,
    LivenessChecker, PeerStore, ProtocolStream, RandomWalk, RecordStore, RecordValidator,
    Registrar, StreamHandle, StreamHandler, StreamLimits, TimeSource,
};
