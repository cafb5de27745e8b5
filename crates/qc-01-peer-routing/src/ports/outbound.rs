//! # Driven Ports (Outbound SPI)
//!
//! These are the interfaces this subsystem **requires** the host application
//! to implement: connection management, stream registration, the peer and
//! address books, and record validation.
//!
//! # Thread Safety
//!
//! Every port is `Send + Sync`. Implementations are shared behind `Arc`
//! across the transport, traversal and verifier tasks.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::domain::{
    NetworkAddress, NetworkError, OverlayConfig, PeerId, PeerInfo, Record, Timestamp,
    ValidationError,
};

/// A negotiated, bidirectional protocol stream.
///
/// A plain drop is a graceful close. Exchanges that must reset the remote
/// end call [`abort`](ProtocolStream::abort).
pub trait ProtocolStream: AsyncRead + AsyncWrite + Unpin + Send {
    /// Protocol id negotiated for this stream.
    fn protocol(&self) -> &str;

    /// Reset the stream. Pending reads and writes on both ends fail.
    fn abort(&mut self, reason: &str);
}

/// Owned protocol stream handed across the port boundary.
pub type StreamHandle = Box<dyn ProtocolStream>;

/// An established connection to a remote peer.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Authenticated identity of the remote end.
    fn remote_peer(&self) -> PeerId;

    /// Address the connection is actually established on.
    fn remote_addr(&self) -> NetworkAddress;

    /// Open a new stream negotiated for `protocol`.
    async fn new_stream(&self, protocol: &str) -> Result<StreamHandle, NetworkError>;

    async fn close(&self);
}

/// What to dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    /// Any known address of the peer, or an existing connection
    Peer(PeerId),
    /// Exactly this address
    Address(NetworkAddress),
}

/// Opens (or reuses) connections.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    async fn open_connection(&self, target: DialTarget) -> Result<Arc<dyn Connection>, NetworkError>;

    /// True if a local transport can dial this address.
    fn can_dial(&self, addr: &NetworkAddress) -> bool;
}

/// Caps on simultaneous streams for one protocol. Enforced by the registrar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    pub max_inbound_streams: usize,
    pub max_outbound_streams: usize,
}

/// Serves inbound streams for one protocol.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle_stream(&self, stream: StreamHandle, connection: Arc<dyn Connection>);
}

/// Protocol handler registry.
pub trait Registrar: Send + Sync {
    fn handle(
        &self,
        protocol: &str,
        handler: Arc<dyn StreamHandler>,
        limits: StreamLimits,
    ) -> Result<(), NetworkError>;

    fn unhandle(&self, protocol: &str);
}

/// Local address book of known peers.
pub trait PeerStore: Send + Sync {
    fn get(&self, peer: &PeerId) -> Option<PeerInfo>;

    /// Add addresses to a peer's entry, creating it if absent.
    fn merge(&self, peer: &PeerInfo);
}

/// The node's own addresses.
pub trait AddressManager: Send + Sync {
    /// Addresses we listen on or announce.
    fn addresses(&self) -> Vec<NetworkAddress>;

    /// Addresses other peers have reported seeing us on, not yet confirmed.
    fn observed_addresses(&self) -> Vec<NetworkAddress>;

    fn confirm_observed(&self, addr: &NetworkAddress);

    fn remove_observed(&self, addr: &NetworkAddress);
}

/// Decides whether an address is publicly routable.
pub trait AddressClassifier: Send + Sync {
    fn is_public(&self, addr: &NetworkAddress) -> bool;
}

/// Endless supply of random peers from the network.
pub trait RandomWalk: Send + Sync {
    fn walk(&self) -> BoxStream<'static, PeerInfo>;
}

/// Format and signature checks for DHT records.
pub trait RecordValidator: Send + Sync {
    fn validate(&self, key: &[u8], record: &Record) -> Result<(), ValidationError>;
}

/// Local record storage served to other peers.
pub trait RecordStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Record>;

    fn put(&self, record: Record);
}

/// Checks whether a peer still answers. Used before evicting it.
#[async_trait]
pub trait LivenessChecker: Send + Sync {
    async fn is_alive(&self, peer: &PeerId) -> bool;
}

/// Abstract interface for time-related operations.
///
/// Production implementations use system time; tests use fixed timestamps.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Abstract interface for configuration loading.
pub trait ConfigProvider: Send + Sync {
    /// Well-known peers used to seed the routing table.
    fn get_bootstrap_nodes(&self) -> Vec<NetworkAddress>;

    fn get_overlay_config(&self) -> OverlayConfig;
}
