//! # Driving Ports (Inbound API)
//!
//! These are the public APIs this subsystem exposes to the application node.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::domain::{PeerId, PeerInfo, Record, ValidationError};
use crate::network::QueryStream;
use crate::reachability::{ReachabilityEvent, RoundOutcome};

/// Controls where `find_peer` looks.
#[derive(Debug, Clone)]
pub struct FindPeerOptions {
    /// Try the routing table and peer store first
    pub use_cache: bool,
    /// Run a network traversal if the cache missed
    pub use_network: bool,
    /// Aborts the lookup and every in-flight request
    pub cancel: CancellationToken,
}

impl Default for FindPeerOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            use_network: true,
            cancel: CancellationToken::new(),
        }
    }
}

/// Peer and value lookup API.
///
/// Every network operation returns a finite [`QueryStream`] of progress
/// events. Dropping the stream cancels the operation.
///
/// # Example
///
/// ```rust,ignore
/// use futures::StreamExt;
/// use qc_01_peer_routing::{FindPeerOptions, PeerRoutingApi, QueryEvent};
///
/// let mut events = routing.find_peer(target, FindPeerOptions::default());
/// while let Some(event) = events.next().await {
///     if let QueryEvent::FinalPeer { peer, .. } = event {
///         println!("found {} at {:?}", peer.id, peer.addrs);
///     }
/// }
/// ```
pub trait PeerRoutingApi: Send + Sync {
    /// Routing table then peer store. Never touches the network.
    fn find_peer_local(&self, peer: &PeerId) -> Option<PeerInfo>;

    /// Locate a peer's addresses, yielding `FinalPeer` or a single `NotFound`.
    fn find_peer(&self, peer: PeerId, options: FindPeerOptions) -> QueryStream;

    /// Yield the k closest peers to `key` as `FinalPeer` events, nearest first.
    fn get_closest_peers(&self, key: Vec<u8>, cancel: CancellationToken) -> QueryStream;

    /// Single GET_VALUE against `peer`. Invalid records become error events.
    fn get_value_or_peers(&self, peer: PeerId, key: Vec<u8>, cancel: CancellationToken) -> QueryStream;

    /// Fetch and check the public key a peer publishes under `/pk/<id>`.
    fn get_public_key_from_node(&self, peer: PeerId, cancel: CancellationToken) -> QueryStream;

    /// Nearest known peers to `key` with cached addresses, minus `excluding`.
    fn get_closer_peers_offline(&self, key: &[u8], excluding: &PeerId) -> Vec<PeerInfo>;

    fn verify_record(&self, record: &Record) -> Result<(), ValidationError>;
}

/// Address reachability API.
#[async_trait::async_trait]
pub trait ReachabilityApi: Send + Sync {
    /// Run one outbound verification round now.
    async fn verify_external_addresses(&self) -> RoundOutcome;

    /// Ask the scheduler to start a round without waiting for the interval.
    fn trigger_verification(&self);

    /// Confirmed and rejected address notifications.
    fn subscribe(&self) -> broadcast::Receiver<ReachabilityEvent>;
}
