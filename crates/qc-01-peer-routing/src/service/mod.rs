//! # Peer Routing Service
//!
//! The shared routing table, the lookup API built on the traversal engine,
//! and the server side of the routing protocol.

mod peer_routing;
mod routing;
mod rpc_handler;

pub use peer_routing::PeerRoutingService;
pub use routing::KadRoutingTable;
pub use rpc_handler::RoutingRpcHandler;
