//! # TCP Transport Adapter
//!
//! Implements the connection-level ports of `qc-01-peer-routing` over plain
//! TCP. Every logical stream is its own TCP connection, opened with a
//! handshake naming the protocol and the dialer's identity:
//!
//! ```text
//! dialer                                       listener
//!   │── Hello { protocol, peer, listen_port } ──→│
//!   │←──── Ack { peer, observed, status } ───────│
//!   │═════════════ protocol bytes ═══════════════│
//! ```
//!
//! A connection is the identity learned from an identify handshake plus the
//! address it was reached on. Streams are dialed on demand.

mod connection;
mod handshake;
mod listener;
mod stream;

use std::sync::Arc;

use qc_01_peer_routing::PeerId;

pub use connection::{TcpConnection, TcpConnectionManager};
pub use handshake::IDENTIFY_PROTOCOL;
pub use listener::{spawn_listener, TcpRegistrar};
pub use stream::TcpStreamHandle;

/// Local identity and protocol table, shared by the dialing and the
/// listening side.
#[derive(Clone)]
pub struct Endpoint {
    pub peer: PeerId,
    /// Port announced to the peers we dial
    pub listen_port: u16,
    pub registrar: Arc<TcpRegistrar>,
}
