//! # Wire Protocol
//!
//! Message schemas for the routing and reachability protocols and the
//! length-prefixed codec that frames them on a protocol stream.

pub mod codec;
pub mod guard;
pub mod messages;

pub use codec::{decode_message, encode_message, framed, FramedStream, MessageCodec};
pub use guard::AbortOnDrop;
pub use messages::{
    decode_peers, encode_peers, DialResponse, DialResponseStatus, MessageType,
    ReachabilityMessage, RoutingMessage, WirePeer,
};
