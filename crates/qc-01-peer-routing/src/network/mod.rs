//! # Network Layer
//!
//! Request/response exchanges with single peers, bounded by an adaptive
//! deadline, reported as a stream of [`QueryEvent`]s.

pub mod adaptive_timeout;
pub mod events;
pub mod transport;

pub use adaptive_timeout::{AdaptiveTimeout, TimeoutSignal};
pub use events::{empty_stream, event_channel, EventSender, QueryEvent, QueryStream};
pub use transport::NetworkTransport;

#[cfg(test)]
mod tests;
