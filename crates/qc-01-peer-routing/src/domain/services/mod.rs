//! Domain Services - Pure functions for Kademlia and address checks
//!
//! All functions in this module are pure (no I/O, no state mutation)
//! and deterministic (same inputs → same outputs).

mod distance;
mod security;

pub use distance::{bucket_index, xor_distance};
pub use security::{is_public_address, is_public_ip, network_segment, NetworkSegment};

#[cfg(test)]
mod tests;
