//! Routing Table Implementation
//!
//! Kademlia k-buckets with least-recently-seen eviction guarded by a
//! liveness challenge.

mod bucket;
mod table;

pub use bucket::{KBucket, PendingEviction, RoutingTableEntry};
pub use table::{
    InsertOutcome, RoutingTable, RoutingTableStats, EVICTION_CHALLENGE_TIMEOUT_SECS, NUM_BUCKETS,
};

#[cfg(test)]
mod tests;
