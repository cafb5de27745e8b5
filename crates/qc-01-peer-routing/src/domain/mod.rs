//! Domain Layer - Pure logic with no I/O
//!
//! This module contains:
//! - Peer identities, distance keys and network addresses
//! - XOR distance and address classification
//! - Routing table with k-buckets and eviction challenges
//! - Distance-ordered peer accumulator used by traversals
//! - Reachability tally and network segment filter

pub mod entities;
pub mod errors;
pub mod peer_distance_list;
pub mod reachability;
pub mod routing_table;
pub mod services;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use peer_distance_list::PeerDistanceList;
pub use reachability::*;
pub use routing_table::*;
pub use services::*;
pub use value_objects::*;
