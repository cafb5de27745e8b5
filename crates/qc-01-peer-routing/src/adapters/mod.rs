//! # Adapters
//!
//! Production implementations of the outbound ports that need no network
//! stack of their own.
//!
//! - `SystemTimeSource` - Time source using the system clock
//! - `StaticConfigProvider` / `TomlConfigProvider` - Configuration loading
//! - `MemoryPeerStore` / `MemoryRecordStore` / `StaticAddressManager` - In-memory books
//! - `RoutingTableWalk` - Random walk over routing table peers
//! - `PublicAddressClassifier` / `DefaultRecordValidator` - Address and record checks
//! - `ConnectionLivenessChecker` - Eviction liveness probe

/// Configuration providers
pub mod config;
/// Liveness probing
pub mod liveness;
/// In-memory stores and random walk
pub mod memory;
/// Address and record validation
pub mod security;
/// Time source adapters
pub mod time;

pub use config::{validate, ConfigError, StaticConfigProvider, TomlConfigProvider};
pub use liveness::ConnectionLivenessChecker;
pub use memory::{MemoryPeerStore, MemoryRecordStore, RoutingTableWalk, StaticAddressManager};
pub use security::{DefaultRecordValidator, PublicAddressClassifier};
pub use time::SystemTimeSource;

#[cfg(test)]
mod tests;
