//! # Node Container
//!
//! Configuration and the wired overlay services of one node.

pub mod config;
pub mod overlay;

pub use config::{NodeConfig, NodeConfigError, DEFAULT_LISTEN_ADDR};
pub use overlay::OverlayNode;
