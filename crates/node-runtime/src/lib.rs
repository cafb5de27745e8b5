//! # Quantum-Chain Node Runtime
//!
//! Runs the peer routing and reachability services of `qc-01-peer-routing`
//! over TCP.
//!
//! ## Modular Structure
//!
//! - `container/` - Node configuration and service wiring
//! - `tcp/` - Connection manager, stream registrar and listener over TCP
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (environment, then the overlay TOML file)
//! 2. Bind the listener and start the overlay services
//! 3. Bootstrap the routing table from the configured seeds
//! 4. Run until Ctrl+C, then shut down gracefully

pub mod container;
pub mod tcp;
