//! # Reachability Verification
//!
//! Inbound: dial a requesting peer back on the addresses it claims, and
//! report which one answered.
//!
//! Outbound: ask random peers to do the same for our observed addresses.
//! An address is confirmed once enough verifiers from distinct network
//! segments reach it, and rejected once as many fail to.

mod inbound;
mod outbound;
mod verifier;

pub use verifier::{ReachabilityVerifier, VerifierComponents};

use crate::domain::NetworkAddress;

/// Published when an outbound round settles an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReachabilityEvent {
    Confirmed(NetworkAddress),
    Rejected(NetworkAddress),
}

/// How an outbound verification round ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Address reached the success threshold and was confirmed
    Confirmed(NetworkAddress),
    /// Address reached the failure threshold and was dropped
    Rejected(NetworkAddress),
    /// Verifiers ran out or the round timed out first
    Inconclusive,
    /// No public observed address to verify
    NoCandidates,
    /// Verifier stopped, or another round was in progress
    Skipped,
}
