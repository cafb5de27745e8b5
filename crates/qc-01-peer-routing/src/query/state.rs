//! Per-traversal bookkeeping.

use std::collections::HashSet;

use crate::domain::{KadId, PeerDistanceList, PeerId, PeerInfo};

/// Where a traversal stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// The query function produced a definitive answer
    Resolved,
    /// A full round brought no closer peer
    Converged,
    /// Every frontier peer was queried
    Exhausted,
    /// Caller cancelled or dropped the stream
    Cancelled,
    /// The overall query deadline passed
    TimedOut,
}

/// Frontier and visited set of one traversal. Owned by the traversal task.
///
/// The frontier holds only peers not yet queried. A peer leaves it when it is
/// dispatched, so queried peers never crowd out further candidates.
#[derive(Debug)]
pub struct QueryState {
    local_peer: PeerId,
    frontier: PeerDistanceList,
    queried: HashSet<PeerId>,
}

impl QueryState {
    pub fn new(local_peer: PeerId, origin: KadId, capacity: usize) -> Self {
        Self {
            local_peer,
            frontier: PeerDistanceList::new(origin, capacity),
            queried: HashSet::new(),
        }
    }

    /// Add a candidate. Returns `true` if the frontier kept it.
    ///
    /// The local peer and already-queried peers are never re-admitted.
    pub fn offer(&mut self, peer: PeerInfo) -> bool {
        if peer.id == self.local_peer || self.queried.contains(&peer.id) {
            return false;
        }
        self.frontier.add(peer)
    }

    /// Up to `alpha` of the nearest frontier peers, moved to the queried set.
    pub fn next_batch(&mut self, alpha: usize) -> Vec<PeerInfo> {
        let batch = self.frontier.take_nearest(alpha);
        self.queried.extend(batch.iter().map(|p| p.id));
        batch
    }

    pub fn queried(&self) -> usize {
        self.queried.len()
    }

    pub fn was_queried(&self, peer: &PeerId) -> bool {
        self.queried.contains(peer)
    }

    pub fn frontier(&self) -> &PeerDistanceList {
        &self.frontier
    }
}
