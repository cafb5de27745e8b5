//! K-Bucket implementation for Kademlia routing.

use crate::domain::{KadId, PeerId, Timestamp};

/// One routing table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTableEntry {
    pub peer: PeerId,
    pub kad_id: KadId,
    pub last_seen: Timestamp,
}

impl RoutingTableEntry {
    pub fn new(peer: PeerId, last_seen: Timestamp) -> Self {
        Self {
            peer,
            kad_id: peer.kad_id(),
            last_seen,
        }
    }
}

/// A peer waiting for a slot in a full bucket while the least-recently-seen
/// entry is checked for liveness.
#[derive(Debug, Clone)]
pub struct PendingEviction {
    pub candidate: PeerId,
    pub challenged: PeerId,
    pub challenged_at: Timestamp,
}

/// A k-bucket storing up to k peers sharing a distance prefix
///
/// Entries are ordered least-recently-seen first.
///
/// # Security (Eviction-on-Failure)
/// A full bucket never drops a live peer for a newcomer. The oldest entry is
/// challenged first and replaced only if it fails the liveness check, so a
/// flood of fresh identities cannot flush stable peers.
#[derive(Debug, Clone, Default)]
pub struct KBucket {
    pub(crate) entries: Vec<RoutingTableEntry>,
    pub(crate) pending: Option<PendingEviction>,
}

impl KBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self, k: usize) -> bool {
        self.entries.len() >= k
    }

    /// Least recently seen entry
    pub fn oldest(&self) -> Option<&RoutingTableEntry> {
        self.entries.first()
    }

    pub fn entries(&self) -> &[RoutingTableEntry] {
        &self.entries
    }

    pub fn has_pending_eviction(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn contains(&self, peer: &PeerId) -> bool {
        self.entries.iter().any(|e| &e.peer == peer)
    }

    /// Append as most recently seen (assumes not full).
    pub(crate) fn push(&mut self, peer: PeerId, now: Timestamp) {
        self.entries.push(RoutingTableEntry::new(peer, now));
    }

    pub(crate) fn remove(&mut self, peer: &PeerId) -> Option<RoutingTableEntry> {
        self.entries
            .iter()
            .position(|e| &e.peer == peer)
            .map(|pos| self.entries.remove(pos))
    }

    /// Move an entry to the most recently seen position.
    pub(crate) fn refresh(&mut self, peer: &PeerId, now: Timestamp) -> bool {
        match self.remove(peer) {
            Some(mut entry) => {
                entry.last_seen = now;
                self.entries.push(entry);
                true
            }
            None => false,
        }
    }
}
