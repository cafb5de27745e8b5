//! Capacity-bounded accumulator of peers ordered by distance to a key.

use crate::domain::{xor_distance, Distance, KadId, PeerId, PeerInfo};

/// Peers sorted by XOR distance to an origin key, nearest first.
///
/// Holds at most `capacity` peers. Duplicate identities are rejected and
/// peers pushed past the capacity boundary are dropped. Owned by a single
/// query, so no synchronisation.
#[derive(Debug, Clone)]
pub struct PeerDistanceList {
    origin: KadId,
    capacity: usize,
    peers: Vec<(Distance, PeerInfo)>,
}

impl PeerDistanceList {
    pub fn new(origin: KadId, capacity: usize) -> Self {
        Self {
            origin,
            capacity,
            peers: Vec::with_capacity(capacity),
        }
    }

    pub fn origin(&self) -> &KadId {
        &self.origin
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.capacity
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.iter().any(|(_, p)| &p.id == peer)
    }

    /// Insert keeping sorted order. Returns `true` if the peer was retained.
    ///
    /// Once full, only a peer strictly closer than the current furthest
    /// member is retained, and that member is dropped.
    pub fn add(&mut self, peer: PeerInfo) -> bool {
        if self.capacity == 0 || self.contains(&peer.id) {
            return false;
        }

        let distance = xor_distance(&peer.id.kad_id(), &self.origin);
        if self.is_full() && self.furthest().is_some_and(|worst| distance >= worst) {
            return false;
        }

        let pos = self.peers.partition_point(|(d, _)| *d < distance);
        self.peers.insert(pos, (distance, peer));
        self.peers.truncate(self.capacity);
        true
    }

    /// Distance of the furthest retained peer.
    pub fn furthest(&self) -> Option<Distance> {
        self.peers.last().map(|(d, _)| *d)
    }

    /// Current peers, nearest first.
    pub fn peers(&self) -> impl Iterator<Item = &PeerInfo> {
        self.peers.iter().map(|(_, p)| p)
    }

    /// Remove and return up to `n` of the nearest peers.
    pub fn take_nearest(&mut self, n: usize) -> Vec<PeerInfo> {
        let n = n.min(self.peers.len());
        self.peers.drain(..n).map(|(_, p)| p).collect()
    }

    pub fn into_peers(self) -> Vec<PeerInfo> {
        self.peers.into_iter().map(|(_, p)| p).collect()
    }
}
