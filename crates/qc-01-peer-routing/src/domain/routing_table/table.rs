//! Main RoutingTable implementation.

use crate::domain::{
    bucket_index, xor_distance, KadId, KademliaConfig, PeerId, RoutingTableError, Timestamp,
};

use super::bucket::{KBucket, PendingEviction};

/// Number of buckets: one per bit of the 256-bit distance.
pub const NUM_BUCKETS: usize = 256;

/// A challenge left unresolved this long no longer blocks its bucket.
pub const EVICTION_CHALLENGE_TIMEOUT_SECS: u64 = 30;

/// Result of offering a peer to the routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Peer took a free slot
    Inserted,
    /// Peer was already present and is now most recently seen
    Updated,
    /// Bucket is full. `challenged` must be liveness-checked and the result
    /// reported through [`RoutingTable::resolve_eviction`].
    PendingEviction { challenged: PeerId },
    /// Bucket is full and already has a challenge in flight, or the
    /// challenged peer answered and kept its slot
    Refused,
}

/// Statistics about the routing table state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTableStats {
    pub total_peers: usize,
    pub buckets_used: usize,
    pub pending_evictions: usize,
    pub oldest_peer_age_seconds: u64,
}

/// Kademlia routing table: 256 k-buckets keyed by XOR distance to the local
/// identity.
///
/// # Invariants
/// - A bucket never holds more than `k` entries
/// - A peer id appears at most once across all buckets
/// - The local identity is never stored
#[derive(Debug)]
pub struct RoutingTable {
    local_peer: PeerId,
    local_kad: KadId,
    buckets: Vec<KBucket>,
    k: usize,
}

impl RoutingTable {
    pub fn new(local_peer: PeerId, config: &KademliaConfig) -> Self {
        Self {
            local_peer,
            local_kad: local_peer.kad_id(),
            buckets: (0..NUM_BUCKETS).map(|_| KBucket::new()).collect(),
            k: config.k.max(1),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(KBucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(KBucket::is_empty)
    }

    fn bucket_for(&self, peer: &PeerId) -> Option<usize> {
        bucket_index(&self.local_kad, &peer.kad_id())
    }

    pub fn find(&self, peer: &PeerId) -> Option<PeerId> {
        let idx = self.bucket_for(peer)?;
        self.buckets[idx].contains(peer).then_some(*peer)
    }

    /// Offer a peer to its bucket.
    pub fn insert(&mut self, peer: PeerId, now: Timestamp) -> Result<InsertOutcome, RoutingTableError> {
        let idx = self
            .bucket_for(&peer)
            .ok_or(RoutingTableError::SelfInsertion)?;
        if peer == self.local_peer {
            return Err(RoutingTableError::SelfInsertion);
        }

        let k = self.k;
        let bucket = &mut self.buckets[idx];

        if bucket.refresh(&peer, now) {
            return Ok(InsertOutcome::Updated);
        }

        if !bucket.is_full(k) {
            bucket.push(peer, now);
            return Ok(InsertOutcome::Inserted);
        }

        if let Some(pending) = &bucket.pending {
            let age = now.as_secs().saturating_sub(pending.challenged_at.as_secs());
            if age < EVICTION_CHALLENGE_TIMEOUT_SECS {
                return Ok(InsertOutcome::Refused);
            }
            // Stale: the checker never reported back
            bucket.pending = None;
        }

        let Some(oldest) = bucket.oldest().map(|e| e.peer) else {
            return Ok(InsertOutcome::Refused);
        };

        bucket.pending = Some(PendingEviction {
            candidate: peer,
            challenged: oldest,
            challenged_at: now,
        });

        Ok(InsertOutcome::PendingEviction { challenged: oldest })
    }

    /// Apply the liveness check result for a challenged peer.
    ///
    /// A live peer is refreshed and the candidate refused. A dead peer is
    /// evicted and the candidate takes its slot.
    pub fn resolve_eviction(
        &mut self,
        challenged: &PeerId,
        is_alive: bool,
        now: Timestamp,
    ) -> Result<InsertOutcome, RoutingTableError> {
        let no_pending = || RoutingTableError::NoPendingEviction(challenged.to_string());
        let idx = self.bucket_for(challenged).ok_or_else(no_pending)?;
        let k = self.k;
        let bucket = &mut self.buckets[idx];

        let pending = match bucket.pending.take() {
            Some(p) if &p.challenged == challenged => p,
            other => {
                bucket.pending = other;
                return Err(no_pending());
            }
        };

        if is_alive {
            bucket.refresh(challenged, now);
            return Ok(InsertOutcome::Refused);
        }

        bucket.remove(challenged);
        if bucket.contains(&pending.candidate) {
            return Ok(InsertOutcome::Updated);
        }
        if bucket.is_full(k) {
            return Ok(InsertOutcome::Refused);
        }
        bucket.push(pending.candidate, now);
        Ok(InsertOutcome::Inserted)
    }

    /// Drop the challenge for `challenged` without a verdict. The candidate
    /// is discarded and the challenged entry keeps its slot.
    pub fn cancel_eviction(&mut self, challenged: &PeerId) -> bool {
        let Some(idx) = self.bucket_for(challenged) else {
            return false;
        };
        let bucket = &mut self.buckets[idx];
        match &bucket.pending {
            Some(p) if &p.challenged == challenged => {
                bucket.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, peer: &PeerId) -> bool {
        match self.bucket_for(peer) {
            Some(idx) => self.buckets[idx].remove(peer).is_some(),
            None => false,
        }
    }

    /// Up to `count` peers nearest to `target`, nearest first.
    pub fn closest_peers(&self, target: &KadId, count: usize) -> Vec<PeerId> {
        let mut all: Vec<_> = self
            .buckets
            .iter()
            .flat_map(|b| b.entries().iter())
            .map(|e| (xor_distance(&e.kad_id, target), e.peer))
            .collect();

        all.sort_by(|a, b| a.0.cmp(&b.0));
        all.into_iter().take(count).map(|(_, p)| p).collect()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.buckets
            .iter()
            .flat_map(|b| b.entries().iter().map(|e| e.peer))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn bucket(&self, index: usize) -> Option<&KBucket> {
        self.buckets.get(index)
    }

    pub fn stats(&self, now: Timestamp) -> RoutingTableStats {
        let oldest_peer_age_seconds = self
            .buckets
            .iter()
            .flat_map(|b| b.entries().iter())
            .map(|e| now.as_secs().saturating_sub(e.last_seen.as_secs()))
            .max()
            .unwrap_or(0);

        RoutingTableStats {
            total_peers: self.len(),
            buckets_used: self.buckets.iter().filter(|b| !b.is_empty()).count(),
            pending_evictions: self.buckets.iter().filter(|b| b.has_pending_eviction()).count(),
            oldest_peer_age_seconds,
        }
    }
}
