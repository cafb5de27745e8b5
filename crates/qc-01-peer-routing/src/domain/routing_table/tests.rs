//! Tests for Routing Table Implementation

use std::collections::HashSet;

use proptest::prelude::*;

use super::*;
use crate::domain::{bucket_index, xor_distance, KademliaConfig, PeerId, RoutingTableError, Timestamp};

fn make_peer_id(seed: u32) -> PeerId {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&seed.to_be_bytes());
    bytes[31] = 0xaa;
    PeerId::new(bytes)
}

/// First `count` generated peers that land in `bucket` relative to `local`.
fn peers_in_bucket(local: &PeerId, bucket: usize, count: usize) -> Vec<PeerId> {
    (1..u32::MAX)
        .map(make_peer_id)
        .filter(|p| bucket_index(&local.kad_id(), &p.kad_id()) == Some(bucket))
        .take(count)
        .collect()
}

fn local() -> PeerId {
    make_peer_id(0)
}

// =============================================================================
// Test Group 1: Insertion
// =============================================================================

#[test]
fn test_insert_places_peer_and_find_returns_it() {
    let mut table = RoutingTable::new(local(), &KademliaConfig::for_testing());
    let peer = make_peer_id(42);

    assert_eq!(table.insert(peer, Timestamp::new(1)), Ok(InsertOutcome::Inserted));
    assert_eq!(table.find(&peer), Some(peer));
    assert_eq!(table.len(), 1);
}

#[test]
fn test_insert_rejects_local_peer() {
    let mut table = RoutingTable::new(local(), &KademliaConfig::for_testing());
    assert_eq!(
        table.insert(local(), Timestamp::new(1)),
        Err(RoutingTableError::SelfInsertion)
    );
    assert!(table.is_empty());
}

#[test]
fn test_reinsert_moves_peer_to_most_recent() {
    let mut table = RoutingTable::new(local(), &KademliaConfig::for_testing());
    let peers = peers_in_bucket(&local(), 255, 2);

    table.insert(peers[0], Timestamp::new(1)).unwrap();
    table.insert(peers[1], Timestamp::new(2)).unwrap();
    assert_eq!(table.insert(peers[0], Timestamp::new(3)), Ok(InsertOutcome::Updated));

    let bucket = table.bucket(255).unwrap();
    assert_eq!(bucket.oldest().map(|e| e.peer), Some(peers[1]));
    assert_eq!(bucket.len(), 2);
}

// =============================================================================
// Test Group 2: K-Bucket Eviction
// =============================================================================

#[test]
fn test_full_bucket_challenges_oldest_peer() {
    let config = KademliaConfig::for_testing();
    let mut table = RoutingTable::new(local(), &config);
    let peers = peers_in_bucket(&local(), 255, config.k + 1);

    for (i, peer) in peers.iter().take(config.k).enumerate() {
        assert_eq!(
            table.insert(*peer, Timestamp::new(i as u64)),
            Ok(InsertOutcome::Inserted)
        );
    }

    let outcome = table.insert(peers[config.k], Timestamp::new(100)).unwrap();
    assert_eq!(outcome, InsertOutcome::PendingEviction { challenged: peers[0] });
    assert_eq!(table.bucket(255).unwrap().len(), config.k);
}

#[test]
fn test_live_oldest_peer_keeps_its_slot() {
    let config = KademliaConfig::for_testing();
    let mut table = RoutingTable::new(local(), &config);
    let peers = peers_in_bucket(&local(), 255, config.k + 1);
    for peer in peers.iter().take(config.k) {
        table.insert(*peer, Timestamp::new(1)).unwrap();
    }
    let candidate = peers[config.k];
    table.insert(candidate, Timestamp::new(2)).unwrap();

    let outcome = table.resolve_eviction(&peers[0], true, Timestamp::new(3)).unwrap();

    assert_eq!(outcome, InsertOutcome::Refused);
    assert_eq!(table.find(&candidate), None);
    assert_eq!(table.find(&peers[0]), Some(peers[0]));
    // Challenged peer is now most recently seen
    assert_eq!(table.bucket(255).unwrap().oldest().map(|e| e.peer), Some(peers[1]));
}

#[test]
fn test_dead_oldest_peer_is_replaced() {
    let config = KademliaConfig::for_testing();
    let mut table = RoutingTable::new(local(), &config);
    let peers = peers_in_bucket(&local(), 255, config.k + 1);
    for peer in peers.iter().take(config.k) {
        table.insert(*peer, Timestamp::new(1)).unwrap();
    }
    let candidate = peers[config.k];
    table.insert(candidate, Timestamp::new(2)).unwrap();

    let outcome = table.resolve_eviction(&peers[0], false, Timestamp::new(3)).unwrap();

    assert_eq!(outcome, InsertOutcome::Inserted);
    assert_eq!(table.find(&peers[0]), None);
    assert_eq!(table.find(&candidate), Some(candidate));
    assert_eq!(table.bucket(255).unwrap().len(), config.k);
}

#[test]
fn test_second_candidate_refused_while_challenge_in_flight() {
    let config = KademliaConfig::for_testing();
    let mut table = RoutingTable::new(local(), &config);
    let peers = peers_in_bucket(&local(), 255, config.k + 2);
    for peer in peers.iter().take(config.k) {
        table.insert(*peer, Timestamp::new(1)).unwrap();
    }

    table.insert(peers[config.k], Timestamp::new(2)).unwrap();
    assert_eq!(
        table.insert(peers[config.k + 1], Timestamp::new(2)),
        Ok(InsertOutcome::Refused)
    );
}

#[test]
fn test_stale_challenge_is_replaced() {
    let config = KademliaConfig::for_testing();
    let mut table = RoutingTable::new(local(), &config);
    let peers = peers_in_bucket(&local(), 255, config.k + 2);
    for peer in peers.iter().take(config.k) {
        table.insert(*peer, Timestamp::new(1)).unwrap();
    }
    table.insert(peers[config.k], Timestamp::new(10)).unwrap();

    let later = Timestamp::new(10 + EVICTION_CHALLENGE_TIMEOUT_SECS);
    assert_eq!(
        table.insert(peers[config.k + 1], later),
        Ok(InsertOutcome::PendingEviction { challenged: peers[0] })
    );
    // The new challenge owns the bucket; the dead one evicts for the latest candidate
    assert_eq!(
        table.resolve_eviction(&peers[0], false, later),
        Ok(InsertOutcome::Inserted)
    );
    assert_eq!(table.find(&peers[config.k + 1]), Some(peers[config.k + 1]));
    assert_eq!(table.find(&peers[config.k]), None);
}

#[test]
fn test_cancelled_challenge_frees_bucket() {
    let config = KademliaConfig::for_testing();
    let mut table = RoutingTable::new(local(), &config);
    let peers = peers_in_bucket(&local(), 255, config.k + 2);
    for peer in peers.iter().take(config.k) {
        table.insert(*peer, Timestamp::new(1)).unwrap();
    }
    table.insert(peers[config.k], Timestamp::new(2)).unwrap();

    assert!(!table.cancel_eviction(&peers[1]));
    assert!(table.cancel_eviction(&peers[0]));
    assert_eq!(table.stats(Timestamp::new(2)).pending_evictions, 0);
    assert_eq!(table.find(&peers[0]), Some(peers[0]));
    assert_eq!(
        table.insert(peers[config.k + 1], Timestamp::new(3)),
        Ok(InsertOutcome::PendingEviction { challenged: peers[0] })
    );
}

#[test]
fn test_resolve_without_pending_challenge_fails() {
    let mut table = RoutingTable::new(local(), &KademliaConfig::for_testing());
    let peer = make_peer_id(5);
    table.insert(peer, Timestamp::new(1)).unwrap();

    assert!(matches!(
        table.resolve_eviction(&peer, false, Timestamp::new(2)),
        Err(RoutingTableError::NoPendingEviction(_))
    ));
}

// =============================================================================
// Test Group 3: Closest Peers
// =============================================================================

#[test]
fn test_closest_peers_sorted_and_bounded() {
    let mut table = RoutingTable::new(local(), &KademliaConfig::default());
    table.insert(make_peer_id(77), Timestamp::new(1)).unwrap();
    for seed in 1..200 {
        let _ = table.insert(make_peer_id(seed), Timestamp::new(1));
    }
    let target = make_peer_id(77).kad_id();

    let closest = table.closest_peers(&target, 20);

    assert_eq!(closest.len(), 20);
    assert_eq!(closest[0], make_peer_id(77));
    let distances: Vec<_> = closest.iter().map(|p| xor_distance(&p.kad_id(), &target)).collect();
    assert!(distances.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_remove_peer() {
    let mut table = RoutingTable::new(local(), &KademliaConfig::for_testing());
    let peer = make_peer_id(9);
    table.insert(peer, Timestamp::new(1)).unwrap();

    assert!(table.remove(&peer));
    assert!(!table.remove(&peer));
    assert_eq!(table.find(&peer), None);
}

#[test]
fn test_stats_reports_age_and_pending() {
    let config = KademliaConfig::for_testing();
    let mut table = RoutingTable::new(local(), &config);
    let peers = peers_in_bucket(&local(), 255, config.k + 1);
    for peer in &peers {
        table.insert(*peer, Timestamp::new(10)).unwrap();
    }

    let stats = table.stats(Timestamp::new(25));
    assert_eq!(stats.total_peers, config.k);
    assert_eq!(stats.buckets_used, 1);
    assert_eq!(stats.pending_evictions, 1);
    assert_eq!(stats.oldest_peer_age_seconds, 15);
}

// =============================================================================
// Test Group 4: Invariants under arbitrary insert sequences
// =============================================================================

proptest! {
    #[test]
    fn prop_buckets_bounded_and_unique(
        ops in proptest::collection::vec((0u32..64, any::<bool>()), 1..300)
    ) {
        let config = KademliaConfig::for_testing();
        let mut table = RoutingTable::new(local(), &config);

        for (i, (seed, alive)) in ops.into_iter().enumerate() {
            let now = Timestamp::new(i as u64);
            if let Ok(InsertOutcome::PendingEviction { challenged }) =
                table.insert(make_peer_id(seed + 1), now)
            {
                table.resolve_eviction(&challenged, alive, now).unwrap();
            }
        }

        let mut seen = HashSet::new();
        for idx in 0..NUM_BUCKETS {
            let bucket = table.bucket(idx).unwrap();
            prop_assert!(bucket.len() <= config.k);
            for entry in bucket.entries() {
                prop_assert!(seen.insert(entry.peer), "duplicate {:?}", entry.peer);
                prop_assert_eq!(bucket_index(&local().kad_id(), &entry.kad_id), Some(idx));
            }
        }
    }
}
