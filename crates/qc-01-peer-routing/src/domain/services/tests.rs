//! Tests for Domain Services

use super::*;
use crate::domain::{Distance, KadId, NetworkAddress};

fn make_kad_id(first_byte: u8, last_byte: u8) -> KadId {
    let mut bytes = [0u8; 32];
    bytes[0] = first_byte;
    bytes[31] = last_byte;
    KadId::from(bytes)
}

fn addr(text: &str) -> NetworkAddress {
    text.parse().unwrap()
}

// =============================================================================
// Test Group 1: XOR Distance Calculation
// =============================================================================

#[test]
fn test_xor_distance_is_symmetric() {
    let a = make_kad_id(0b1010_0000, 3);
    let b = make_kad_id(0b0101_0000, 9);

    assert_eq!(xor_distance(&a, &b), xor_distance(&b, &a));
}

#[test]
fn test_xor_distance_to_self_is_zero() {
    let a = make_kad_id(0b1010_1010, 1);
    assert_eq!(xor_distance(&a, &a), Distance::ZERO);
    assert_eq!(bucket_index(&a, &a), None);
}

#[test]
fn test_bucket_index_uses_highest_differing_bit() {
    let local = make_kad_id(0, 0);

    assert_eq!(bucket_index(&local, &make_kad_id(0b1000_0000, 0)), Some(255));
    assert_eq!(bucket_index(&local, &make_kad_id(0b0000_0001, 0)), Some(248));
    assert_eq!(bucket_index(&local, &make_kad_id(0, 1)), Some(0));
}

// =============================================================================
// Test Group 2: Address Classification
// =============================================================================

#[test]
fn test_private_ranges_are_not_public() {
    for text in [
        "/ip4/10.1.2.3/tcp/1",
        "/ip4/172.16.0.1/tcp/1",
        "/ip4/192.168.1.1/tcp/1",
        "/ip4/127.0.0.1/tcp/1",
        "/ip4/169.254.0.1/tcp/1",
        "/ip4/100.64.0.1/tcp/1",
        "/ip4/0.0.0.0/tcp/1",
        "/ip6/::1/tcp/1",
        "/ip6/fd00::1/tcp/1",
        "/ip6/fe80::1/tcp/1",
        "/ip6/::ffff:192.168.0.1/tcp/1",
        "/dns/localhost/tcp/1",
    ] {
        assert!(!is_public_address(&addr(text)), "{text} treated as public");
    }
}

#[test]
fn test_routable_ranges_are_public() {
    for text in [
        "/ip4/8.8.8.8/tcp/1",
        "/ip4/1.1.1.1/udp/53",
        "/ip6/2606:4700::1111/tcp/1",
        "/dns/bootstrap.example.org/tcp/4001",
    ] {
        assert!(is_public_address(&addr(text)), "{text} treated as private");
    }
}

#[test]
fn test_network_segment_uses_leading_component() {
    assert_eq!(
        network_segment(&addr("/ip4/8.8.8.8/tcp/1")),
        network_segment(&addr("/ip4/8.1.2.3/tcp/2"))
    );
    assert_ne!(
        network_segment(&addr("/ip4/8.8.8.8/tcp/1")),
        network_segment(&addr("/ip4/9.8.8.8/tcp/1"))
    );
    assert_eq!(
        network_segment(&addr("/ip6/2606:4700::1/tcp/1")),
        NetworkSegment::V6(0x2606)
    );
}
