//! Tests for adapters

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use super::*;
use crate::domain::{
    KademliaConfig, NetworkAddress, PeerId, PeerInfo, ReachabilityConfig, Record, ValidationError,
};
use crate::ports::{
    AddressClassifier, AddressManager, ConfigProvider, LivenessChecker, PeerStore, RandomWalk,
    RecordStore, RecordValidator, TimeSource,
};
use crate::service::KadRoutingTable;
use crate::test_utils::{test_addr, test_peer, FixedLiveness, FixedTimeSource, MemoryNetwork};

fn addr(text: &str) -> NetworkAddress {
    text.parse().unwrap()
}

#[test]
fn test_system_time_source_returns_recent_time() {
    let now = SystemTimeSource::new().now();
    assert!(now.as_secs() > 1_700_000_000);
}

#[test]
fn test_static_config_provider_defaults() {
    let provider = StaticConfigProvider::new();
    assert!(provider.get_bootstrap_nodes().is_empty());
    assert_eq!(provider.get_overlay_config().kademlia.k, 20);
    assert_eq!(provider.get_overlay_config().routing_protocol(), "/qc/kad/1.0.0");
}

#[test]
fn test_toml_config_overrides_and_defaults() {
    let provider = TomlConfigProvider::parse(
        r#"
        [bootstrap]
        nodes = ["/ip4/203.0.113.7/tcp/4001", "not-an-address"]

        [kademlia]
        k = 16
        max_inbound_streams = 8

        [reachability]
        refresh_interval_secs = 120

        [network]
        protocol_prefix = "testnet"
        "#,
    )
    .unwrap();

    let config = provider.get_overlay_config();
    assert_eq!(provider.get_bootstrap_nodes(), vec![addr("/ip4/203.0.113.7/tcp/4001")]);
    assert_eq!(config.kademlia.k, 16);
    assert_eq!(config.kademlia.alpha, 3);
    assert_eq!(config.kademlia.max_inbound_streams, 8);
    assert_eq!(config.kademlia.max_outbound_streams, 64);
    // Routing and reachability limits are independent
    assert_eq!(config.reachability.max_inbound_streams, ReachabilityConfig::default().max_inbound_streams);
    assert_eq!(config.reachability.refresh_interval_secs, 120);
    assert_eq!(config.reachability.required_successful_dials, 4);
    assert_eq!(config.reachability_protocol(), "/testnet/autonat/1.0.0");
}

#[test]
fn test_toml_empty_file_is_all_defaults() {
    let provider = TomlConfigProvider::parse("").unwrap();
    assert_eq!(provider.get_overlay_config(), crate::domain::OverlayConfig::default());
}

#[test]
fn test_toml_rejects_zero_k() {
    let err = TomlConfigProvider::parse("[kademlia]\nk = 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_toml_rejects_zero_stream_limit() {
    let err = TomlConfigProvider::parse("[kademlia]\nmax_outbound_streams = 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_toml_rejects_inverted_timeout_bounds() {
    let err = TomlConfigProvider::parse("[timeout]\nmin_timeout_ms = 500\nmax_timeout_ms = 100\n")
        .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_toml_syntax_error_is_parse_error() {
    let err = TomlConfigProvider::parse("[kademlia\nk = ").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_toml_missing_file_is_io_error() {
    let err = TomlConfigProvider::load("/nonexistent/overlay.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_peer_store_merge_deduplicates_addresses() {
    let store = MemoryPeerStore::new();
    let peer = test_peer(1);
    let a = test_addr(20, 4001);

    store.merge(&PeerInfo::new(peer, vec![a.clone()]));
    store.merge(&PeerInfo::new(peer, vec![a.clone().with_peer(peer), test_addr(30, 4001)]));

    let info = store.get(&peer).unwrap();
    assert_eq!(info.addrs, vec![a, test_addr(30, 4001)]);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_record_store_put_get() {
    let store = MemoryRecordStore::new();
    store.put(Record::new(b"k".to_vec(), b"v".to_vec()));
    assert_eq!(store.get(b"k").unwrap().value, b"v".to_vec());
    assert!(store.get(b"missing").is_none());
}

#[test]
fn test_address_manager_confirm_moves_address() {
    let manager = StaticAddressManager::new(vec![addr("/ip4/10.0.0.1/tcp/4001")]);
    let observed = addr("/ip4/203.0.113.7/tcp/4001");
    manager.add_observed(observed.clone());
    manager.add_observed(observed.clone());
    assert_eq!(manager.observed_addresses(), vec![observed.clone()]);

    manager.confirm_observed(&observed);

    assert!(manager.observed_addresses().is_empty());
    assert_eq!(manager.confirmed(), vec![observed.clone()]);
    assert!(manager.addresses().contains(&observed));
}

#[test]
fn test_address_manager_remove_observed() {
    let manager = StaticAddressManager::new(vec![]);
    let observed = addr("/ip4/203.0.113.7/tcp/4001");
    manager.add_observed(observed.clone());
    manager.remove_observed(&observed);
    assert!(manager.observed_addresses().is_empty());
    assert!(manager.confirmed().is_empty());
}

#[test]
fn test_classifier_uses_ip_ranges() {
    let classifier = PublicAddressClassifier;
    assert!(classifier.is_public(&addr("/ip4/8.8.8.8/tcp/1")));
    assert!(!classifier.is_public(&addr("/ip4/192.168.1.1/tcp/1")));
    assert!(!classifier.is_public(&addr("/dns/localhost/tcp/1")));
}

#[test]
fn test_public_key_record_validation() {
    let validator = DefaultRecordValidator;
    let public_key = b"a public key".to_vec();
    let owner = PeerId::from_public_key(&public_key);
    let key = Record::public_key_key(&owner);

    let good = Record::new(key.clone(), public_key);
    assert_eq!(validator.validate(&key, &good), Ok(()));

    let forged = Record::new(key.clone(), b"someone else".to_vec());
    assert_eq!(validator.validate(&key, &forged), Err(ValidationError::PublicKeyMismatch));
}

#[test]
fn test_unknown_namespace_rejected() {
    let validator = DefaultRecordValidator;
    let record = Record::new(b"/ipns/x".to_vec(), b"v".to_vec());
    assert!(matches!(
        validator.validate(b"/ipns/x", &record),
        Err(ValidationError::InvalidRecord(_))
    ));
}

#[tokio::test]
async fn test_liveness_checker_follows_reachability() {
    let network = MemoryNetwork::new();
    let (local, remote) = (test_peer(1), test_peer(2));
    network.add_node(remote, vec![test_addr(30, 4001)]);
    let checker = ConnectionLivenessChecker::new(
        network.connection_manager(local, test_addr(20, 4001)),
        Duration::from_secs(1),
    );

    assert!(checker.is_alive(&remote).await);
    network.set_unreachable(&remote, true);
    assert!(!checker.is_alive(&remote).await);
    assert!(!checker.is_alive(&test_peer(3)).await);
}

#[tokio::test]
async fn test_routing_table_walk_yields_known_peers_only() {
    let routing = Arc::new(KadRoutingTable::new(
        test_peer(0),
        &KademliaConfig::default(),
        Arc::new(FixedLiveness(true)),
        Arc::new(FixedTimeSource::new(1_000)),
    ));
    let store = Arc::new(MemoryPeerStore::new());
    for seed in 1..=3 {
        routing.add(test_peer(seed)).await.unwrap();
    }
    store.merge(&PeerInfo::new(test_peer(1), vec![test_addr(20, 1)]));
    store.merge(&PeerInfo::new(test_peer(2), vec![test_addr(30, 1)]));

    let walk = RoutingTableWalk::new(routing, store);
    let mut ids: Vec<_> = walk.walk().map(|p| p.id).collect().await;
    ids.sort_by_key(|id| *id.as_bytes());

    assert_eq!(ids, vec![test_peer(1), test_peer(2)]);
}
