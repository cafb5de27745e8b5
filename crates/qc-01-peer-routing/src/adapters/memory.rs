use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;

use crate::domain::{NetworkAddress, PeerId, PeerInfo, Record};
use crate::ports::{AddressManager, PeerStore, RandomWalk, RecordStore};
use crate::service::KadRoutingTable;

// ============================================================================
// MemoryPeerStore - Address book held in memory
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryPeerStore {
    peers: RwLock<HashMap<PeerId, PeerInfo>>,
}

impl MemoryPeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

impl PeerStore for MemoryPeerStore {
    fn get(&self, peer: &PeerId) -> Option<PeerInfo> {
        self.peers.read().get(peer).cloned()
    }

    fn merge(&self, peer: &PeerInfo) {
        let mut peers = self.peers.write();
        let entry = peers
            .entry(peer.id)
            .or_insert_with(|| PeerInfo::bare(peer.id));
        for addr in &peer.addrs {
            let addr = addr.without_peer();
            if !entry.addrs.contains(&addr) {
                entry.addrs.push(addr);
            }
        }
    }
}

// ============================================================================
// MemoryRecordStore - Records served to other peers
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<Vec<u8>, Record>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, key: &[u8]) -> Option<Record> {
        self.records.read().get(key).cloned()
    }

    fn put(&self, record: Record) {
        self.records.write().insert(record.key.clone(), record);
    }
}

// ============================================================================
// StaticAddressManager - Fixed listen addresses, mutable observed set
// ============================================================================

#[derive(Debug, Default)]
pub struct StaticAddressManager {
    listen: Vec<NetworkAddress>,
    observed: Mutex<Vec<NetworkAddress>>,
    confirmed: Mutex<Vec<NetworkAddress>>,
}

impl StaticAddressManager {
    pub fn new(listen: Vec<NetworkAddress>) -> Self {
        Self {
            listen,
            ..Self::default()
        }
    }

    /// Record an address a remote peer reports seeing us on.
    pub fn add_observed(&self, addr: NetworkAddress) {
        let mut observed = self.observed.lock();
        if !observed.contains(&addr) {
            observed.push(addr);
        }
    }

    pub fn confirmed(&self) -> Vec<NetworkAddress> {
        self.confirmed.lock().clone()
    }
}

impl AddressManager for StaticAddressManager {
    fn addresses(&self) -> Vec<NetworkAddress> {
        let mut addrs = self.listen.clone();
        addrs.extend(self.confirmed.lock().iter().cloned());
        addrs
    }

    fn observed_addresses(&self) -> Vec<NetworkAddress> {
        self.observed.lock().clone()
    }

    fn confirm_observed(&self, addr: &NetworkAddress) {
        self.observed.lock().retain(|a| a != addr);
        let mut confirmed = self.confirmed.lock();
        if !confirmed.contains(addr) {
            confirmed.push(addr.clone());
        }
    }

    fn remove_observed(&self, addr: &NetworkAddress) {
        self.observed.lock().retain(|a| a != addr);
    }
}

// ============================================================================
// RoutingTableWalk - Random walk over peers already in the routing table
// ============================================================================

/// Yields routing-table peers with known addresses in random order.
pub struct RoutingTableWalk {
    routing: Arc<KadRoutingTable>,
    peer_store: Arc<dyn PeerStore>,
}

impl RoutingTableWalk {
    pub fn new(routing: Arc<KadRoutingTable>, peer_store: Arc<dyn PeerStore>) -> Self {
        Self {
            routing,
            peer_store,
        }
    }
}

impl RandomWalk for RoutingTableWalk {
    fn walk(&self) -> BoxStream<'static, PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .routing
            .peers()
            .into_iter()
            .filter_map(|id| self.peer_store.get(&id))
            .filter(|info| !info.addrs.is_empty())
            .collect();
        peers.shuffle(&mut rand::thread_rng());
        stream::iter(peers).boxed()
    }
}
