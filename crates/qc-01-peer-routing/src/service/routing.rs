//! Shared routing table with asynchronous eviction challenges.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::domain::{
    InsertOutcome, KadId, KademliaConfig, PeerId, RoutingTable, RoutingTableError,
    RoutingTableStats,
};
use crate::network::NetworkTransport;
use crate::ports::{LivenessChecker, PeerStore, TimeSource};

/// Withdraws an unresolved challenge when `add` is dropped mid-check.
struct ChallengeGuard<'a> {
    table: &'a Mutex<RoutingTable>,
    challenged: Option<PeerId>,
}

impl ChallengeGuard<'_> {
    fn disarm(mut self) {
        self.challenged = None;
    }
}

impl Drop for ChallengeGuard<'_> {
    fn drop(&mut self) {
        if let Some(challenged) = self.challenged.take() {
            if self.table.lock().cancel_eviction(&challenged) {
                debug!(challenged = %challenged, "[qc-01] Eviction challenge abandoned");
            }
        }
    }
}

/// The routing table shared by the traversal, the RPC handler and the
/// discovery listener.
///
/// Bucket mutation is serialised by one lock. The liveness check for a
/// challenged entry runs with the lock released.
pub struct KadRoutingTable {
    table: Mutex<RoutingTable>,
    liveness: Arc<dyn LivenessChecker>,
    time_source: Arc<dyn TimeSource>,
}

impl KadRoutingTable {
    pub fn new(
        local_peer: PeerId,
        config: &KademliaConfig,
        liveness: Arc<dyn LivenessChecker>,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            table: Mutex::new(RoutingTable::new(local_peer, config)),
            liveness,
            time_source,
        }
    }

    pub fn local_peer(&self) -> PeerId {
        *self.table.lock().local_peer()
    }

    pub fn k(&self) -> usize {
        self.table.lock().k()
    }

    /// Offer a peer to the table.
    ///
    /// When its bucket is full the least-recently-seen entry is asked
    /// whether it is still alive. A dead entry is evicted in favour of
    /// `peer`; a live one keeps its slot.
    pub async fn add(&self, peer: PeerId) -> Result<InsertOutcome, RoutingTableError> {
        let challenged = match self.table.lock().insert(peer, self.time_source.now())? {
            InsertOutcome::PendingEviction { challenged } => challenged,
            outcome => {
                if outcome == InsertOutcome::Inserted {
                    trace!(peer = %peer, "[qc-01] Peer added to routing table");
                }
                return Ok(outcome);
            }
        };

        let guard = ChallengeGuard {
            table: &self.table,
            challenged: Some(challenged),
        };
        let alive = self.liveness.is_alive(&challenged).await;
        guard.disarm();
        let resolved = self
            .table
            .lock()
            .resolve_eviction(&challenged, alive, self.time_source.now())?;

        debug!(
            candidate = %peer,
            challenged = %challenged,
            alive,
            "[qc-01] Eviction challenge resolved"
        );
        Ok(resolved)
    }

    pub fn find(&self, peer: &PeerId) -> Option<PeerId> {
        self.table.lock().find(peer)
    }

    pub fn closest_peers(&self, target: &KadId, count: usize) -> Vec<PeerId> {
        self.table.lock().closest_peers(target, count)
    }

    pub fn remove(&self, peer: &PeerId) -> bool {
        self.table.lock().remove(peer)
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.table.lock().peers()
    }

    pub fn stats(&self) -> RoutingTableStats {
        self.table.lock().stats(self.time_source.now())
    }

    /// Feed peers learned by `transport` into the peer store and the table
    /// until `cancel` fires.
    pub fn spawn_discovery_listener(
        self: &Arc<Self>,
        transport: &NetworkTransport,
        peer_store: Arc<dyn PeerStore>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut discovered = transport.subscribe_discovered();
        let routing = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let peer = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = discovered.recv() => match received {
                        Ok(peer) => peer,
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "[qc-01] Discovery listener lagging");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };

                if !peer.addrs.is_empty() {
                    peer_store.merge(&peer);
                }
                if let Err(e) = routing.add(peer.id).await {
                    trace!(peer = %peer.id, error = %e, "[qc-01] Discovered peer not added");
                }
            }
            debug!("[qc-01] Discovery listener stopped");
        })
    }
}
