//! # Overlay Node
//!
//! Owns every qc-01 service of one node and the tasks that drive them.
//!
//! ## Startup Sequence
//!
//! 1. Bind the TCP listener and derive the node id from the public key
//! 2. Build the routing table, transport and lookup service
//! 3. Publish our public key under `/pk/` and serve the routing protocol
//! 4. Start the reachability verifier
//! 5. Spawn the listener, the discovery listener and the event logger

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use qc_01_peer_routing::{
    Connection, ConnectionLivenessChecker, DefaultRecordValidator, KadRoutingTable,
    MemoryPeerStore, MemoryRecordStore, NetworkAddress, NetworkTransport, OverlayConfig,
    PeerId, PeerInfo, PeerRoutingApi, PeerRoutingService, PeerStore, PublicAddressClassifier,
    QueryEvent, ReachabilityApi, ReachabilityEvent, ReachabilityVerifier, Record, RecordStore,
    RecordValidator, Registrar, RoutingRpcHandler, RoutingTableWalk, StaticAddressManager,
    StreamLimits, SystemTimeSource, TimeSource, VerifierComponents,
};

use crate::tcp::{spawn_listener, Endpoint, TcpConnectionManager, TcpRegistrar};

/// A running overlay node.
pub struct OverlayNode {
    peer: PeerId,
    listen_addr: NetworkAddress,
    connections: Arc<TcpConnectionManager>,
    routing: Arc<KadRoutingTable>,
    transport: Arc<NetworkTransport>,
    service: Arc<PeerRoutingService>,
    verifier: Arc<ReachabilityVerifier>,
    addresses: Arc<StaticAddressManager>,
    peer_store: Arc<MemoryPeerStore>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl OverlayNode {
    /// Bind `listen` and start every service.
    pub async fn start(listen: SocketAddr, public_key: Vec<u8>, config: OverlayConfig) -> Result<Self> {
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("binding {listen}"))?;
        let local = listener.local_addr().context("reading listen address")?;
        let listen_addr = NetworkAddress::tcp(local);
        let peer = PeerId::from_public_key(&public_key);

        let registrar = Arc::new(TcpRegistrar::new());
        let endpoint = Endpoint {
            peer,
            listen_port: local.port(),
            registrar: Arc::clone(&registrar),
        };
        let peer_store = Arc::new(MemoryPeerStore::new());
        let connections = Arc::new(TcpConnectionManager::new(endpoint.clone(), peer_store.clone()));

        let time_source: Arc<dyn TimeSource> = Arc::new(SystemTimeSource::new());
        let liveness = Arc::new(ConnectionLivenessChecker::new(
            connections.clone(),
            config.reachability.timeout(),
        ));
        let routing = Arc::new(KadRoutingTable::new(
            peer,
            &config.kademlia,
            liveness,
            Arc::clone(&time_source),
        ));
        let transport = Arc::new(NetworkTransport::new(peer, connections.clone(), &config));
        transport.start();

        let validator: Arc<dyn RecordValidator> = Arc::new(DefaultRecordValidator);
        let service = Arc::new(PeerRoutingService::new(
            Arc::clone(&routing),
            Arc::clone(&transport),
            peer_store.clone(),
            Arc::clone(&validator),
            config.kademlia.clone(),
        ));

        let records = Arc::new(MemoryRecordStore::new());
        records.put(Record {
            key: Record::public_key_key(&peer),
            value: public_key,
            time_received: Some(time_source.now().as_secs()),
        });

        let limits = StreamLimits {
            max_inbound_streams: config.kademlia.max_inbound_streams,
            max_outbound_streams: config.kademlia.max_outbound_streams,
        };
        let handler = RoutingRpcHandler::new(
            Arc::clone(&service),
            peer_store.clone(),
            records,
            validator,
            time_source,
            config.max_frame_size,
            config.reachability.timeout(),
        );
        registrar
            .handle(&config.routing_protocol(), Arc::new(handler), limits)
            .context("registering the routing protocol")?;

        let addresses = Arc::new(StaticAddressManager::new(vec![listen_addr.clone()]));
        let components = VerifierComponents {
            local_peer: peer,
            connections: connections.clone(),
            registrar,
            address_manager: addresses.clone(),
            classifier: Arc::new(PublicAddressClassifier),
            random_walk: Arc::new(RoutingTableWalk::new(Arc::clone(&routing), peer_store.clone())),
        };
        let verifier = Arc::new(ReachabilityVerifier::new(components, &config));
        verifier.start().context("starting the reachability verifier")?;

        let cancel = CancellationToken::new();
        let tasks = vec![
            spawn_listener(listener, endpoint, cancel.child_token()),
            routing.spawn_discovery_listener(&transport, peer_store.clone(), cancel.child_token()),
            spawn_event_logger(&verifier, cancel.child_token()),
        ];

        info!(peer = %peer, addr = %listen_addr, "[qc-01] Overlay node started");
        Ok(Self {
            peer,
            listen_addr,
            connections,
            routing,
            transport,
            service,
            verifier,
            addresses,
            peer_store,
            cancel,
            tasks,
        })
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn listen_addr(&self) -> &NetworkAddress {
        &self.listen_addr
    }

    pub fn service(&self) -> &Arc<PeerRoutingService> {
        &self.service
    }

    pub fn routing(&self) -> &Arc<KadRoutingTable> {
        &self.routing
    }

    pub fn verifier(&self) -> &Arc<ReachabilityVerifier> {
        &self.verifier
    }

    /// Addresses other peers reported seeing us on, pending verification.
    pub fn addresses(&self) -> &Arc<StaticAddressManager> {
        &self.addresses
    }

    /// Identify each seed, add it to the routing table, then look up our
    /// own id to fill the table. Returns how many seeds answered.
    pub async fn bootstrap(&self, seeds: &[NetworkAddress]) -> usize {
        let mut reached = 0;
        for seed in seeds {
            let connection = match self.connections.connect(seed).await {
                Ok(connection) => connection,
                Err(e) => {
                    warn!(seed = %seed, error = %e, "[qc-01] Bootstrap node unreachable");
                    continue;
                }
            };
            let remote = connection.remote_peer();
            if remote == self.peer {
                debug!(seed = %seed, "[qc-01] Skipping ourselves in the bootstrap list");
                continue;
            }

            self.peer_store
                .merge(&PeerInfo::new(remote, vec![connection.remote_addr()]));
            if let Err(e) = self.routing.add(remote).await {
                debug!(peer = %remote, error = %e, "[qc-01] Bootstrap node not added");
            }
            if let Some(observed) = connection.observed_addr() {
                self.addresses.add_observed(observed.clone());
            }
            reached += 1;
        }

        if reached > 0 {
            let found = self
                .service
                .get_closest_peers(self.peer.to_bytes(), self.cancel.child_token())
                .filter(|event| futures::future::ready(matches!(event, QueryEvent::FinalPeer { .. })))
                .count()
                .await;
            info!(
                seeds = reached,
                closest = found,
                table = self.routing.len(),
                "[qc-01] Bootstrap complete"
            );
            self.verifier.trigger_verification();
        }
        reached
    }

    /// Stop every service and wait for the background tasks.
    pub async fn shutdown(self) {
        self.verifier.stop();
        self.transport.stop();
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!(peer = %self.peer, "[qc-01] Overlay node stopped");
    }
}

fn spawn_event_logger(verifier: &ReachabilityVerifier, cancel: CancellationToken) -> JoinHandle<()> {
    let mut events = verifier.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
            };
            match event {
                ReachabilityEvent::Confirmed(addr) => {
                    info!(addr = %addr, "[qc-01] External address confirmed")
                }
                ReachabilityEvent::Rejected(addr) => {
                    warn!(addr = %addr, "[qc-01] External address unreachable")
                }
            }
        }
    })
}
