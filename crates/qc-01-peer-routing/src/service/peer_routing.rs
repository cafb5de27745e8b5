//! Peer and value lookups over the routing protocol.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{
    KadId, KademliaConfig, PeerDistanceList, PeerId, PeerInfo, QueryError, Record,
    ValidationError,
};
use crate::network::{event_channel, NetworkTransport, QueryEvent, QueryStream};
use crate::ports::{FindPeerOptions, PeerRoutingApi, PeerStore, RecordValidator};
use crate::protocol::RoutingMessage;
use crate::query::{QueryContext, QueryManager, QueryOptions};

use super::routing::KadRoutingTable;

const NO_PUBLIC_KEY: &str = "node not responding with its public key";

/// Implements [`PeerRoutingApi`] on top of the routing table, the
/// traversal engine and the transport.
pub struct PeerRoutingService {
    local_peer: PeerId,
    routing: Arc<KadRoutingTable>,
    transport: Arc<NetworkTransport>,
    queries: QueryManager,
    peer_store: Arc<dyn PeerStore>,
    validator: Arc<dyn RecordValidator>,
    config: KademliaConfig,
}

impl PeerRoutingService {
    pub fn new(
        routing: Arc<KadRoutingTable>,
        transport: Arc<NetworkTransport>,
        peer_store: Arc<dyn PeerStore>,
        validator: Arc<dyn RecordValidator>,
        config: KademliaConfig,
    ) -> Self {
        let queries = QueryManager::new(Arc::clone(&routing), Arc::clone(&peer_store), config.clone());
        Self {
            local_peer: routing.local_peer(),
            routing,
            transport,
            queries,
            peer_store,
            validator,
            config,
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn routing_table(&self) -> &Arc<KadRoutingTable> {
        &self.routing
    }

    /// Query function sending FIND_NODE for `key` to each traversal peer.
    fn find_node_query(&self, key: Vec<u8>) -> impl Fn(QueryContext) -> QueryStream + Send + Sync + 'static {
        let transport = Arc::clone(&self.transport);
        move |ctx: QueryContext| {
            transport.send_request(ctx.peer.id, RoutingMessage::find_node(key.clone()), ctx.cancel)
        }
    }

    fn known_peer(&self, peer: &PeerId) -> PeerInfo {
        self.peer_store
            .get(peer)
            .unwrap_or_else(|| PeerInfo::bare(*peer))
    }
}

/// Check a record received from the network.
fn check_record(validator: &dyn RecordValidator, record: &Record) -> Result<(), ValidationError> {
    if record.time_received.is_none() {
        return Err(ValidationError::InvalidRecord("invalid record received".into()));
    }
    validator.validate(&record.key, record)
}

fn single(event: QueryEvent) -> QueryStream {
    stream::once(async move { event }).boxed()
}

impl PeerRoutingApi for PeerRoutingService {
    fn find_peer_local(&self, peer: &PeerId) -> Option<PeerInfo> {
        let info = self.peer_store.get(peer).filter(|p| !p.addrs.is_empty())?;
        debug!(
            peer = %peer,
            in_table = self.routing.find(peer).is_some(),
            "[qc-01] Found peer locally"
        );
        Some(info)
    }

    fn find_peer(&self, peer: PeerId, options: FindPeerOptions) -> QueryStream {
        let local = self.local_peer;

        if options.use_cache {
            if let Some(info) = self.find_peer_local(&peer) {
                return single(QueryEvent::FinalPeer {
                    from: local,
                    peer: info,
                });
            }
        }

        if !options.use_network {
            return single(QueryEvent::QueryError {
                from: local,
                error: QueryError::NotFound,
            });
        }

        let find_node = self.find_node_query(peer.to_bytes());
        let query_fn = move |ctx: QueryContext| {
            find_node(ctx)
                .flat_map(move |event| {
                    let found = match &event {
                        QueryEvent::PeerResponse { from, closer, .. } => closer
                            .iter()
                            .find(|p| p.id == peer)
                            .map(|p| QueryEvent::FinalPeer {
                                from: *from,
                                peer: p.clone(),
                            }),
                        _ => None,
                    };
                    stream::iter(std::iter::once(event).chain(found))
                })
                .boxed()
        };

        let mut traversal = self.queries.run(
            peer.to_bytes(),
            query_fn,
            QueryOptions {
                cancel: options.cancel,
            },
        );

        let (events, stream) = event_channel();
        tokio::spawn(async move {
            let mut settled = false;
            while let Some(event) = traversal.next().await {
                match &event {
                    QueryEvent::FinalPeer { .. } => settled = true,
                    QueryEvent::QueryError { from, error } if *from == local && error.is_cancellation() => {
                        settled = true
                    }
                    _ => {}
                }
                if !events.emit(event).await {
                    return;
                }
            }
            if !settled {
                debug!(peer = %peer, "[qc-01] Peer not found");
                events
                    .emit(QueryEvent::QueryError {
                        from: local,
                        error: QueryError::NotFound,
                    })
                    .await;
            }
        });
        stream
    }

    fn get_closest_peers(&self, key: Vec<u8>, cancel: CancellationToken) -> QueryStream {
        let local = self.local_peer;
        let origin = KadId::from_key(&key);
        let mut closest = PeerDistanceList::new(origin, self.config.k);
        for id in self.routing.closest_peers(&origin, self.config.k) {
            closest.add(self.known_peer(&id));
        }

        let mut traversal = self.queries.run(
            key.clone(),
            self.find_node_query(key),
            QueryOptions { cancel },
        );

        let (events, stream) = event_channel();
        tokio::spawn(async move {
            let mut cancelled = false;
            while let Some(event) = traversal.next().await {
                match &event {
                    QueryEvent::PeerResponse { closer, .. } => {
                        for peer in closer.iter().filter(|p| p.id != local) {
                            closest.add(peer.clone());
                        }
                    }
                    QueryEvent::QueryError { from, error } if *from == local && error.is_cancellation() => {
                        cancelled = true
                    }
                    _ => {}
                }
                if !events.emit(event).await {
                    return;
                }
            }
            if cancelled {
                return;
            }
            for peer in closest.into_peers() {
                if !events.emit(QueryEvent::FinalPeer { from: local, peer }).await {
                    return;
                }
            }
        });
        stream
    }

    fn get_value_or_peers(&self, peer: PeerId, key: Vec<u8>, cancel: CancellationToken) -> QueryStream {
        let validator = Arc::clone(&self.validator);
        self.transport
            .send_request(peer, RoutingMessage::get_value(key), cancel)
            .map(move |event| match event {
                QueryEvent::PeerResponse {
                    from,
                    record: Some(record),
                    ..
                } if check_record(validator.as_ref(), &record).is_err() => {
                    debug!(peer = %from, "[qc-01] Discarding invalid record");
                    QueryEvent::QueryError {
                        from,
                        error: ValidationError::InvalidRecord(
                            "invalid record received, discarded".into(),
                        )
                        .into(),
                    }
                }
                other => other,
            })
            .boxed()
    }

    fn get_public_key_from_node(&self, peer: PeerId, cancel: CancellationToken) -> QueryStream {
        let key = Record::public_key_key(&peer);
        let mut request = self
            .transport
            .send_request(peer, RoutingMessage::get_value(key), cancel);

        let (events, stream) = event_channel();
        tokio::spawn(async move {
            while let Some(event) = request.next().await {
                let verdict = match &event {
                    QueryEvent::PeerResponse { from, record, .. } => Some(match record {
                        Some(record) if PeerId::from_public_key(&record.value) == peer => {
                            QueryEvent::Value {
                                from: *from,
                                value: record.value.clone(),
                            }
                        }
                        Some(_) => QueryEvent::QueryError {
                            from: *from,
                            error: ValidationError::PublicKeyMismatch.into(),
                        },
                        None => QueryEvent::QueryError {
                            from: *from,
                            error: ValidationError::InvalidRecord(NO_PUBLIC_KEY.into()).into(),
                        },
                    }),
                    _ => None,
                };

                if !events.emit(event).await {
                    return;
                }
                if let Some(verdict) = verdict {
                    events.emit(verdict).await;
                    return;
                }
            }
            debug!(peer = %peer, "[qc-01] No public key received");
            events
                .emit(QueryEvent::QueryError {
                    from: peer,
                    error: ValidationError::InvalidRecord(NO_PUBLIC_KEY.into()).into(),
                })
                .await;
        });
        stream
    }

    fn get_closer_peers_offline(&self, key: &[u8], excluding: &PeerId) -> Vec<PeerInfo> {
        let target = KadId::from_key(key);
        self.routing
            .closest_peers(&target, self.config.k)
            .into_iter()
            .filter(|id| id != excluding && *id != self.local_peer)
            .filter_map(|id| self.peer_store.get(&id))
            .filter(|info| !info.addrs.is_empty())
            .collect()
    }

    fn verify_record(&self, record: &Record) -> Result<(), ValidationError> {
        check_record(self.validator.as_ref(), record)
    }
}
