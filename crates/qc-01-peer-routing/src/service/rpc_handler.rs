//! Server side of the routing protocol.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tracing::{debug, trace};

use crate::domain::{PeerId, PeerInfo};
use crate::ports::{
    Connection, PeerRoutingApi, PeerStore, RecordStore, RecordValidator, StreamHandle,
    StreamHandler, TimeSource,
};
use crate::protocol::{encode_peers, framed, RoutingMessage};

use super::peer_routing::PeerRoutingService;
use super::routing::KadRoutingTable;

/// Answers FIND_NODE, GET_VALUE, PUT_VALUE, GET_PROVIDERS and ADD_PROVIDER
/// requests from remote peers.
///
/// Each requester is remembered in the peer store and offered to the
/// routing table after it has been answered.
pub struct RoutingRpcHandler {
    service: Arc<PeerRoutingService>,
    routing: Arc<KadRoutingTable>,
    peer_store: Arc<dyn PeerStore>,
    records: Arc<dyn RecordStore>,
    validator: Arc<dyn RecordValidator>,
    time_source: Arc<dyn TimeSource>,
    max_frame_size: usize,
    read_timeout: Duration,
}

impl RoutingRpcHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: Arc<PeerRoutingService>,
        peer_store: Arc<dyn PeerStore>,
        records: Arc<dyn RecordStore>,
        validator: Arc<dyn RecordValidator>,
        time_source: Arc<dyn TimeSource>,
        max_frame_size: usize,
        read_timeout: Duration,
    ) -> Self {
        Self {
            routing: Arc::clone(service.routing_table()),
            service,
            peer_store,
            records,
            validator,
            time_source,
            max_frame_size,
            read_timeout,
        }
    }

    /// Build the answer to one request. `None` means no reply is sent.
    fn respond(&self, requester: &PeerId, request: RoutingMessage) -> Option<RoutingMessage> {
        match request {
            RoutingMessage::FindNode { key, .. } => {
                let closer = self.service.get_closer_peers_offline(&key, requester);
                Some(RoutingMessage::FindNode {
                    closer: encode_peers(&closer),
                    key,
                })
            }
            RoutingMessage::GetValue { key, .. } => {
                let record = self.records.get(&key);
                let closer = self.service.get_closer_peers_offline(&key, requester);
                Some(RoutingMessage::GetValue {
                    record,
                    closer: encode_peers(&closer),
                    key,
                })
            }
            RoutingMessage::PutValue { key, mut record } => {
                if let Err(e) = self.validator.validate(&key, &record) {
                    debug!(peer = %requester, error = %e, "[qc-01] Rejected PUT_VALUE");
                    return None;
                }
                record.time_received = Some(self.time_source.now().as_secs());
                self.records.put(record.clone());
                Some(RoutingMessage::PutValue { key, record })
            }
            RoutingMessage::GetProviders { key, .. } => {
                let closer = self.service.get_closer_peers_offline(&key, requester);
                Some(RoutingMessage::GetProviders {
                    closer: encode_peers(&closer),
                    providers: Vec::new(),
                    key,
                })
            }
            RoutingMessage::AddProvider { .. } => None,
        }
    }

    async fn learn(&self, connection: &dyn Connection) {
        let requester = connection.remote_peer();
        self.peer_store
            .merge(&PeerInfo::new(requester, vec![connection.remote_addr()]));
        if let Err(e) = self.routing.add(requester).await {
            trace!(peer = %requester, error = %e, "[qc-01] Requester not added");
        }
    }
}

#[async_trait]
impl StreamHandler for RoutingRpcHandler {
    async fn handle_stream(&self, stream: StreamHandle, connection: Arc<dyn Connection>) {
        let requester = connection.remote_peer();
        let mut framed = framed::<RoutingMessage>(stream, self.max_frame_size);

        let request = match tokio::time::timeout(self.read_timeout, framed.next()).await {
            Ok(Some(Ok(request))) => request,
            Ok(Some(Err(e))) => {
                debug!(peer = %requester, error = %e, "[qc-01] Bad routing request");
                framed.get_mut().abort("bad request");
                return;
            }
            Ok(None) => return,
            Err(_) => {
                framed.get_mut().abort("request timed out");
                return;
            }
        };

        let message_type = request.message_type();
        trace!(peer = %requester, "[qc-01] Serving {}", message_type);

        match self.respond(&requester, request) {
            Some(response) => match framed.send(response).await {
                Ok(()) => {
                    let _ = framed.close().await;
                }
                Err(e) => {
                    debug!(peer = %requester, error = %e, "[qc-01] Failed to answer {}", message_type);
                    framed.get_mut().abort("write failed");
                }
            },
            None => {
                let _ = framed.close().await;
            }
        }

        self.learn(connection.as_ref()).await;
    }
}
