//! Serving dial-back requests from peers that want their addresses checked.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tracing::{debug, trace};

use crate::domain::{Host, NetworkAddress, NetworkError, PeerId};
use crate::ports::{
    AddressClassifier, AddressManager, Connection, ConnectionManager, DialTarget, StreamHandle,
    StreamHandler,
};
use crate::protocol::{framed, DialResponse, ReachabilityMessage, WirePeer};

/// Answers one DIAL request per stream by dialing the requester back.
pub(super) struct DialBackHandler {
    pub(super) connections: Arc<dyn ConnectionManager>,
    pub(super) address_manager: Arc<dyn AddressManager>,
    pub(super) classifier: Arc<dyn AddressClassifier>,
    pub(super) max_frame_size: usize,
    pub(super) timeout: Duration,
}

impl DialBackHandler {
    async fn handle_message(&self, message: ReachabilityMessage, connection: &dyn Connection) -> DialResponse {
        let peer = match message {
            ReachabilityMessage::Dial { peer } => peer,
            other => {
                debug!(message = other.name(), "[qc-01] Dial request missing");
                return DialResponse::bad_request("No Dial message found in message");
            }
        };

        if peer.id.is_empty() {
            return DialResponse::bad_request("missing peer info");
        }
        let claimed = match PeerId::from_bytes(&peer.id) {
            Ok(id) => id,
            Err(e) => {
                debug!(error = %e, "[qc-01] Invalid peer id in dial request");
                return DialResponse::bad_request("bad peer id");
            }
        };

        // Requests relayed on behalf of someone else are refused.
        let remote = connection.remote_peer();
        if claimed != remote {
            debug!(claimed = %claimed, remote = %remote, "[qc-01] Dial request peer id mismatch");
            return DialResponse::bad_request("peer id mismatch");
        }

        let candidates = self.dialable(&peer, claimed, &connection.remote_addr());
        if candidates.is_empty() {
            debug!(peer = %claimed, "[qc-01] No dialable addresses in request");
            return DialResponse::dial_refused("no dialable addresses");
        }

        self.dial_back(claimed, &candidates).await
    }

    /// Requested addresses worth dialing, each carrying the requester's id.
    fn dialable(&self, peer: &WirePeer, claimed: PeerId, observed: &NetworkAddress) -> Vec<NetworkAddress> {
        let our_hosts: Vec<Host> = self
            .address_manager
            .addresses()
            .into_iter()
            .map(|a| a.host)
            .collect();

        peer.addrs
            .iter()
            .filter_map(|bytes| NetworkAddress::from_bytes(bytes).ok())
            .filter(|addr| {
                let same_host = addr.host == observed.host;
                trace!(addr = %addr, observed = %observed, same_host, "[qc-01] Checking requester host");
                same_host
            })
            .filter(|addr| self.classifier.is_public(addr))
            .filter(|addr| !our_hosts.contains(&addr.host))
            .filter(|addr| self.connections.can_dial(addr))
            .map(|addr| match addr.peer {
                Some(_) => addr,
                None => addr.with_peer(claimed),
            })
            .collect()
    }

    async fn dial_back(&self, peer: PeerId, candidates: &[NetworkAddress]) -> DialResponse {
        let mut last_error = String::new();
        let mut last_addr = &candidates[0];

        for addr in candidates {
            last_addr = addr;
            let connection = match self
                .connections
                .open_connection(DialTarget::Address(addr.clone()))
                .await
            {
                Ok(connection) => connection,
                Err(e) => {
                    debug!(peer = %peer, addr = %addr, error = %e, "[qc-01] Dial-back failed");
                    last_error = e.to_string();
                    continue;
                }
            };

            let landed = connection.remote_addr();
            connection.close().await;

            if landed.without_peer() != addr.without_peer() {
                let error = NetworkError::UnexpectedRemoteAddress {
                    expected: addr.to_string(),
                    actual: landed.to_string(),
                };
                debug!(peer = %peer, error = %error, "[qc-01] Dial-back landed elsewhere");
                last_error = error.to_string();
                continue;
            }

            debug!(peer = %peer, addr = %addr, "[qc-01] Dial-back succeeded");
            return DialResponse::ok(&landed.without_peer());
        }

        DialResponse::dial_error(last_error, Some(last_addr))
    }
}

#[async_trait]
impl StreamHandler for DialBackHandler {
    async fn handle_stream(&self, stream: StreamHandle, connection: Arc<dyn Connection>) {
        let mut framed = framed::<ReachabilityMessage>(stream, self.max_frame_size);

        let exchange = async {
            let response = match framed.next().await {
                None => DialResponse::bad_request("No message was sent"),
                Some(Err(e)) => {
                    debug!(error = %e, "[qc-01] Could not decode dial request");
                    DialResponse::bad_request("Could not decode message")
                }
                Some(Ok(message)) => self.handle_message(message, connection.as_ref()).await,
            };
            trace!(status = %response.status, "[qc-01] Answering dial request");
            framed.send(ReachabilityMessage::DialResponse(response)).await
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(())) => {
                let _ = framed.close().await;
            }
            Ok(Err(e)) => {
                debug!(peer = %connection.remote_peer(), error = %e, "[qc-01] Failed to answer dial request");
                framed.get_mut().abort("write failed");
            }
            Err(_) => {
                debug!(peer = %connection.remote_peer(), "[qc-01] Dial request timed out");
                framed.get_mut().abort("dial request timed out");
            }
        }
    }
}
