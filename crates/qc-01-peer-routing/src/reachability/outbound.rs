//! One outbound verification round.
//!
//! Random peers are asked to dial us back on our public observed addresses.
//! The first address to collect enough agreeing answers from distinct
//! network segments is confirmed or rejected, and the round ends there.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::domain::{
    network_segment, NetworkAddress, PeerId, PeerInfo, ReachabilityConfig, ReachabilityTally,
    SegmentFilter, TallyVerdict,
};
use crate::ports::{ConnectionManager, DialTarget};
use crate::protocol::{framed, DialResponse, DialResponseStatus, ReachabilityMessage, WirePeer};

use super::verifier::VerifierComponents;
use super::{ReachabilityEvent, RoundOutcome};

/// A dial response together with the address it arrived from.
struct ProbeAnswer {
    response: DialResponse,
    remote_addr: NetworkAddress,
}

pub(super) struct Round<'a> {
    pub(super) components: &'a VerifierComponents,
    pub(super) config: &'a ReachabilityConfig,
    pub(super) protocol: &'a str,
    pub(super) max_frame_size: usize,
    pub(super) events: &'a broadcast::Sender<ReachabilityEvent>,
}

impl Round<'_> {
    pub(super) async fn run(&self) -> RoundOutcome {
        let candidates: Vec<NetworkAddress> = self
            .components
            .address_manager
            .observed_addresses()
            .into_iter()
            .filter(|addr| self.components.classifier.is_public(addr))
            .collect();

        if candidates.is_empty() {
            debug!("[qc-01] No public addresses found, not requesting verification");
            return RoundOutcome::NoCandidates;
        }

        debug!(candidates = candidates.len(), "[qc-01] Verifying observed addresses");
        match tokio::time::timeout(self.config.timeout(), self.campaign(&candidates)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!("[qc-01] Verification round timed out");
                RoundOutcome::Inconclusive
            }
        }
    }

    async fn campaign(&self, candidates: &[NetworkAddress]) -> RoundOutcome {
        let local = self.components.local_peer;
        let request = ReachabilityMessage::Dial {
            peer: WirePeer::from(&PeerInfo::new(local, candidates.to_vec())),
        };

        let mut answers = self
            .components
            .random_walk
            .walk()
            .filter(move |peer| futures::future::ready(peer.id != local))
            .map(|peer| {
                let request = request.clone();
                let connections = Arc::clone(&self.components.connections);
                probe(connections, peer.id, request, self.protocol, self.max_frame_size)
            })
            .buffer_unordered(self.config.max_concurrent_probes.max(1));

        let mut tally = ReachabilityTally::new(self.config.required_successful_dials);
        let mut segments = SegmentFilter::default();

        while let Some(answer) = answers.next().await {
            let Some(answer) = answer else {
                continue;
            };
            let Some((addr, status)) = self.accept(answer, candidates, &mut segments) else {
                continue;
            };

            let verdict = match status {
                DialResponseStatus::Ok => tally.record_success(&addr),
                _ => tally.record_failure(&addr),
            };

            match verdict {
                TallyVerdict::Confirmed(addr) => {
                    info!(addr = %addr, "[qc-01] Address is externally dialable");
                    self.components.address_manager.confirm_observed(&addr);
                    let _ = self.events.send(ReachabilityEvent::Confirmed(addr.clone()));
                    return RoundOutcome::Confirmed(addr);
                }
                TallyVerdict::Rejected(addr) => {
                    info!(addr = %addr, "[qc-01] Address is not externally dialable");
                    self.components.address_manager.remove_observed(&addr);
                    let _ = self.events.send(ReachabilityEvent::Rejected(addr.clone()));
                    return RoundOutcome::Rejected(addr);
                }
                TallyVerdict::Pending | TallyVerdict::Settled => {}
            }
        }

        debug!("[qc-01] Random walk exhausted before any address settled");
        RoundOutcome::Inconclusive
    }

    /// Map a verifier's answer to the candidate it speaks for, or `None` if
    /// the answer does not count.
    fn accept(
        &self,
        answer: ProbeAnswer,
        candidates: &[NetworkAddress],
        segments: &mut SegmentFilter,
    ) -> Option<(NetworkAddress, DialResponseStatus)> {
        let ProbeAnswer { response, remote_addr } = answer;

        if response.status == DialResponseStatus::Ok {
            if remote_addr.ip().is_none() {
                trace!(verifier = %remote_addr, "[qc-01] Verifier address is not IP");
                return None;
            }
            if !segments.admit(network_segment(&remote_addr)) {
                debug!(verifier = %remote_addr, "[qc-01] Already have an answer from this network segment");
                return None;
            }
        }

        match response.status {
            DialResponseStatus::BadRequest | DialResponseStatus::DialRefused => {
                trace!(status = %response.status, text = %response.status_text, "[qc-01] Verifier declined");
                return None;
            }
            DialResponseStatus::Ok | DialResponseStatus::DialError => {}
        }

        let reported = match &response.addr {
            Some(bytes) => NetworkAddress::from_bytes(bytes).ok()?,
            // With several candidates an answer must say which one it means.
            None if candidates.len() > 1 => return None,
            None => candidates[0].clone(),
        };

        let matched = candidates
            .iter()
            .find(|c| c.without_peer() == reported.without_peer())
            .cloned();
        if matched.is_none() {
            debug!(addr = %reported, status = %response.status, "[qc-01] Verifier reported an address we did not send");
        }
        matched.map(|addr| (addr, response.status))
    }
}

/// Ask one peer to dial us back. `None` on any failure.
async fn probe(
    connections: Arc<dyn ConnectionManager>,
    peer: PeerId,
    request: ReachabilityMessage,
    protocol: &str,
    max_frame_size: usize,
) -> Option<ProbeAnswer> {
    trace!(peer = %peer, "[qc-01] Asking peer to verify addresses");
    let connection = match connections.open_connection(DialTarget::Peer(peer)).await {
        Ok(connection) => connection,
        Err(e) => {
            debug!(peer = %peer, error = %e, "[qc-01] Could not reach verifier");
            return None;
        }
    };
    let stream = match connection.new_stream(protocol).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(peer = %peer, error = %e, "[qc-01] Verifier refused stream");
            return None;
        }
    };

    let mut framed = framed::<ReachabilityMessage>(stream, max_frame_size);
    if let Err(e) = framed.send(request).await {
        debug!(peer = %peer, error = %e, "[qc-01] Failed to send dial request");
        framed.get_mut().abort("write failed");
        return None;
    }

    match framed.next().await {
        Some(Ok(ReachabilityMessage::DialResponse(response))) => {
            let _ = framed.close().await;
            Some(ProbeAnswer {
                response,
                remote_addr: connection.remote_addr(),
            })
        }
        Some(Ok(other)) => {
            debug!(peer = %peer, message = other.name(), "[qc-01] Invalid reachability response");
            framed.get_mut().abort("unexpected message");
            None
        }
        Some(Err(e)) => {
            debug!(peer = %peer, error = %e, "[qc-01] Could not decode reachability response");
            framed.get_mut().abort("bad response");
            None
        }
        None => {
            debug!(peer = %peer, "[qc-01] No response received");
            None
        }
    }
}
