//! Iterative "find closer peers" traversal.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{KadId, KademliaConfig, NetworkError, PeerId, PeerInfo};
use crate::network::{event_channel, EventSender, QueryEvent, QueryStream};
use crate::ports::PeerStore;
use crate::service::KadRoutingTable;

use super::state::{QueryOutcome, QueryState};

/// What the query function is asked to do for one peer.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub key: Vec<u8>,
    pub peer: PeerInfo,
    /// Cancelled when the traversal stops, including on a definitive answer
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub cancel: CancellationToken,
}

/// Runs traversals seeded from the routing table.
pub struct QueryManager {
    routing: Arc<KadRoutingTable>,
    peer_store: Arc<dyn PeerStore>,
    config: KademliaConfig,
}

impl QueryManager {
    pub fn new(
        routing: Arc<KadRoutingTable>,
        peer_store: Arc<dyn PeerStore>,
        config: KademliaConfig,
    ) -> Self {
        Self {
            routing,
            peer_store,
            config,
        }
    }

    /// Walk towards `key`, querying up to `alpha` peers at a time.
    ///
    /// Every event the query function yields is forwarded. Closer peers from
    /// `PeerResponse` events extend the frontier. The stream ends when the
    /// traversal converges, runs out of peers, gets a `FinalPeer`/`Value`
    /// event, or is cancelled. Cancellation and the overall deadline end
    /// with a `QueryError` from the local peer.
    pub fn run<F>(&self, key: Vec<u8>, query_fn: F, options: QueryOptions) -> QueryStream
    where
        F: Fn(QueryContext) -> QueryStream + Send + Sync + 'static,
    {
        let local_peer = self.routing.local_peer();
        let origin = KadId::from_key(&key);
        let mut state = QueryState::new(local_peer, origin, self.config.k);
        for id in self.routing.closest_peers(&origin, self.config.k) {
            let peer = self.peer_store.get(&id).unwrap_or_else(|| PeerInfo::bare(id));
            state.offer(peer);
        }

        let traversal = Traversal {
            key,
            local_peer,
            alpha: self.config.alpha.max(1),
            cancel: options.cancel,
            timeout: self.config.query_timeout(),
        };
        let (events, stream) = event_channel();

        tokio::spawn(async move {
            let seeds = state.frontier().len();
            let outcome = traversal.drive(&mut state, &query_fn, &events).await;
            debug!(
                seeds,
                queried = state.queried(),
                outcome = ?outcome,
                "[qc-01] Query finished"
            );
        });

        stream
    }
}

struct Traversal {
    key: Vec<u8>,
    local_peer: PeerId,
    alpha: usize,
    cancel: CancellationToken,
    timeout: std::time::Duration,
}

impl Traversal {
    async fn drive<F>(&self, state: &mut QueryState, query_fn: &F, events: &EventSender) -> QueryOutcome
    where
        F: Fn(QueryContext) -> QueryStream,
    {
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            let batch = state.next_batch(self.alpha);
            if batch.is_empty() {
                return QueryOutcome::Exhausted;
            }

            let dispatched = batch.len();
            let round_cancel = self.cancel.child_token();
            let _round_guard = round_cancel.clone().drop_guard();
            let mut round = stream::select_all(batch.into_iter().map(|peer| {
                query_fn(QueryContext {
                    key: self.key.clone(),
                    peer,
                    cancel: round_cancel.clone(),
                })
            }));

            let mut answered = 0;
            let mut improved = false;
            loop {
                let event = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        self.fail(events, NetworkError::Cancelled).await;
                        return QueryOutcome::Cancelled;
                    }
                    _ = &mut deadline => {
                        self.fail(events, NetworkError::Timeout).await;
                        return QueryOutcome::TimedOut;
                    }
                    _ = events.closed() => return QueryOutcome::Cancelled,
                    next = round.next() => match next {
                        Some(event) => event,
                        None => break,
                    },
                };

                if let QueryEvent::PeerResponse { closer, .. } = &event {
                    answered += 1;
                    for peer in closer {
                        improved |= state.offer(peer.clone());
                    }
                }

                let is_final = event.is_final();
                if !events.emit(event).await {
                    return QueryOutcome::Cancelled;
                }
                if is_final {
                    return QueryOutcome::Resolved;
                }
            }

            if answered >= dispatched && !improved {
                return QueryOutcome::Converged;
            }
        }
    }

    async fn fail(&self, events: &EventSender, error: NetworkError) {
        events
            .emit(QueryEvent::QueryError {
                from: self.local_peer,
                error: error.into(),
            })
            .await;
    }
}
