//! Tests for the traversal engine

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::adapters::MemoryPeerStore;
use crate::domain::{KadId, KademliaConfig, NetworkError, PeerId, PeerInfo, QueryError};
use crate::network::{QueryEvent, QueryStream};
use crate::protocol::MessageType;
use crate::service::KadRoutingTable;
use crate::test_utils::{test_peer, FixedLiveness, FixedTimeSource};

const LOCAL: u8 = 0;

async fn manager_with(seeds: &[PeerId]) -> QueryManager {
    let config = KademliaConfig::for_testing();
    let routing = Arc::new(KadRoutingTable::new(
        test_peer(LOCAL),
        &config,
        Arc::new(FixedLiveness(true)),
        Arc::new(FixedTimeSource::new(1_000)),
    ));
    for seed in seeds {
        let _ = routing.add(*seed).await;
    }
    QueryManager::new(routing, Arc::new(MemoryPeerStore::new()), config)
}

fn response(from: PeerId, closer: Vec<PeerInfo>) -> QueryEvent {
    QueryEvent::PeerResponse {
        from,
        message_type: MessageType::FindNode,
        closer,
        providers: vec![],
        record: None,
    }
}

/// Query function answering from a static graph and logging who was asked.
fn graph_query(
    graph: HashMap<PeerId, Vec<PeerInfo>>,
    log: Arc<Mutex<Vec<PeerId>>>,
) -> impl Fn(QueryContext) -> QueryStream + Send + Sync + 'static {
    move |ctx: QueryContext| {
        log.lock().push(ctx.peer.id);
        let closer = graph.get(&ctx.peer.id).cloned().unwrap_or_default();
        stream::iter(vec![response(ctx.peer.id, closer)]).boxed()
    }
}

fn everyone(count: u8) -> Vec<PeerInfo> {
    (LOCAL..=count).map(|i| PeerInfo::bare(test_peer(i))).collect()
}

#[tokio::test]
async fn test_each_peer_queried_at_most_once() {
    let seeds: Vec<_> = (1..=3).map(test_peer).collect();
    let manager = manager_with(&seeds).await;
    let graph: HashMap<_, _> = (1..=12).map(|i| (test_peer(i), everyone(12))).collect();
    let log = Arc::new(Mutex::new(Vec::new()));

    let events: Vec<_> = manager
        .run(b"target".to_vec(), graph_query(graph, Arc::clone(&log)), QueryOptions::default())
        .collect()
        .await;

    let queried = log.lock().clone();
    let unique: HashSet<_> = queried.iter().copied().collect();
    assert_eq!(unique.len(), queried.len());
    assert!(!unique.contains(&test_peer(LOCAL)));
    assert!(!events.is_empty());
}

#[tokio::test]
async fn test_round_without_progress_converges() {
    let seeds: Vec<_> = (1..=3).map(test_peer).collect();
    let manager = manager_with(&seeds).await;
    let log = Arc::new(Mutex::new(Vec::new()));

    let events: Vec<_> = manager
        .run(b"target".to_vec(), graph_query(HashMap::new(), Arc::clone(&log)), QueryOptions::default())
        .collect()
        .await;

    // alpha is 2: the first round answers with nothing new and stops
    assert_eq!(log.lock().len(), 2);
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn test_failed_round_moves_on_to_remaining_peers() {
    let seeds: Vec<_> = (1..=3).map(test_peer).collect();
    let manager = manager_with(&seeds).await;
    let log = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::clone(&log);

    let query_fn = move |ctx: QueryContext| {
        calls.lock().push(ctx.peer.id);
        stream::iter(vec![QueryEvent::QueryError {
            from: ctx.peer.id,
            error: NetworkError::DialFailed("down".into()).into(),
        }])
        .boxed()
    };

    let events: Vec<_> = manager
        .run(b"target".to_vec(), query_fn, QueryOptions::default())
        .collect()
        .await;

    assert_eq!(log.lock().len(), 3);
    assert_eq!(events.len(), 3);
}

#[tokio::test]
async fn test_final_event_stops_traversal() {
    let seeds: Vec<_> = (1..=3).map(test_peer).collect();
    let manager = manager_with(&seeds).await;
    let answer = PeerInfo::bare(test_peer(42));
    let expected = answer.clone();

    let query_fn = move |ctx: QueryContext| {
        let events = vec![
            response(ctx.peer.id, everyone(20)),
            QueryEvent::FinalPeer {
                from: ctx.peer.id,
                peer: answer.clone(),
            },
        ];
        stream::iter(events).boxed()
    };

    let events: Vec<_> = manager
        .run(b"target".to_vec(), query_fn, QueryOptions::default())
        .collect()
        .await;

    match events.last() {
        Some(QueryEvent::FinalPeer { peer, .. }) => assert_eq!(peer, &expected),
        other => panic!("expected final peer, got {other:?}"),
    }
    let finals = events.iter().filter(|e| e.is_final()).count();
    assert_eq!(finals, 1);
}

#[tokio::test]
async fn test_queried_peers_do_not_crowd_out_further_candidates() {
    // Capacity is 3 and the table already holds 3 seeds. Each hop only
    // knows the next one, which may be further from the key than anything
    // queried so far.
    let seeds: Vec<_> = (1..=3).map(test_peer).collect();
    let manager = manager_with(&seeds).await;
    let mut graph: HashMap<_, _> = seeds
        .iter()
        .map(|seed| (*seed, vec![PeerInfo::bare(test_peer(4))]))
        .collect();
    for hop in 4..10 {
        graph.insert(test_peer(hop), vec![PeerInfo::bare(test_peer(hop + 1))]);
    }
    let log = Arc::new(Mutex::new(Vec::new()));
    let find_node = graph_query(graph, Arc::clone(&log));
    let target = PeerInfo::bare(test_peer(10));
    let expected = target.clone();

    let query_fn = move |ctx: QueryContext| {
        if ctx.peer.id == target.id {
            return stream::iter(vec![QueryEvent::FinalPeer {
                from: ctx.peer.id,
                peer: target.clone(),
            }])
            .boxed();
        }
        find_node(ctx)
    };

    let events: Vec<_> = manager
        .run(b"target".to_vec(), query_fn, QueryOptions::default())
        .collect()
        .await;

    match events.last() {
        Some(QueryEvent::FinalPeer { peer, .. }) => assert_eq!(peer, &expected),
        other => panic!("expected the end of the chain, got {other:?}"),
    }
    let visited: HashSet<_> = log.lock().iter().copied().collect();
    assert!((4..10).all(|hop| visited.contains(&test_peer(hop))));
}

#[tokio::test]
async fn test_empty_table_yields_nothing() {
    let manager = manager_with(&[]).await;
    let log = Arc::new(Mutex::new(Vec::new()));

    let events: Vec<_> = manager
        .run(b"target".to_vec(), graph_query(HashMap::new(), Arc::clone(&log)), QueryOptions::default())
        .collect()
        .await;

    assert!(events.is_empty());
    assert!(log.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_yields_local_error() {
    let manager = manager_with(&[test_peer(1)]).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let events: Vec<_> = manager
        .run(
            b"target".to_vec(),
            |_ctx: QueryContext| stream::pending::<QueryEvent>().boxed(),
            QueryOptions { cancel },
        )
        .collect()
        .await;

    assert_eq!(
        events,
        vec![QueryEvent::QueryError {
            from: test_peer(LOCAL),
            error: QueryError::Network(NetworkError::Cancelled),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_query_deadline_yields_timeout() {
    let manager = manager_with(&[test_peer(1)]).await;

    let events: Vec<_> = manager
        .run(
            b"target".to_vec(),
            |_ctx: QueryContext| stream::pending::<QueryEvent>().boxed(),
            QueryOptions::default(),
        )
        .collect()
        .await;

    assert_eq!(
        events,
        vec![QueryEvent::QueryError {
            from: test_peer(LOCAL),
            error: QueryError::Network(NetworkError::Timeout),
        }]
    );
}

#[tokio::test]
async fn test_dropping_stream_cancels_in_flight_queries() {
    let manager = manager_with(&[test_peer(1)]).await;
    let tokens = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&tokens);

    let events = manager.run(
        b"target".to_vec(),
        move |ctx: QueryContext| {
            seen.lock().push(ctx.cancel.clone());
            stream::pending::<QueryEvent>().boxed()
        },
        QueryOptions::default(),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(events);

    let token = tokens.lock().first().cloned().unwrap();
    tokio::time::timeout(Duration::from_secs(1), token.cancelled())
        .await
        .unwrap();
}

#[test]
fn test_state_never_admits_local_or_queried_peers() {
    let local = test_peer(LOCAL);
    let mut state = QueryState::new(local, KadId::from_key(b"target"), 5);

    assert!(!state.offer(PeerInfo::bare(local)));
    assert!(state.offer(PeerInfo::bare(test_peer(1))));

    let batch = state.next_batch(3);
    assert_eq!(batch.len(), 1);
    assert!(state.was_queried(&test_peer(1)));
    assert!(!state.offer(PeerInfo::bare(test_peer(1))));
    assert!(state.next_batch(3).is_empty());
}

#[test]
fn test_state_batches_nearest_first() {
    let origin = KadId::from_key(b"target");
    let mut state = QueryState::new(test_peer(LOCAL), origin, 10);
    for i in 1..=6 {
        state.offer(PeerInfo::bare(test_peer(i)));
    }

    let first = state.next_batch(3);
    let second = state.next_batch(3);
    let worst_first = first
        .iter()
        .map(|p| p.id.kad_id().distance(&origin))
        .max()
        .unwrap();
    let best_second = second
        .iter()
        .map(|p| p.id.kad_id().distance(&origin))
        .min()
        .unwrap();
    assert!(worst_first < best_second);
}

proptest! {
    #[test]
    fn prop_batches_never_repeat_a_peer(
        seeds in prop::collection::vec(any::<[u8; 32]>(), 0..40),
        alpha in 1usize..4,
    ) {
        let mut state = QueryState::new(PeerId::new([0; 32]), KadId::from_key(b"target"), 20);
        let mut seen = HashSet::new();

        for (i, seed) in seeds.iter().enumerate() {
            state.offer(PeerInfo::bare(PeerId::new(*seed)));
            if i % 3 == 0 {
                for peer in state.next_batch(alpha) {
                    prop_assert!(seen.insert(peer.id));
                }
            }
        }
        loop {
            let batch = state.next_batch(alpha);
            if batch.is_empty() {
                break;
            }
            prop_assert!(batch.len() <= alpha);
            for peer in batch {
                prop_assert!(seen.insert(peer.id));
            }
        }
    }
}
