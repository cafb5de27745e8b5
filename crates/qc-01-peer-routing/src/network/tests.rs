//! Tests for the network transport

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::domain::{
    NetworkError, OverlayConfig, PeerId, PeerInfo, ProtocolError, QueryError, DEFAULT_MAX_FRAME_SIZE,
};
use crate::ports::{Connection, Registrar, StreamHandle, StreamHandler, StreamLimits};
use crate::protocol::{encode_peers, framed, MessageType, RoutingMessage};
use crate::test_utils::{test_addr, test_peer, MemoryNetwork};

type Reply = fn(RoutingMessage) -> Option<RoutingMessage>;

struct Responder {
    reply: Reply,
    seen: mpsc::UnboundedSender<RoutingMessage>,
}

#[async_trait]
impl StreamHandler for Responder {
    async fn handle_stream(&self, stream: StreamHandle, _connection: Arc<dyn Connection>) {
        let mut framed = framed::<RoutingMessage>(stream, DEFAULT_MAX_FRAME_SIZE);
        if let Some(Ok(message)) = framed.next().await {
            let _ = self.seen.send(message.clone());
            if let Some(reply) = (self.reply)(message) {
                let _ = framed.send(reply).await;
            }
        }
        let _ = framed.close().await;
    }
}

struct Silent;

#[async_trait]
impl StreamHandler for Silent {
    async fn handle_stream(&self, stream: StreamHandle, _connection: Arc<dyn Connection>) {
        let _held = stream;
        std::future::pending::<()>().await;
    }
}

fn closer_peer() -> PeerInfo {
    PeerInfo::new(test_peer(9), vec![test_addr(90, 4001)])
}

fn answer_with_closer(message: RoutingMessage) -> Option<RoutingMessage> {
    Some(RoutingMessage::FindNode {
        key: message.key().to_vec(),
        closer: encode_peers(&[closer_peer()]),
    })
}

fn no_reply(_message: RoutingMessage) -> Option<RoutingMessage> {
    None
}

fn answer_wrong_type(message: RoutingMessage) -> Option<RoutingMessage> {
    Some(RoutingMessage::get_value(message.key().to_vec()))
}

fn limits() -> StreamLimits {
    StreamLimits {
        max_inbound_streams: 8,
        max_outbound_streams: 8,
    }
}

struct Setup {
    network: Arc<MemoryNetwork>,
    transport: Arc<NetworkTransport>,
    remote: PeerId,
    seen: mpsc::UnboundedReceiver<RoutingMessage>,
}

fn setup(reply: Option<Reply>) -> Setup {
    let config = OverlayConfig::for_testing();
    let network = MemoryNetwork::new();
    let (local, remote) = (test_peer(1), test_peer(2));
    network.add_node(local, vec![test_addr(20, 4001)]);
    network.add_node(remote, vec![test_addr(30, 4001)]);

    let (tx, seen) = mpsc::unbounded_channel();
    let registrar = network.registrar(remote);
    match reply {
        Some(reply) => registrar.handle(&config.routing_protocol(), Arc::new(Responder { reply, seen: tx }), limits()),
        None => registrar.handle(&config.routing_protocol(), Arc::new(Silent), limits()),
    }
    .unwrap();

    let manager = network.connection_manager(local, test_addr(20, 4001));
    let transport = Arc::new(NetworkTransport::new(local, manager, &config));
    transport.start();

    Setup {
        network,
        transport,
        remote,
        seen,
    }
}

#[tokio::test]
async fn test_request_yields_dial_send_and_response() {
    let setup = setup(Some(answer_with_closer));
    let mut discovered = setup.transport.subscribe_discovered();

    let events: Vec<_> = setup
        .transport
        .send_request(setup.remote, RoutingMessage::find_node(b"k".to_vec()), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], QueryEvent::DialPeer { peer: setup.remote });
    assert_eq!(
        events[1],
        QueryEvent::SendQuery {
            to: setup.remote,
            message_type: MessageType::FindNode
        }
    );
    match &events[2] {
        QueryEvent::PeerResponse { from, closer, record, .. } => {
            assert_eq!(from, &setup.remote);
            assert_eq!(closer, &vec![closer_peer()]);
            assert!(record.is_none());
        }
        other => panic!("expected response, got {other:?}"),
    }

    assert_eq!(discovered.recv().await.unwrap(), closer_peer());
    assert_eq!(setup.network.aborted_streams(), 0);
}

#[tokio::test]
async fn test_unreachable_peer_yields_dial_error() {
    let setup = setup(Some(answer_with_closer));
    setup.network.set_unreachable(&setup.remote, true);

    let events: Vec<_> = setup
        .transport
        .send_request(setup.remote, RoutingMessage::find_node(b"k".to_vec()), CancellationToken::new())
        .collect()
        .await;

    assert!(matches!(
        events.last(),
        Some(QueryEvent::QueryError {
            error: QueryError::Network(NetworkError::DialFailed(_)),
            ..
        })
    ));
}

#[tokio::test]
async fn test_wrong_response_type_aborts_stream() {
    let setup = setup(Some(answer_wrong_type));

    let events: Vec<_> = setup
        .transport
        .send_request(setup.remote, RoutingMessage::find_node(b"k".to_vec()), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(
        events.last(),
        Some(&QueryEvent::QueryError {
            from: setup.remote,
            error: QueryError::Protocol(ProtocolError::UnexpectedMessage {
                expected: "FIND_NODE",
                actual: "GET_VALUE",
            }),
        })
    );
    assert_eq!(setup.network.aborted_streams(), 1);
}

#[tokio::test]
async fn test_send_message_does_not_wait_for_reply() {
    let mut setup = setup(Some(no_reply));
    let record = crate::domain::Record::new(b"key".to_vec(), b"value".to_vec());

    let events: Vec<_> = setup
        .transport
        .send_message(setup.remote, RoutingMessage::put_value(record.clone()), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(
        events.last(),
        Some(&QueryEvent::PeerResponse {
            from: setup.remote,
            message_type: MessageType::PutValue,
            closer: vec![],
            providers: vec![],
            record: None,
        })
    );
    let received = setup.seen.recv().await.unwrap();
    assert_eq!(received.record(), Some(&record));
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_times_out() {
    let setup = setup(None);

    let events: Vec<_> = setup
        .transport
        .send_request(setup.remote, RoutingMessage::find_node(b"k".to_vec()), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(
        events.last(),
        Some(&QueryEvent::QueryError {
            from: setup.remote,
            error: NetworkError::Timeout.into(),
        })
    );
}

#[tokio::test]
async fn test_cancelled_request_yields_cancelled() {
    let setup = setup(Some(answer_with_closer));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let events: Vec<_> = setup
        .transport
        .send_request(setup.remote, RoutingMessage::find_node(b"k".to_vec()), cancel)
        .collect()
        .await;

    match events.last() {
        Some(QueryEvent::QueryError { error, .. }) => assert!(error.is_cancellation()),
        other => panic!("expected cancellation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stopped_transport_yields_nothing() {
    let setup = setup(Some(answer_with_closer));
    setup.transport.stop();
    assert!(!setup.transport.is_started());

    let events: Vec<_> = setup
        .transport
        .send_request(setup.remote, RoutingMessage::find_node(b"k".to_vec()), CancellationToken::new())
        .collect()
        .await;

    assert!(events.is_empty());
    assert!(setup.network.dialed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_aborts_exchange_in_flight() {
    let setup = setup(None);

    let mut events = setup
        .transport
        .send_request(setup.remote, RoutingMessage::find_node(b"k".to_vec()), CancellationToken::new());
    assert!(matches!(events.next().await, Some(QueryEvent::DialPeer { .. })));
    assert!(matches!(events.next().await, Some(QueryEvent::SendQuery { .. })));
    // Let the request reach the silent peer
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(setup.network.aborted_streams(), 0);

    setup.transport.stop();

    match events.next().await {
        Some(QueryEvent::QueryError { error, .. }) => assert!(error.is_cancellation()),
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(setup.network.aborted_streams(), 1);
}
