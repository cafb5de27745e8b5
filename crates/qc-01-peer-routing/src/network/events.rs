//! Progress events yielded by network operations.

use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::domain::{PeerId, PeerInfo, QueryError, Record};
use crate::protocol::MessageType;

/// Capacity of the channel behind every [`QueryStream`].
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One step of a network operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEvent {
    /// About to open a connection to `peer`
    DialPeer { peer: PeerId },
    /// About to write a request to `to`
    SendQuery { to: PeerId, message_type: MessageType },
    /// A peer answered. Empty fields for fire-and-forget sends.
    PeerResponse {
        from: PeerId,
        message_type: MessageType,
        closer: Vec<PeerInfo>,
        providers: Vec<PeerInfo>,
        record: Option<Record>,
    },
    /// Operation against `from` failed. `from` is the local peer for
    /// query-wide failures such as a timeout.
    QueryError { from: PeerId, error: QueryError },
    /// Definitive answer to a peer lookup
    FinalPeer { from: PeerId, peer: PeerInfo },
    /// Definitive answer to a value lookup
    Value { from: PeerId, value: Vec<u8> },
}

impl QueryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DialPeer { .. } => "DIAL_PEER",
            Self::SendQuery { .. } => "SEND_QUERY",
            Self::PeerResponse { .. } => "PEER_RESPONSE",
            Self::QueryError { .. } => "QUERY_ERROR",
            Self::FinalPeer { .. } => "FINAL_PEER",
            Self::Value { .. } => "VALUE",
        }
    }

    /// True for events that answer the query outright.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::FinalPeer { .. } | Self::Value { .. })
    }
}

/// Finite, non-restartable sequence of query events.
///
/// Backed by a bounded channel. Dropping it stops the producing task.
pub type QueryStream = BoxStream<'static, QueryEvent>;

/// Producer half of a [`QueryStream`].
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<QueryEvent>,
}

impl EventSender {
    /// Deliver an event. Returns `false` once the consumer is gone.
    pub async fn emit(&self, event: QueryEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Resolves when the consumer drops its stream.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Create a connected sender and stream pair.
pub fn event_channel() -> (EventSender, QueryStream) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    (EventSender { tx }, Box::pin(ReceiverStream::new(rx)))
}

/// A stream that yields nothing.
pub fn empty_stream() -> QueryStream {
    Box::pin(futures::stream::empty())
}
