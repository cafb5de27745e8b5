//! One logical exchange with one peer over a fresh protocol stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::domain::{NetworkError, OverlayConfig, PeerId, PeerInfo, ProtocolError, QueryError};
use crate::ports::{ConnectionManager, DialTarget};
use crate::protocol::{decode_peers, framed, FramedStream, RoutingMessage};

use super::adaptive_timeout::{AdaptiveTimeout, TimeoutSignal};
use super::events::{empty_stream, event_channel, EventSender, QueryEvent, QueryStream};

/// Capacity of the discovered-peer broadcast channel.
const DISCOVERED_CHANNEL_CAPACITY: usize = 256;

/// Request/response and fire-and-forget exchanges on the routing protocol.
///
/// Every peer named in a successful response is re-broadcast on the
/// discovered channel so the routing table can learn from it.
pub struct NetworkTransport {
    local_peer: PeerId,
    connections: Arc<dyn ConnectionManager>,
    protocol: String,
    max_frame_size: usize,
    timeout: AdaptiveTimeout,
    discovered: broadcast::Sender<PeerInfo>,
    running: AtomicBool,
    shutdown: Mutex<CancellationToken>,
}

impl NetworkTransport {
    pub fn new(
        local_peer: PeerId,
        connections: Arc<dyn ConnectionManager>,
        config: &OverlayConfig,
    ) -> Self {
        let (discovered, _) = broadcast::channel(DISCOVERED_CHANNEL_CAPACITY);
        Self {
            local_peer,
            connections,
            protocol: config.routing_protocol(),
            max_frame_size: config.max_frame_size,
            timeout: AdaptiveTimeout::new(config.timeout.clone()),
            discovered,
            running: AtomicBool::new(false),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.shutdown.lock() = CancellationToken::new();
        info!(protocol = %self.protocol, "[qc-01] Network transport started");
    }

    /// Stop accepting new exchanges and cancel those in flight.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.lock().cancel();
        info!("[qc-01] Network transport stopped");
    }

    pub fn is_started(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn timeout(&self) -> &AdaptiveTimeout {
        &self.timeout
    }

    /// Peers learned from responses. Lagging receivers miss notifications.
    pub fn subscribe_discovered(&self) -> broadcast::Receiver<PeerInfo> {
        self.discovered.subscribe()
    }

    /// Send `message` to `to` and yield the response.
    ///
    /// Empty if the transport is stopped.
    pub fn send_request(
        self: &Arc<Self>,
        to: PeerId,
        message: RoutingMessage,
        cancel: CancellationToken,
    ) -> QueryStream {
        self.spawn_exchange(to, message, cancel, true)
    }

    /// Send `message` to `to` without waiting for an answer.
    pub fn send_message(
        self: &Arc<Self>,
        to: PeerId,
        message: RoutingMessage,
        cancel: CancellationToken,
    ) -> QueryStream {
        self.spawn_exchange(to, message, cancel, false)
    }

    fn spawn_exchange(
        self: &Arc<Self>,
        to: PeerId,
        message: RoutingMessage,
        cancel: CancellationToken,
        expect_response: bool,
    ) -> QueryStream {
        if !self.is_started() {
            debug!(peer = %to, "[qc-01] Transport stopped, dropping {}", message.message_type());
            return empty_stream();
        }

        let (events, stream) = event_channel();
        let transport = Arc::clone(self);
        let shutdown = self.shutdown.lock().clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = events.closed() => {
                    trace!(peer = %to, "[qc-01] Consumer dropped exchange");
                }
                _ = shutdown.cancelled() => {
                    events
                        .emit(QueryEvent::QueryError {
                            from: to,
                            error: NetworkError::Cancelled.into(),
                        })
                        .await;
                }
                _ = transport.run_exchange(&events, to, message, &cancel, expect_response) => {}
            }
        });

        stream
    }

    async fn run_exchange(
        &self,
        events: &EventSender,
        to: PeerId,
        message: RoutingMessage,
        cancel: &CancellationToken,
        expect_response: bool,
    ) {
        let message_type = message.message_type();
        if !events.emit(QueryEvent::DialPeer { peer: to }).await {
            return;
        }
        if !events
            .emit(QueryEvent::SendQuery { to, message_type })
            .await
        {
            return;
        }

        let signal = self.timeout.signal(cancel);
        let event = match self.exchange(&signal, to, message, expect_response).await {
            Ok(Some(response)) => {
                self.timeout.record_success(&signal);
                let closer = decode_peers(response.closer());
                let providers = decode_peers(response.providers());
                self.announce(closer.iter().chain(providers.iter()));
                QueryEvent::PeerResponse {
                    from: to,
                    message_type,
                    closer,
                    providers,
                    record: response.record().cloned(),
                }
            }
            Ok(None) => {
                self.timeout.record_success(&signal);
                QueryEvent::PeerResponse {
                    from: to,
                    message_type,
                    closer: Vec::new(),
                    providers: Vec::new(),
                    record: None,
                }
            }
            Err(error) => {
                if matches!(error, QueryError::Network(NetworkError::Timeout)) {
                    self.timeout.record_failure(&signal);
                }
                debug!(peer = %to, error = %error, "[qc-01] {} failed", message_type);
                QueryEvent::QueryError { from: to, error }
            }
        };

        events.emit(event).await;
    }

    async fn exchange(
        &self,
        signal: &TimeoutSignal,
        to: PeerId,
        message: RoutingMessage,
        expect_response: bool,
    ) -> Result<Option<RoutingMessage>, QueryError> {
        let connection = signal
            .guard(self.connections.open_connection(DialTarget::Peer(to)))
            .await??;
        let stream = signal.guard(connection.new_stream(&self.protocol)).await??;
        let mut framed = framed::<RoutingMessage>(stream, self.max_frame_size);

        let result = match signal
            .guard(write_and_read(&mut framed, message, expect_response))
            .await
        {
            Ok(inner) => inner,
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(_) => {
                if let Err(e) = framed.close().await {
                    trace!(peer = %to, error = %e, "[qc-01] Stream close failed");
                }
            }
            Err(e) => framed.get_mut().abort(&e.to_string()),
        }
        result
    }

    fn announce<'a>(&self, peers: impl Iterator<Item = &'a PeerInfo>) {
        for peer in peers {
            if peer.id == self.local_peer {
                continue;
            }
            // No subscribers is not an error.
            let _ = self.discovered.send(peer.clone());
        }
    }
}

async fn write_and_read(
    framed: &mut FramedStream<RoutingMessage>,
    message: RoutingMessage,
    expect_response: bool,
) -> Result<Option<RoutingMessage>, QueryError> {
    let expected = message.message_type();
    framed.send(message).await?;
    if !expect_response {
        return Ok(None);
    }

    match framed.next().await {
        Some(Ok(response)) if response.message_type() == expected => Ok(Some(response)),
        Some(Ok(response)) => Err(ProtocolError::UnexpectedMessage {
            expected: expected.as_str(),
            actual: response.message_type().as_str(),
        }
        .into()),
        Some(Err(e)) => Err(e.into()),
        None => Err(NetworkError::Closed.into()),
    }
}
