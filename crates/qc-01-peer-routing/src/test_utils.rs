//! Test utilities for peer routing and reachability.
//!
//! An in-memory network implementing every connection-level port over
//! `tokio::io::duplex` pipes, plus fixed collaborators for deterministic tests.
//! Enable with the `test-utils` feature flag.
//!
//! # Example
//!
//! ```rust
//! use qc_01_peer_routing::test_utils::FixedTimeSource;
//! use qc_01_peer_routing::TimeSource;
//!
//! let time_source = FixedTimeSource::new(1000);
//! assert_eq!(time_source.now().as_secs(), 1000);
//! ```

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

use crate::adapters::{DefaultRecordValidator, MemoryPeerStore, MemoryRecordStore};
use crate::domain::{
    NetworkAddress, NetworkError, OverlayConfig, PeerId, PeerInfo, Record, Timestamp, Transport,
};
use crate::network::NetworkTransport;
use crate::ports::{
    Connection, ConnectionManager, DialTarget, LivenessChecker, PeerStore, ProtocolStream,
    RandomWalk, RecordStore, RecordValidator, Registrar, StreamHandle, StreamHandler,
    StreamLimits, TimeSource,
};
use crate::service::{KadRoutingTable, PeerRoutingService, RoutingRpcHandler};

const DUPLEX_BUFFER: usize = 64 * 1024;

/// A time source that returns a settable timestamp.
#[derive(Debug, Default)]
pub struct FixedTimeSource {
    timestamp: AtomicU64,
}

impl FixedTimeSource {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp: AtomicU64::new(timestamp),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.timestamp.fetch_add(secs, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.timestamp.load(Ordering::SeqCst))
    }
}

/// Liveness checker with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedLiveness(pub bool);

#[async_trait]
impl LivenessChecker for FixedLiveness {
    async fn is_alive(&self, _peer: &PeerId) -> bool {
        self.0
    }
}

/// Random walk over a fixed list of peers, in order.
#[derive(Debug, Clone, Default)]
pub struct StaticRandomWalk {
    peers: Vec<PeerInfo>,
}

impl StaticRandomWalk {
    pub fn new(peers: Vec<PeerInfo>) -> Self {
        Self { peers }
    }
}

impl RandomWalk for StaticRandomWalk {
    fn walk(&self) -> BoxStream<'static, PeerInfo> {
        stream::iter(self.peers.clone()).boxed()
    }
}

#[derive(Default)]
struct MemoryNode {
    addrs: Vec<NetworkAddress>,
    handlers: HashMap<String, (Arc<dyn StreamHandler>, StreamLimits)>,
    unreachable: bool,
}

#[derive(Default)]
struct NetworkState {
    nodes: HashMap<PeerId, MemoryNode>,
    redirects: HashMap<NetworkAddress, NetworkAddress>,
    dialed: Vec<(PeerId, DialTarget)>,
}

/// Shared in-memory network. Nodes are reachable by id or by any of their
/// addresses.
#[derive(Default)]
pub struct MemoryNetwork {
    state: Mutex<NetworkState>,
    aborted_streams: AtomicUsize,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_node(&self, peer: PeerId, addrs: Vec<NetworkAddress>) {
        self.state.lock().nodes.entry(peer).or_default().addrs = addrs;
    }

    /// Dials to this node fail.
    pub fn set_unreachable(&self, peer: &PeerId, unreachable: bool) {
        if let Some(node) = self.state.lock().nodes.get_mut(peer) {
            node.unreachable = unreachable;
        }
    }

    /// Dialing `from` lands on the node owning `to`.
    pub fn redirect(&self, from: NetworkAddress, to: NetworkAddress) {
        self.state.lock().redirects.insert(from, to);
    }

    /// Every dial made so far, as `(dialer, target)`.
    pub fn dialed(&self) -> Vec<(PeerId, DialTarget)> {
        self.state.lock().dialed.clone()
    }

    pub fn dials_by(&self, dialer: &PeerId) -> usize {
        self.state
            .lock()
            .dialed
            .iter()
            .filter(|(d, _)| d == dialer)
            .count()
    }

    pub fn aborted_streams(&self) -> usize {
        self.aborted_streams.load(Ordering::SeqCst)
    }

    pub fn stream_limits(&self, peer: &PeerId, protocol: &str) -> Option<StreamLimits> {
        self.state
            .lock()
            .nodes
            .get(peer)
            .and_then(|n| n.handlers.get(protocol))
            .map(|(_, limits)| *limits)
    }

    pub fn connection_manager(
        self: &Arc<Self>,
        local_peer: PeerId,
        local_addr: NetworkAddress,
    ) -> Arc<MemoryConnectionManager> {
        Arc::new(MemoryConnectionManager {
            network: Arc::clone(self),
            local_peer,
            local_addr,
        })
    }

    pub fn registrar(self: &Arc<Self>, peer: PeerId) -> Arc<MemoryRegistrar> {
        Arc::new(MemoryRegistrar {
            network: Arc::clone(self),
            peer,
        })
    }

    fn resolve(&self, dialer: PeerId, target: &DialTarget) -> Result<(PeerId, NetworkAddress), NetworkError> {
        let mut state = self.state.lock();
        state.dialed.push((dialer, target.clone()));

        let (peer, addr) = match target {
            DialTarget::Peer(peer) => {
                let node = state
                    .nodes
                    .get(peer)
                    .ok_or_else(|| NetworkError::DialFailed(format!("unknown peer {peer}")))?;
                let addr = node
                    .addrs
                    .first()
                    .cloned()
                    .ok_or_else(|| NetworkError::DialFailed(format!("no address for {peer}")))?;
                (*peer, addr)
            }
            DialTarget::Address(addr) => {
                let wanted = addr.without_peer();
                let landed = state.redirects.get(&wanted).cloned().unwrap_or(wanted);
                let peer = state
                    .nodes
                    .iter()
                    .find(|(_, node)| node.addrs.contains(&landed))
                    .map(|(id, _)| *id)
                    .ok_or_else(|| NetworkError::DialFailed(format!("nothing listening on {landed}")))?;
                (peer, landed)
            }
        };

        match state.nodes.get(&peer) {
            Some(node) if !node.unreachable => Ok((peer, addr)),
            _ => Err(NetworkError::DialFailed(format!("{peer} is unreachable"))),
        }
    }

    fn handler(&self, peer: &PeerId, protocol: &str) -> Option<Arc<dyn StreamHandler>> {
        self.state
            .lock()
            .nodes
            .get(peer)
            .and_then(|n| n.handlers.get(protocol))
            .map(|(handler, _)| Arc::clone(handler))
    }
}

/// Connection manager for one node of a [`MemoryNetwork`].
pub struct MemoryConnectionManager {
    network: Arc<MemoryNetwork>,
    local_peer: PeerId,
    local_addr: NetworkAddress,
}

#[async_trait]
impl ConnectionManager for MemoryConnectionManager {
    async fn open_connection(&self, target: DialTarget) -> Result<Arc<dyn Connection>, NetworkError> {
        let (remote_peer, remote_addr) = self.network.resolve(self.local_peer, &target)?;
        Ok(Arc::new(MemoryConnection {
            network: Arc::clone(&self.network),
            local_peer: self.local_peer,
            local_addr: self.local_addr.clone(),
            remote_peer,
            remote_addr,
        }))
    }

    fn can_dial(&self, addr: &NetworkAddress) -> bool {
        addr.transport == Transport::Tcp
    }
}

/// One side of an in-memory connection.
pub struct MemoryConnection {
    network: Arc<MemoryNetwork>,
    local_peer: PeerId,
    local_addr: NetworkAddress,
    remote_peer: PeerId,
    remote_addr: NetworkAddress,
}

impl MemoryConnection {
    /// Inbound connection as seen by `local_peer` from `remote_peer`.
    pub fn inbound(
        network: &Arc<MemoryNetwork>,
        local_peer: PeerId,
        remote_peer: PeerId,
        remote_addr: NetworkAddress,
    ) -> Self {
        Self {
            network: Arc::clone(network),
            local_peer,
            local_addr: remote_addr.clone(),
            remote_peer,
            remote_addr,
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn remote_peer(&self) -> PeerId {
        self.remote_peer
    }

    fn remote_addr(&self) -> NetworkAddress {
        self.remote_addr.clone()
    }

    async fn new_stream(&self, protocol: &str) -> Result<StreamHandle, NetworkError> {
        let handler = self
            .network
            .handler(&self.remote_peer, protocol)
            .ok_or_else(|| NetworkError::UnsupportedProtocol(protocol.to_string()))?;

        let (local, remote) = tokio::io::duplex(DUPLEX_BUFFER);
        let server_side = MemoryStream::new(remote, protocol, &self.network);
        let server_conn: Arc<dyn Connection> = Arc::new(MemoryConnection {
            network: Arc::clone(&self.network),
            local_peer: self.remote_peer,
            local_addr: self.remote_addr.clone(),
            remote_peer: self.local_peer,
            remote_addr: self.local_addr.clone(),
        });
        tokio::spawn(async move {
            handler.handle_stream(Box::new(server_side), server_conn).await;
        });

        Ok(Box::new(MemoryStream::new(local, protocol, &self.network)))
    }

    async fn close(&self) {}
}

/// In-memory protocol stream. Aborting drops the pipe so the peer sees EOF.
pub struct MemoryStream {
    inner: Option<DuplexStream>,
    protocol: String,
    network: Arc<MemoryNetwork>,
}

impl MemoryStream {
    pub fn new(inner: DuplexStream, protocol: &str, network: &Arc<MemoryNetwork>) -> Self {
        Self {
            inner: Some(inner),
            protocol: protocol.to_string(),
            network: Arc::clone(network),
        }
    }

    fn pipe(&mut self) -> io::Result<Pin<&mut DuplexStream>> {
        self.inner
            .as_mut()
            .map(Pin::new)
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stream aborted"))
    }
}

impl ProtocolStream for MemoryStream {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn abort(&mut self, _reason: &str) {
        if self.inner.take().is_some() {
            self.network.aborted_streams.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().pipe() {
            Ok(pipe) => pipe.poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().pipe() {
            Ok(pipe) => pipe.poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().pipe() {
            Ok(pipe) => pipe.poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().pipe() {
            Ok(pipe) => pipe.poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

/// Registrar for one node of a [`MemoryNetwork`].
pub struct MemoryRegistrar {
    network: Arc<MemoryNetwork>,
    peer: PeerId,
}

impl Registrar for MemoryRegistrar {
    fn handle(
        &self,
        protocol: &str,
        handler: Arc<dyn StreamHandler>,
        limits: StreamLimits,
    ) -> Result<(), NetworkError> {
        self.network
            .state
            .lock()
            .nodes
            .entry(self.peer)
            .or_default()
            .handlers
            .insert(protocol.to_string(), (handler, limits));
        Ok(())
    }

    fn unhandle(&self, protocol: &str) {
        if let Some(node) = self.network.state.lock().nodes.get_mut(&self.peer) {
            node.handlers.remove(protocol);
        }
    }
}

/// A fully wired routing node on a [`MemoryNetwork`].
pub struct TestNode {
    pub peer: PeerId,
    pub addr: NetworkAddress,
    pub routing: Arc<KadRoutingTable>,
    pub transport: Arc<NetworkTransport>,
    pub service: Arc<PeerRoutingService>,
    pub peer_store: Arc<MemoryPeerStore>,
    pub records: Arc<MemoryRecordStore>,
}

impl TestNode {
    /// Join `network` as `peer` listening on `addr`, serving the routing protocol.
    pub fn new(network: &Arc<MemoryNetwork>, peer: PeerId, addr: NetworkAddress, config: &OverlayConfig) -> Self {
        network.add_node(peer, vec![addr.clone()]);
        let time_source: Arc<dyn TimeSource> = Arc::new(FixedTimeSource::new(1_700_000_000));
        let routing = Arc::new(KadRoutingTable::new(
            peer,
            &config.kademlia,
            Arc::new(FixedLiveness(true)),
            Arc::clone(&time_source),
        ));
        let transport = Arc::new(NetworkTransport::new(
            peer,
            network.connection_manager(peer, addr.clone()),
            config,
        ));
        transport.start();

        let peer_store = Arc::new(MemoryPeerStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let validator: Arc<dyn RecordValidator> = Arc::new(DefaultRecordValidator);
        let service = Arc::new(PeerRoutingService::new(
            Arc::clone(&routing),
            Arc::clone(&transport),
            peer_store.clone(),
            Arc::clone(&validator),
            config.kademlia.clone(),
        ));
        let handler = RoutingRpcHandler::new(
            Arc::clone(&service),
            peer_store.clone(),
            records.clone(),
            validator,
            time_source,
            config.max_frame_size,
            config.reachability.timeout(),
        );
        let limits = StreamLimits {
            max_inbound_streams: config.reachability.max_inbound_streams,
            max_outbound_streams: config.reachability.max_outbound_streams,
        };
        // The in-memory registrar never refuses a protocol.
        let _ = network
            .registrar(peer)
            .handle(&config.routing_protocol(), Arc::new(handler), limits);

        Self {
            peer,
            addr,
            routing,
            transport,
            service,
            peer_store,
            records,
        }
    }

    /// A node whose id is derived from `public_key`, publishing it under `/pk/`.
    pub fn with_public_key(
        network: &Arc<MemoryNetwork>,
        public_key: &[u8],
        addr: NetworkAddress,
        config: &OverlayConfig,
    ) -> Self {
        let node = Self::new(network, PeerId::from_public_key(public_key), addr, config);
        node.records.put(Record {
            key: Record::public_key_key(&node.peer),
            value: public_key.to_vec(),
            time_received: Some(1_700_000_000),
        });
        node
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo::new(self.peer, vec![self.addr.clone()])
    }

    /// Put `other` in this node's peer store and routing table.
    pub async fn learn(&self, other: &TestNode) {
        self.peer_store.merge(&other.info());
        let _ = self.routing.add(other.peer).await;
    }
}

/// Deterministic peer id for tests.
pub fn test_peer(seed: u8) -> PeerId {
    PeerId::new([seed; 32])
}

/// Public TCP address for tests, one `/8` segment per `octet`.
pub fn test_addr(octet: u8, port: u16) -> NetworkAddress {
    format!("/ip4/{octet}.1.2.3/tcp/{port}")
        .parse()
        .unwrap_or_else(|_| NetworkAddress::tcp(([127, 0, 0, 1], port).into()))
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    struct Echo;

    #[async_trait]
    impl StreamHandler for Echo {
        async fn handle_stream(&self, mut stream: StreamHandle, _connection: Arc<dyn Connection>) {
            let mut buf = [0u8; 4];
            if stream.read_exact(&mut buf).await.is_ok() {
                let _ = stream.write_all(&buf).await;
            }
        }
    }

    #[test]
    fn test_fixed_time_source_advances() {
        let source = FixedTimeSource::new(1000);
        source.advance(5);
        assert_eq!(source.now().as_secs(), 1005);
    }

    #[tokio::test]
    async fn test_stream_reaches_registered_handler() {
        let network = MemoryNetwork::new();
        let (a, b) = (test_peer(1), test_peer(2));
        network.add_node(a, vec![test_addr(10, 1)]);
        network.add_node(b, vec![test_addr(20, 1)]);
        let limits = StreamLimits {
            max_inbound_streams: 1,
            max_outbound_streams: 1,
        };
        network.registrar(b).handle("/echo", Arc::new(Echo), limits).unwrap();

        let manager = network.connection_manager(a, test_addr(10, 1));
        let connection = manager.open_connection(DialTarget::Peer(b)).await.unwrap();
        let mut stream = connection.new_stream("/echo").await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();

        assert_eq!(&buf, b"ping");
        assert_eq!(network.stream_limits(&b, "/echo"), Some(limits));
    }

    #[tokio::test]
    async fn test_redirect_reports_landed_address() {
        let network = MemoryNetwork::new();
        let (a, b) = (test_peer(1), test_peer(2));
        network.add_node(b, vec![test_addr(20, 1)]);
        network.redirect(test_addr(30, 1), test_addr(20, 1));

        let manager = network.connection_manager(a, test_addr(10, 1));
        let connection = manager
            .open_connection(DialTarget::Address(test_addr(30, 1)))
            .await
            .unwrap();

        assert_eq!(connection.remote_peer(), b);
        assert_eq!(connection.remote_addr(), test_addr(20, 1));
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_dial() {
        let network = MemoryNetwork::new();
        let b = test_peer(2);
        network.add_node(b, vec![test_addr(20, 1)]);
        network.set_unreachable(&b, true);

        let manager = network.connection_manager(test_peer(1), test_addr(10, 1));
        let result = manager.open_connection(DialTarget::Peer(b)).await;
        assert!(matches!(result, Err(NetworkError::DialFailed(_))));
        assert_eq!(network.dials_by(&test_peer(1)), 1);
    }
}
