use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use qc_01_peer_routing::{
    Connection, ConnectionManager, DialTarget, NetworkAddress, NetworkError, PeerId, PeerStore,
    StreamHandle, Transport,
};

use super::handshake::{
    read_frame, write_frame, Ack, AckStatus, Hello, HANDSHAKE_TIMEOUT, IDENTIFY_PROTOCOL,
};
use super::stream::TcpStreamHandle;
use super::Endpoint;

/// Dials peers by address, or by id through the peer store.
pub struct TcpConnectionManager {
    endpoint: Endpoint,
    peer_store: Arc<dyn PeerStore>,
}

impl TcpConnectionManager {
    pub fn new(endpoint: Endpoint, peer_store: Arc<dyn PeerStore>) -> Self {
        Self {
            endpoint,
            peer_store,
        }
    }

    /// Dial `addr` and identify the peer listening there.
    ///
    /// A `/p2p` component in `addr` must match the identity reported.
    pub async fn connect(&self, addr: &NetworkAddress) -> Result<TcpConnection, NetworkError> {
        let target = tcp_target(addr)?;
        let (_, ack) = handshake(&self.endpoint, target, IDENTIFY_PROTOCOL).await?;

        if let Some(expected) = addr.peer {
            if ack.peer != expected {
                return Err(NetworkError::DialFailed(format!(
                    "peer id mismatch at {target}: expected {expected}, got {}",
                    ack.peer
                )));
            }
        }

        trace!(peer = %ack.peer, addr = %target, "[qc-01] Connected");
        Ok(TcpConnection {
            endpoint: self.endpoint.clone(),
            remote_peer: ack.peer,
            remote_addr: NetworkAddress::tcp(target),
            observed: Some(ack.observed),
        })
    }
}

#[async_trait]
impl ConnectionManager for TcpConnectionManager {
    async fn open_connection(&self, target: DialTarget) -> Result<Arc<dyn Connection>, NetworkError> {
        let peer = match target {
            DialTarget::Address(addr) => {
                let connection = self.connect(&addr).await?;
                return Ok(Arc::new(connection));
            }
            DialTarget::Peer(peer) => peer,
        };

        let info = self
            .peer_store
            .get(&peer)
            .ok_or_else(|| NetworkError::DialFailed(format!("no known address for {peer}")))?;

        let mut last_error = NetworkError::DialFailed(format!("no dialable address for {peer}"));
        for addr in info.addrs.iter().filter(|addr| self.can_dial(addr)) {
            match self.connect(&addr.clone().with_peer(peer)).await {
                Ok(connection) => return Ok(Arc::new(connection)),
                Err(e) => {
                    debug!(peer = %peer, addr = %addr, error = %e, "[qc-01] Dial attempt failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    fn can_dial(&self, addr: &NetworkAddress) -> bool {
        tcp_target(addr).is_ok()
    }
}

/// A peer identity bound to the address it is reachable on.
pub struct TcpConnection {
    endpoint: Endpoint,
    remote_peer: PeerId,
    remote_addr: NetworkAddress,
    observed: Option<NetworkAddress>,
}

impl TcpConnection {
    /// Connection as seen by the listener: `remote_addr` is the dialer's
    /// source IP with its announced listen port.
    pub(super) fn inbound(endpoint: Endpoint, remote_peer: PeerId, remote_addr: NetworkAddress) -> Self {
        Self {
            endpoint,
            remote_peer,
            remote_addr,
            observed: None,
        }
    }

    /// Our own address as the remote peer saw it, for dialed connections.
    pub fn observed_addr(&self) -> Option<&NetworkAddress> {
        self.observed.as_ref()
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn remote_peer(&self) -> PeerId {
        self.remote_peer
    }

    fn remote_addr(&self) -> NetworkAddress {
        self.remote_addr.clone()
    }

    async fn new_stream(&self, protocol: &str) -> Result<StreamHandle, NetworkError> {
        let permit = match self.endpoint.registrar.outbound_slots(protocol) {
            Some(slots) => Some(slots.try_acquire_owned().map_err(|_| {
                NetworkError::Stream(format!("outbound stream limit reached for {protocol}"))
            })?),
            None => None,
        };

        let target = tcp_target(&self.remote_addr)?;
        let (socket, ack) = handshake(&self.endpoint, target, protocol).await?;
        if ack.peer != self.remote_peer {
            return Err(NetworkError::Stream(format!(
                "{target} now answers as {}, expected {}",
                ack.peer, self.remote_peer
            )));
        }

        Ok(Box::new(TcpStreamHandle::new(socket, protocol, permit)))
    }

    async fn close(&self) {
        // Streams own their sockets; nothing is held open between them.
        trace!(peer = %self.remote_peer, "[qc-01] Connection closed");
    }
}

fn tcp_target(addr: &NetworkAddress) -> Result<SocketAddr, NetworkError> {
    match addr.socket_addr() {
        Some(target) if addr.transport == Transport::Tcp => Ok(target),
        _ => Err(NetworkError::DialFailed(format!("cannot dial {addr} over tcp"))),
    }
}

/// Open a TCP connection to `target` and negotiate `protocol` on it.
async fn handshake(
    endpoint: &Endpoint,
    target: SocketAddr,
    protocol: &str,
) -> Result<(TcpStream, Ack), NetworkError> {
    let exchange = async {
        let mut socket = TcpStream::connect(target)
            .await
            .map_err(|e| NetworkError::DialFailed(format!("{target}: {e}")))?;
        socket.set_nodelay(true)?;

        let hello = Hello {
            protocol: protocol.to_string(),
            peer: endpoint.peer,
            listen_port: endpoint.listen_port,
        };
        write_frame(&mut socket, &hello).await?;
        let ack: Ack = read_frame(&mut socket).await?;
        Ok::<_, NetworkError>((socket, ack))
    };

    let (socket, ack) = tokio::time::timeout(HANDSHAKE_TIMEOUT, exchange)
        .await
        .map_err(|_| NetworkError::Timeout)??;

    match ack.status {
        AckStatus::Accepted => Ok((socket, ack)),
        AckStatus::Unsupported => Err(NetworkError::UnsupportedProtocol(protocol.to_string())),
        AckStatus::LimitReached => Err(NetworkError::Stream(format!(
            "inbound stream limit reached for {protocol}"
        ))),
    }
}
