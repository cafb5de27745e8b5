use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use qc_01_peer_routing::{NetworkAddress, NetworkError, Registrar, StreamHandler, StreamLimits};

use super::connection::TcpConnection;
use super::handshake::{
    read_frame, write_frame, Ack, AckStatus, Hello, HANDSHAKE_TIMEOUT, IDENTIFY_PROTOCOL,
};
use super::stream::TcpStreamHandle;
use super::Endpoint;

struct Registration {
    handler: Arc<dyn StreamHandler>,
    inbound: Arc<Semaphore>,
    outbound: Arc<Semaphore>,
}

/// Protocol handlers with their stream limits.
///
/// Registering a protocol again replaces its handler and resets its limits.
#[derive(Default)]
pub struct TcpRegistrar {
    protocols: RwLock<HashMap<String, Registration>>,
}

impl TcpRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered protocol ids, sorted.
    pub fn protocols(&self) -> Vec<String> {
        let mut protocols: Vec<_> = self.protocols.read().keys().cloned().collect();
        protocols.sort();
        protocols
    }

    pub(super) fn outbound_slots(&self, protocol: &str) -> Option<Arc<Semaphore>> {
        self.protocols
            .read()
            .get(protocol)
            .map(|r| Arc::clone(&r.outbound))
    }

    fn inbound(&self, protocol: &str) -> Option<(Arc<dyn StreamHandler>, Arc<Semaphore>)> {
        self.protocols
            .read()
            .get(protocol)
            .map(|r| (Arc::clone(&r.handler), Arc::clone(&r.inbound)))
    }
}

impl Registrar for TcpRegistrar {
    fn handle(
        &self,
        protocol: &str,
        handler: Arc<dyn StreamHandler>,
        limits: StreamLimits,
    ) -> Result<(), NetworkError> {
        if protocol == IDENTIFY_PROTOCOL {
            return Err(NetworkError::Stream(format!("{protocol} is reserved")));
        }
        self.protocols.write().insert(
            protocol.to_string(),
            Registration {
                handler,
                inbound: Arc::new(Semaphore::new(limits.max_inbound_streams)),
                outbound: Arc::new(Semaphore::new(limits.max_outbound_streams)),
            },
        );
        debug!(protocol, ?limits, "[qc-01] Protocol handler registered");
        Ok(())
    }

    fn unhandle(&self, protocol: &str) {
        if self.protocols.write().remove(protocol).is_some() {
            debug!(protocol, "[qc-01] Protocol handler removed");
        }
    }
}

/// Accept connections on `listener` until `cancel` fires, handing each
/// negotiated stream to the handler registered for its protocol.
pub fn spawn_listener(
    listener: TcpListener,
    endpoint: Endpoint,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Ok(local) = listener.local_addr() {
            info!(addr = %local, peer = %endpoint.peer, "[qc-01] Listening");
        }
        loop {
            let (socket, remote) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "[qc-01] Accept failed");
                        continue;
                    }
                },
            };

            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                if let Err(e) = accept_stream(socket, remote, endpoint).await {
                    debug!(remote = %remote, error = %e, "[qc-01] Inbound handshake failed");
                }
            });
        }
        debug!("[qc-01] Listener stopped");
    })
}

async fn accept_stream(
    mut socket: TcpStream,
    remote: SocketAddr,
    endpoint: Endpoint,
) -> Result<(), NetworkError> {
    let hello: Hello = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(&mut socket))
        .await
        .map_err(|_| NetworkError::Timeout)??;
    socket.set_nodelay(true)?;

    let observed = NetworkAddress::tcp(SocketAddr::new(remote.ip(), hello.listen_port));
    let ack = |status| Ack {
        peer: endpoint.peer,
        observed: observed.clone(),
        status,
    };

    if hello.protocol == IDENTIFY_PROTOCOL {
        trace!(peer = %hello.peer, observed = %observed, "[qc-01] Identified");
        return write_frame(&mut socket, &ack(AckStatus::Accepted)).await;
    }

    let Some((handler, slots)) = endpoint.registrar.inbound(&hello.protocol) else {
        debug!(peer = %hello.peer, protocol = %hello.protocol, "[qc-01] Unsupported protocol");
        return write_frame(&mut socket, &ack(AckStatus::Unsupported)).await;
    };
    let Ok(permit) = slots.try_acquire_owned() else {
        debug!(peer = %hello.peer, protocol = %hello.protocol, "[qc-01] Inbound stream limit reached");
        return write_frame(&mut socket, &ack(AckStatus::LimitReached)).await;
    };
    write_frame(&mut socket, &ack(AckStatus::Accepted)).await?;

    let stream = TcpStreamHandle::new(socket, &hello.protocol, Some(permit));
    let connection = TcpConnection::inbound(endpoint, hello.peer, observed);
    handler.handle_stream(Box::new(stream), Arc::new(connection)).await;
    Ok(())
}
