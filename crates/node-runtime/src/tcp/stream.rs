use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;
use tracing::trace;

use qc_01_peer_routing::ProtocolStream;

/// One negotiated protocol stream over its own TCP connection.
///
/// Holds the stream-limit permit for its protocol until dropped.
pub struct TcpStreamHandle {
    inner: Option<TcpStream>,
    protocol: String,
    _permit: Option<OwnedSemaphorePermit>,
}

impl TcpStreamHandle {
    pub(super) fn new(inner: TcpStream, protocol: &str, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            inner: Some(inner),
            protocol: protocol.to_string(),
            _permit: permit,
        }
    }

    fn socket(&mut self) -> io::Result<Pin<&mut TcpStream>> {
        self.inner
            .as_mut()
            .map(Pin::new)
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stream aborted"))
    }
}

impl ProtocolStream for TcpStreamHandle {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn abort(&mut self, reason: &str) {
        if let Some(socket) = self.inner.take() {
            // Zero linger turns the close into a reset
            let _ = socket.set_linger(Some(Duration::ZERO));
            trace!(protocol = %self.protocol, reason, "[qc-01] Stream aborted");
        }
    }
}

impl AsyncRead for TcpStreamHandle {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().socket() {
            Ok(socket) => socket.poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for TcpStreamHandle {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().socket() {
            Ok(socket) => socket.poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().socket() {
            Ok(socket) => socket.poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().socket() {
            Ok(socket) => socket.poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}
