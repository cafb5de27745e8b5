//! Abort-on-drop wrapper for exchange streams.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::trace;

use crate::ports::{ProtocolStream, StreamHandle};

/// A protocol stream that is aborted if dropped before it was shut down or
/// aborted.
///
/// Exchanges cut short by a deadline or cancellation drop their future
/// mid-read. Without this the remote end would only see a clean close.
pub struct AbortOnDrop {
    inner: StreamHandle,
    settled: bool,
}

impl AbortOnDrop {
    pub fn new(inner: StreamHandle) -> Self {
        Self {
            inner,
            settled: false,
        }
    }

    pub fn abort(&mut self, reason: &str) {
        self.settled = true;
        self.inner.abort(reason);
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if !self.settled {
            trace!(protocol = %self.inner.protocol(), "[qc-01] Stream dropped mid-exchange");
            self.inner.abort("dropped mid-exchange");
        }
    }
}

impl ProtocolStream for AbortOnDrop {
    fn protocol(&self) -> &str {
        self.inner.protocol()
    }

    fn abort(&mut self, reason: &str) {
        AbortOnDrop::abort(self, reason);
    }
}

impl AsyncRead for AbortOnDrop {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for AbortOnDrop {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_shutdown(cx);
        if result.is_ready() {
            this.settled = true;
        }
        result
    }
}
