//! Handshake frames exchanged before any protocol bytes.
//!
//! Frames are a u32 big-endian length followed by a bincode body, read
//! without buffering so nothing past the handshake is consumed.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use qc_01_peer_routing::{NetworkAddress, NetworkError, PeerId};

/// Protocol id of the identify exchange behind `open_connection`.
pub const IDENTIFY_PROTOCOL: &str = "/qc/identify/1.0.0";

pub(super) const MAX_HANDSHAKE_SIZE: usize = 4096;
pub(super) const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// First frame on every TCP connection, sent by the dialer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct Hello {
    pub protocol: String,
    pub peer: PeerId,
    /// Port the dialer accepts connections on
    pub listen_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(super) enum AckStatus {
    Accepted,
    Unsupported,
    LimitReached,
}

/// Listener's answer to a [`Hello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct Ack {
    pub peer: PeerId,
    /// Dialer's address as seen by the listener
    pub observed: NetworkAddress,
    pub status: AckStatus,
}

pub(super) async fn write_frame<T, W>(io: &mut W, message: &T) -> Result<(), NetworkError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let body = bincode::serialize(message)
        .map_err(|e| NetworkError::Stream(format!("handshake encode failed: {e}")))?;
    let len = u32::try_from(body.len())
        .map_err(|_| NetworkError::Stream("handshake frame too large".into()))?;
    io.write_u32(len).await?;
    io.write_all(&body).await?;
    io.flush().await?;
    Ok(())
}

pub(super) async fn read_frame<T, R>(io: &mut R) -> Result<T, NetworkError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let len = io.read_u32().await? as usize;
    if len > MAX_HANDSHAKE_SIZE {
        return Err(NetworkError::Stream(format!(
            "handshake frame of {len} bytes exceeds {MAX_HANDSHAKE_SIZE}"
        )));
    }
    let mut body = vec![0; len];
    io.read_exact(&mut body).await?;
    bincode::deserialize(&body)
        .map_err(|e| NetworkError::Stream(format!("handshake decode failed: {e}")))
}
