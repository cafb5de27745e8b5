//! Domain Errors for Peer Routing and Reachability
//!
//! Nothing here is fatal to a running service. Every error degrades to
//! "this candidate peer or address did not help" and is surfaced to callers
//! as an event or a declined response.

use thiserror::Error;

/// Wire-level failures: malformed frames and unexpected messages.
///
/// Always answered with a declined response, never fatal to the service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame length prefix exceeds the configured maximum
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
    /// Message body could not be decoded
    #[error("could not decode message: {0}")]
    Decode(String),
    /// Message could not be encoded
    #[error("could not encode message: {0}")]
    Encode(String),
    /// Peer answered with a different message type than the one requested
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: &'static str,
    },
    /// Address bytes or text are not a valid network address
    #[error("invalid network address: {0}")]
    InvalidAddress(String),
}

/// Local validation failures for identities and records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Peer id bytes are not a 32-byte identity
    #[error("bad peer id: expected 32 bytes, got {len}")]
    MalformedPeerId { len: usize },
    /// Claimed identity differs from the authenticated remote identity
    #[error("peer id mismatch")]
    PeerIdMismatch,
    /// Record failed format or signature checks
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// Public key does not hash to the claimed peer id
    #[error("public key does not match id")]
    PublicKeyMismatch,
}

/// Transport failures. Retried by moving to the next candidate where one exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("dial failed: {0}")]
    DialFailed(String),
    #[error("stream error: {0}")]
    Stream(String),
    /// Connection landed on a different address than the one dialed
    #[error("unexpected remote address: dialed {expected}, connected to {actual}")]
    UnexpectedRemoteAddress { expected: String, actual: String },
    #[error("protocol {0} is not supported by the remote peer")]
    UnsupportedProtocol(String),
    #[error("operation timed out")]
    Timeout,
    #[error("operation cancelled")]
    Cancelled,
    #[error("stream closed before a response was received")]
    Closed,
    #[error("i/o error: {0}")]
    Io(String),
    #[error("transport is not started")]
    NotStarted,
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Error carried by a query error event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    /// Peer or value absent after an exhaustive search. A normal outcome.
    #[error("not found")]
    NotFound,
}

impl QueryError {
    /// True when the query ended because of a deadline or caller cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Network(NetworkError::Cancelled) | Self::Network(NetworkError::Timeout)
        )
    }
}

/// Errors raised by the framing codec.
///
/// Kept separate from [`ProtocolError`] because I/O errors are not `Clone`.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CodecError> for QueryError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Protocol(e) => Self::Protocol(e),
            CodecError::Io(e) => Self::Network(e.into()),
        }
    }
}

/// Routing table mutation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingTableError {
    /// The local identity never enters its own table
    #[error("cannot add local peer to routing table")]
    SelfInsertion,
    /// No eviction challenge is pending for the given peer
    #[error("no pending eviction for peer {0}")]
    NoPendingEviction(String),
}
