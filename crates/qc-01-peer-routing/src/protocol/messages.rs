//! Wire message schemas.
//!
//! Each message type is its own enum variant carrying only the fields that
//! are meaningful for it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::domain::{NetworkAddress, PeerId, PeerInfo, ProtocolError, Record};

/// Peer identity and addresses in canonical byte form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePeer {
    pub id: Vec<u8>,
    pub addrs: Vec<Vec<u8>>,
}

impl From<&PeerInfo> for WirePeer {
    fn from(peer: &PeerInfo) -> Self {
        Self {
            id: peer.id.to_bytes(),
            addrs: peer.addrs.iter().map(NetworkAddress::to_bytes).collect(),
        }
    }
}

impl WirePeer {
    /// Decode into a [`PeerInfo`].
    ///
    /// A malformed id fails the whole peer. Malformed addresses are skipped.
    pub fn to_peer_info(&self) -> Result<PeerInfo, ProtocolError> {
        let id = PeerId::from_bytes(&self.id).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        let addrs = self
            .addrs
            .iter()
            .filter_map(|bytes| match NetworkAddress::from_bytes(bytes) {
                Ok(addr) => Some(addr),
                Err(e) => {
                    trace!(peer = %id, error = %e, "skipping undecodable address");
                    None
                }
            })
            .collect();
        Ok(PeerInfo::new(id, addrs))
    }
}

/// Decode a list of wire peers, dropping any with a malformed id.
pub fn decode_peers(peers: &[WirePeer]) -> Vec<PeerInfo> {
    peers.iter().filter_map(|p| p.to_peer_info().ok()).collect()
}

pub fn encode_peers(peers: &[PeerInfo]) -> Vec<WirePeer> {
    peers.iter().map(WirePeer::from).collect()
}

/// Discriminant of a [`RoutingMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    FindNode,
    GetValue,
    PutValue,
    AddProvider,
    GetProviders,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::FindNode => "FIND_NODE",
            MessageType::GetValue => "GET_VALUE",
            MessageType::PutValue => "PUT_VALUE",
            MessageType::AddProvider => "ADD_PROVIDER",
            MessageType::GetProviders => "GET_PROVIDERS",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing protocol message. Requests and responses share the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingMessage {
    FindNode {
        key: Vec<u8>,
        closer: Vec<WirePeer>,
    },
    GetValue {
        key: Vec<u8>,
        record: Option<Record>,
        closer: Vec<WirePeer>,
    },
    PutValue {
        key: Vec<u8>,
        record: Record,
    },
    AddProvider {
        key: Vec<u8>,
        providers: Vec<WirePeer>,
    },
    GetProviders {
        key: Vec<u8>,
        closer: Vec<WirePeer>,
        providers: Vec<WirePeer>,
    },
}

impl RoutingMessage {
    pub fn find_node(key: impl Into<Vec<u8>>) -> Self {
        Self::FindNode {
            key: key.into(),
            closer: Vec::new(),
        }
    }

    pub fn get_value(key: impl Into<Vec<u8>>) -> Self {
        Self::GetValue {
            key: key.into(),
            record: None,
            closer: Vec::new(),
        }
    }

    pub fn put_value(record: Record) -> Self {
        Self::PutValue {
            key: record.key.clone(),
            record,
        }
    }

    pub fn get_providers(key: impl Into<Vec<u8>>) -> Self {
        Self::GetProviders {
            key: key.into(),
            closer: Vec::new(),
            providers: Vec::new(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::FindNode { .. } => MessageType::FindNode,
            Self::GetValue { .. } => MessageType::GetValue,
            Self::PutValue { .. } => MessageType::PutValue,
            Self::AddProvider { .. } => MessageType::AddProvider,
            Self::GetProviders { .. } => MessageType::GetProviders,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Self::FindNode { key, .. }
            | Self::GetValue { key, .. }
            | Self::PutValue { key, .. }
            | Self::AddProvider { key, .. }
            | Self::GetProviders { key, .. } => key.as_slice(),
        }
    }

    pub fn closer(&self) -> &[WirePeer] {
        match self {
            Self::FindNode { closer, .. }
            | Self::GetValue { closer, .. }
            | Self::GetProviders { closer, .. } => closer.as_slice(),
            Self::PutValue { .. } | Self::AddProvider { .. } => &[],
        }
    }

    pub fn providers(&self) -> &[WirePeer] {
        match self {
            Self::AddProvider { providers, .. } | Self::GetProviders { providers, .. } => {
                providers.as_slice()
            }
            _ => &[],
        }
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::GetValue { record, .. } => record.as_ref(),
            Self::PutValue { record, .. } => Some(record),
            _ => None,
        }
    }
}

/// Outcome of a dial-back attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialResponseStatus {
    Ok,
    BadRequest,
    DialError,
    DialRefused,
}

impl fmt::Display for DialResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::BadRequest => "E_BAD_REQUEST",
            Self::DialError => "E_DIAL_ERROR",
            Self::DialRefused => "E_DIAL_REFUSED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialResponse {
    pub status: DialResponseStatus,
    pub status_text: String,
    /// Address the verifier dialed, canonical byte form
    pub addr: Option<Vec<u8>>,
}

impl DialResponse {
    pub fn ok(addr: &NetworkAddress) -> Self {
        Self {
            status: DialResponseStatus::Ok,
            status_text: "OK".into(),
            addr: Some(addr.to_bytes()),
        }
    }

    pub fn bad_request(text: impl Into<String>) -> Self {
        Self {
            status: DialResponseStatus::BadRequest,
            status_text: text.into(),
            addr: None,
        }
    }

    pub fn dial_refused(text: impl Into<String>) -> Self {
        Self {
            status: DialResponseStatus::DialRefused,
            status_text: text.into(),
            addr: None,
        }
    }

    pub fn dial_error(text: impl Into<String>, addr: Option<&NetworkAddress>) -> Self {
        Self {
            status: DialResponseStatus::DialError,
            status_text: text.into(),
            addr: addr.map(NetworkAddress::to_bytes),
        }
    }
}

/// Reachability protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReachabilityMessage {
    /// Ask the remote to dial us back on the listed addresses
    Dial { peer: WirePeer },
    DialResponse(DialResponse),
}

impl ReachabilityMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dial { .. } => "DIAL",
            Self::DialResponse(_) => "DIAL_RESPONSE",
        }
    }
}
