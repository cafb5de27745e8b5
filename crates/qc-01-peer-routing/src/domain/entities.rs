//! Core Domain Entities for Peer Routing

use std::fmt;
use std::hash::Hash;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{Distance, ProtocolError, ValidationError};

/// 256-bit peer identity: SHA-256 of the node's public key.
///
/// # Security (Timing Attack Prevention)
///
/// Comparison is constant-time. Standard `PartialEq` for byte arrays
/// short-circuits on the first difference, which leaks identity prefixes
/// through timing.
// The manual PartialEq compares the same bytes that Hash consumes, so equal
// identities always hash equally.
#[allow(clippy::derived_hash_with_manual_eq)]
#[derive(Clone, Copy, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PartialEq for PeerId {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        let mut result = 0u8;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            result |= a ^ b;
        }
        result == 0
    }
}

impl Eq for PeerId {}

impl PeerId {
    /// Length of the canonical byte form.
    pub const LEN: usize = 32;

    /// Create a PeerId from raw 32-byte array.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive the identity bound to a public key.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self(Sha256::digest(public_key).into())
    }

    /// Parse the canonical byte form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        let raw: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ValidationError::MalformedPeerId { len: bytes.len() })?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Distance key used for XOR comparisons.
    pub fn kad_id(&self) -> KadId {
        KadId::from_key(&self.0)
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({}..)", hex::encode(&self.0[..6]))
    }
}

impl FromStr for PeerId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| ValidationError::MalformedPeerId { len: s.len() / 2 })?;
        Self::from_bytes(&bytes)
    }
}

/// 256-bit distance key: SHA-256 of a peer id or of an arbitrary lookup key.
///
/// Only ever used for XOR comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KadId([u8; 32]);

impl KadId {
    /// Hash an arbitrary key into the distance space.
    pub fn from_key(key: &[u8]) -> Self {
        Self(Sha256::digest(key).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// XOR distance to another key.
    pub fn distance(&self, other: &KadId) -> Distance {
        crate::domain::xor_distance(self, other)
    }
}

impl From<[u8; 32]> for KadId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Host component of a network address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Host {
    Ip(IpAddr),
    Dns(String),
}

impl Host {
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Host::Ip(ip) => Some(*ip),
            Host::Dns(_) => None,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(IpAddr::V4(v4)) => write!(f, "/ip4/{}", v4),
            Host::Ip(IpAddr::V6(v6)) => write!(f, "/ip6/{}", v6),
            Host::Dns(name) => write!(f, "/dns/{}", name),
        }
    }
}

/// Transport protocol an address is reachable over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    Tcp,
    Udp,
    Quic,
    Ws,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::Quic => "quic",
            Transport::Ws => "ws",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "tcp" => Some(Transport::Tcp),
            "udp" => Some(Transport::Udp),
            "quic" => Some(Transport::Quic),
            "ws" => Some(Transport::Ws),
            _ => None,
        }
    }
}

/// Self-describing network locator.
///
/// Text form: `/ip4/1.2.3.4/tcp/4001` with an optional `/p2p/<hex peer id>`
/// suffix. The canonical byte form is the UTF-8 text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub host: Host,
    pub transport: Transport,
    pub port: u16,
    pub peer: Option<PeerId>,
}

impl NetworkAddress {
    pub fn new(host: Host, transport: Transport, port: u16) -> Self {
        Self {
            host,
            transport,
            port,
            peer: None,
        }
    }

    /// TCP address for a socket address, without a peer component.
    pub fn tcp(addr: std::net::SocketAddr) -> Self {
        Self::new(Host::Ip(addr.ip()), Transport::Tcp, addr.port())
    }

    /// Same address with the `/p2p` component set.
    #[must_use]
    pub fn with_peer(mut self, peer: PeerId) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Same address with the `/p2p` component removed.
    #[must_use]
    pub fn without_peer(&self) -> Self {
        Self {
            peer: None,
            ..self.clone()
        }
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.host.ip()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ProtocolError::InvalidAddress("address is not utf-8".into()))?;
        text.parse()
    }

    /// Socket address for IP hosts.
    pub fn socket_addr(&self) -> Option<std::net::SocketAddr> {
        self.ip().map(|ip| std::net::SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.host, self.transport.as_str(), self.port)?;
        if let Some(peer) = &self.peer {
            write!(f, "/p2p/{}", peer)?;
        }
        Ok(())
    }
}

impl FromStr for NetworkAddress {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidAddress(s.to_string());
        let mut parts = s.strip_prefix('/').ok_or_else(invalid)?.split('/');

        let host = match (parts.next(), parts.next()) {
            (Some("ip4"), Some(v)) => Host::Ip(IpAddr::V4(v.parse().map_err(|_| invalid())?)),
            (Some("ip6"), Some(v)) => Host::Ip(IpAddr::V6(v.parse().map_err(|_| invalid())?)),
            (Some("dns"), Some(v)) if !v.is_empty() => Host::Dns(v.to_string()),
            _ => return Err(invalid()),
        };

        let transport = parts.next().and_then(Transport::parse).ok_or_else(invalid)?;
        let port = parts
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(invalid)?;

        let peer = match (parts.next(), parts.next()) {
            (None, _) => None,
            (Some("p2p"), Some(id)) => Some(id.parse::<PeerId>().map_err(|_| invalid())?),
            _ => return Err(invalid()),
        };

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            host,
            transport,
            port,
            peer,
        })
    }
}

/// A peer identity together with its known addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addrs: Vec<NetworkAddress>,
}

impl PeerInfo {
    pub fn new(id: PeerId, addrs: Vec<NetworkAddress>) -> Self {
        Self { id, addrs }
    }

    /// Identity with no known addresses.
    pub fn bare(id: PeerId) -> Self {
        Self::new(id, Vec::new())
    }
}

/// A value stored in the DHT under a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Unix seconds at which the record was received. Set by the storing node.
    pub time_received: Option<u64>,
}

impl Record {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            time_received: None,
        }
    }

    /// Key under which a peer publishes its public key.
    pub fn public_key_key(peer: &PeerId) -> Vec<u8> {
        let mut key = b"/pk/".to_vec();
        key.extend_from_slice(peer.as_bytes());
        key
    }
}

/// Unix timestamp in seconds
///
/// # Security (Timestamp Bounds)
///
/// Timestamps are clamped to a reasonable maximum so a hostile value cannot
/// corrupt least-recently-seen ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Maximum reasonable timestamp (year 9999).
    pub const MAX_REASONABLE: u64 = 253_402_300_799;

    /// Create a new timestamp, clamping to MAX_REASONABLE.
    pub fn new(secs: u64) -> Self {
        Self(secs.min(Self::MAX_REASONABLE))
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Add seconds to timestamp (saturating at MAX_REASONABLE).
    pub fn add_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs).min(Self::MAX_REASONABLE))
    }
}
