//! Address classification: public ranges and network segments.
//!
//! SECURITY-CRITICAL: decides which addresses may be dialed on behalf of a
//! remote requester and which verifiers count as independent.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::domain::{Host, NetworkAddress};

/// Coarse grouping of an address used to diversify verification sources.
///
/// The first octet of an IPv4 address or the first 16-bit group of an
/// IPv6 address. DNS hosts form a segment per name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetworkSegment {
    V4(u8),
    V6(u16),
    Name(String),
}

/// Segment an address belongs to.
pub fn network_segment(addr: &NetworkAddress) -> NetworkSegment {
    match &addr.host {
        Host::Ip(IpAddr::V4(v4)) => NetworkSegment::V4(v4.octets()[0]),
        Host::Ip(IpAddr::V6(v6)) => NetworkSegment::V6(v6.segments()[0]),
        Host::Dns(name) => NetworkSegment::Name(name.to_ascii_lowercase()),
    }
}

/// True when the address is routable on the public internet.
///
/// DNS names are treated as public; their resolution is not our concern.
pub fn is_public_address(addr: &NetworkAddress) -> bool {
    match &addr.host {
        Host::Ip(ip) => is_public_ip(ip),
        Host::Dns(name) => !name.eq_ignore_ascii_case("localhost"),
    }
}

/// True unless the IP is private, loopback, link-local, unspecified,
/// multicast, documentation or otherwise reserved.
pub fn is_public_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(&v4),
            None => is_public_v6(v6),
        },
    }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    let shared_cgnat = a == 100 && (64..128).contains(&b);
    let benchmarking = a == 198 && (b == 18 || b == 19);
    let ietf_protocol = a == 192 && b == 0 && c == 0;
    let reserved = a >= 240;

    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || shared_cgnat
        || benchmarking
        || ietf_protocol
        || reserved)
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    let documentation = first == 0x2001 && ip.segments()[1] == 0x0db8;

    !(ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || unique_local
        || link_local
        || documentation)
}
