//! Source address extraction from raw network-layer payloads.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Shortest payload considered; covers the IPv6 source field and rejects
/// truncated IPv4 headers.
pub const MIN_PAYLOAD_LEN: usize = 24;

const IPV4_SRC_OFFSET: usize = 12;
const IPV6_SRC_OFFSET: usize = 8;

/// Returns the source address of an IPv4 or IPv6 packet.
///
/// Only the version nibble is inspected; `None` for short payloads and any
/// other version.
pub fn extract_source(payload: &[u8]) -> Option<IpAddr> {
    if payload.len() < MIN_PAYLOAD_LEN {
        return None;
    }
    match payload[0] >> 4 {
        4 => {
            let octets: [u8; 4] = payload[IPV4_SRC_OFFSET..IPV4_SRC_OFFSET + 4]
                .try_into()
                .ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        6 => {
            let octets: [u8; 16] = payload[IPV6_SRC_OFFSET..IPV6_SRC_OFFSET + 16]
                .try_into()
                .ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}
