//! Just enough link/network/transport parsing to evaluate capture filters.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Capture link types (LINKTYPE_* values) the dissector knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Null,
    Ethernet,
    Raw,
    Loop,
    LinuxSll,
    LinuxSll2,
    Ipv4,
    Ipv6,
    Other(u32),
}

impl LinkType {
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => LinkType::Null,
            1 => LinkType::Ethernet,
            12 | 14 | 101 => LinkType::Raw,
            108 => LinkType::Loop,
            113 => LinkType::LinuxSll,
            276 => LinkType::LinuxSll2,
            228 => LinkType::Ipv4,
            229 => LinkType::Ipv6,
            other => LinkType::Other(other),
        }
    }
}

/// Well-known EtherTypes.
mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const IPV6: u16 = 0x86DD;
    pub const VLAN: u16 = 0x8100;
    pub const QINQ: u16 = 0x88A8;
    pub const QINQ_OLD: u16 = 0x9100;
}

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const SLL_HEADER_LEN: usize = 16;
const SLL2_HEADER_LEN: usize = 20;
const NULL_HEADER_LEN: usize = 4;
const IPV6_HEADER_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Addresses and ports pulled out of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dissected {
    pub src: Option<IpAddr>,
    pub dst: Option<IpAddr>,
    pub transport: Option<Transport>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

impl Dissected {
    pub fn is_ipv4(&self) -> bool {
        matches!(self.src, Some(IpAddr::V4(_)))
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self.src, Some(IpAddr::V6(_)))
    }
}

/// Parse a frame of the given link type. Anything unrecognised yields an
/// empty [`Dissected`], which no address or port primitive matches.
pub fn dissect(link_type: LinkType, data: &[u8]) -> Dissected {
    let network = match link_type {
        LinkType::Ethernet => ethernet(data),
        LinkType::LinuxSll => sll(data),
        LinkType::LinuxSll2 => sll2(data),
        LinkType::Null | LinkType::Loop => null(data),
        LinkType::Raw => raw(data),
        LinkType::Ipv4 => Some((ethertype::IPV4, data)),
        LinkType::Ipv6 => Some((ethertype::IPV6, data)),
        LinkType::Other(_) => None,
    };

    match network {
        Some((ethertype::IPV4, payload)) => ipv4(payload),
        Some((ethertype::IPV6, payload)) => ipv6(payload),
        _ => Dissected::default(),
    }
}

fn be16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn ethernet(data: &[u8]) -> Option<(u16, &[u8])> {
    let mut offset = ETHERNET_HEADER_LEN - 2;
    let mut ether_type = be16(data, offset)?;
    while matches!(
        ether_type,
        ethertype::VLAN | ethertype::QINQ | ethertype::QINQ_OLD
    ) {
        offset += VLAN_TAG_LEN;
        ether_type = be16(data, offset)?;
    }
    Some((ether_type, data.get(offset + 2..)?))
}

fn sll(data: &[u8]) -> Option<(u16, &[u8])> {
    Some((be16(data, 14)?, data.get(SLL_HEADER_LEN..)?))
}

fn sll2(data: &[u8]) -> Option<(u16, &[u8])> {
    Some((be16(data, 0)?, data.get(SLL2_HEADER_LEN..)?))
}

/// BSD loopback: a 4-byte address family in host byte order (NULL) or
/// network byte order (LOOP). Both orders are accepted.
fn null(data: &[u8]) -> Option<(u16, &[u8])> {
    let family = data.get(..NULL_HEADER_LEN)?;
    let le = u32::from_le_bytes([family[0], family[1], family[2], family[3]]);
    let be = u32::from_be_bytes([family[0], family[1], family[2], family[3]]);
    let payload = &data[NULL_HEADER_LEN..];
    // AF_INET is 2 everywhere; AF_INET6 is 24, 28 or 30 depending on the OS.
    for value in [le, be] {
        match value {
            2 => return Some((ethertype::IPV4, payload)),
            24 | 28 | 30 => return Some((ethertype::IPV6, payload)),
            _ => {}
        }
    }
    None
}

fn raw(data: &[u8]) -> Option<(u16, &[u8])> {
    match data.first()? >> 4 {
        4 => Some((ethertype::IPV4, data)),
        6 => Some((ethertype::IPV6, data)),
        _ => None,
    }
}

fn ipv4(data: &[u8]) -> Dissected {
    if data.len() < 20 || data[0] >> 4 != 4 {
        return Dissected::default();
    }
    let header_len = usize::from(data[0] & 0x0F) * 4;
    let protocol = data[9];
    let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let dst = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
    let fragment_offset = be16(data, 6).unwrap_or(0) & 0x1FFF;

    let mut out = Dissected {
        src: Some(IpAddr::V4(src)),
        dst: Some(IpAddr::V4(dst)),
        ..Dissected::default()
    };
    // Non-first fragments carry no transport header.
    if fragment_offset == 0 {
        if let Some(payload) = data.get(header_len..) {
            transport(&mut out, protocol, payload);
        }
    }
    out
}

fn ipv6(data: &[u8]) -> Dissected {
    if data.len() < IPV6_HEADER_LEN || data[0] >> 4 != 6 {
        return Dissected::default();
    }
    let addr = |at: usize| {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&data[at..at + 16]);
        IpAddr::V6(Ipv6Addr::from(octets))
    };
    let mut out = Dissected {
        src: Some(addr(8)),
        dst: Some(addr(24)),
        ..Dissected::default()
    };

    let mut next_header = data[6];
    let mut offset = IPV6_HEADER_LEN;
    loop {
        match next_header {
            // hop-by-hop, routing, destination options
            0 | 43 | 60 => {
                let Some(ext) = data.get(offset..offset + 2) else {
                    return out;
                };
                next_header = ext[0];
                offset += (usize::from(ext[1]) + 1) * 8;
            }
            44 => {
                let Some(frag) = data.get(offset..offset + 8) else {
                    return out;
                };
                if be16(frag, 2).unwrap_or(0) & 0xFFF8 != 0 {
                    return out;
                }
                next_header = frag[0];
                offset += 8;
            }
            protocol => {
                if let Some(payload) = data.get(offset..) {
                    transport(&mut out, protocol, payload);
                }
                return out;
            }
        }
    }
}

fn transport(out: &mut Dissected, protocol: u8, payload: &[u8]) {
    out.transport = match protocol {
        IPPROTO_UDP => Some(Transport::Udp),
        IPPROTO_TCP => Some(Transport::Tcp),
        _ => return,
    };
    out.src_port = be16(payload, 0);
    out.dst_port = be16(payload, 2);
}
