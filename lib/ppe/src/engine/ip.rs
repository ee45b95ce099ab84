// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Raw IPv4, IPv6, TCP and UDP headers.
//!
//! These are views over frame bytes and never copies; the parser
//! reads them and the keepalive path rewrites them in place.

use ppe_api::Ipv4Addr;
use ppe_api::Ipv6Addr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::network_endian::U16;
use zerocopy::byteorder::network_endian::U32;

pub const IPV4_HDR_SZ: usize = core::mem::size_of::<Ipv4HdrRaw>();
pub const IPV6_HDR_SZ: usize = core::mem::size_of::<Ipv6HdrRaw>();
pub const TCP_HDR_SZ: usize = core::mem::size_of::<TcpHdrRaw>();
pub const UDP_HDR_SZ: usize = core::mem::size_of::<UdpHdrRaw>();

pub const IPV4_VERSION: u8 = 4;
pub const IPV6_VERSION: u8 = 6;

/// More-fragments flag.
pub const IPV4_MF: u16 = 0x2000;
pub const IPV4_FRAG_OFFSET_MASK: u16 = 0x1FFF;

// Byte offsets of the checksum fields within each header.
pub const IPV4_CSUM_OFF: usize = 10;
pub const IPV4_SRC_OFF: usize = 12;
pub const IPV4_DST_OFF: usize = 16;
pub const TCP_CSUM_OFF: usize = 16;
pub const UDP_CSUM_OFF: usize = 6;

/// Note: For now we keep this unaligned to be safe.
#[repr(C)]
#[derive(Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct Ipv4HdrRaw {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: U16,
    pub ident: U16,
    pub frag_and_flags: U16,
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl Ipv4HdrRaw {
    pub fn version(&self) -> u8 {
        self.ver_hdr_len >> 4
    }

    /// The header length in bytes, options included.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.ver_hdr_len & 0x0F) * 4
    }

    /// Is this any piece of a fragmented datagram, the first one
    /// included?
    pub fn is_fragment(&self) -> bool {
        self.frag_and_flags.get() & (IPV4_MF | IPV4_FRAG_OFFSET_MASK) != 0
    }

    /// The three flag bits, as the hardware tunnel header wants them.
    pub fn flags(&self) -> u8 {
        (self.frag_and_flags.get() >> 13) as u8
    }

    pub fn src_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src)
    }

    pub fn dst_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst)
    }

    /// The header checksum in host order.
    pub fn csum_host(&self) -> u16 {
        u16::from_be_bytes(self.csum)
    }
}

#[repr(C)]
#[derive(Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct Ipv6HdrRaw {
    pub vtc_flow: [u8; 4],
    pub payload_len: U16,
    pub next_hdr: u8,
    pub hop_limit: u8,
    pub src: [u8; 16],
    pub dst: [u8; 16],
}

impl Ipv6HdrRaw {
    pub fn version(&self) -> u8 {
        self.vtc_flow[0] >> 4
    }

    /// The upper nibble of the traffic class.
    pub fn priority(&self) -> u8 {
        self.vtc_flow[0] & 0x0F
    }

    /// The low nibble of the traffic class followed by the 20-bit
    /// flow label, as three bytes.
    pub fn flow_lbl(&self) -> [u8; 3] {
        [self.vtc_flow[1], self.vtc_flow[2], self.vtc_flow[3]]
    }

    pub fn traffic_class(&self) -> u8 {
        (self.priority() << 4) | (self.vtc_flow[1] >> 4)
    }

    pub fn src_ip(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.src)
    }

    pub fn dst_ip(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.dst)
    }
}

#[repr(C)]
#[derive(Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct TcpHdrRaw {
    pub src_port: U16,
    pub dst_port: U16,
    pub seq: U32,
    pub ack: U32,
    pub offset: u8,
    pub flags: u8,
    pub window: U16,
    pub csum: [u8; 2],
    pub urg: U16,
}

#[repr(C)]
#[derive(Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct UdpHdrRaw {
    pub src_port: U16,
    pub dst_port: U16,
    pub length: U16,
    pub csum: [u8; 2],
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_sizes() {
        assert_eq!(IPV4_HDR_SZ, 20);
        assert_eq!(IPV6_HDR_SZ, 40);
        assert_eq!(TCP_HDR_SZ, 20);
        assert_eq!(UDP_HDR_SZ, 8);
    }

    #[test]
    fn fragment_bits() {
        let mut bytes = [0u8; 20];
        bytes[0] = 0x45;

        // DF alone is not a fragment.
        bytes[6] = 0x40;
        let (ip, _) = Ipv4HdrRaw::ref_from_prefix(&bytes[..]).unwrap();
        assert!(!ip.is_fragment());
        assert_eq!(ip.hdr_len(), 20);
        assert_eq!(ip.flags(), 0b010);

        // MF on the first fragment.
        bytes[6] = 0x20;
        let (ip, _) = Ipv4HdrRaw::ref_from_prefix(&bytes[..]).unwrap();
        assert!(ip.is_fragment());

        // A non-zero offset on the last fragment.
        bytes[6] = 0x00;
        bytes[7] = 0xB9;
        let (ip, _) = Ipv4HdrRaw::ref_from_prefix(&bytes[..]).unwrap();
        assert!(ip.is_fragment());
    }

    #[test]
    fn ipv6_traffic_class() {
        let mut bytes = [0u8; 40];
        // Version 6, traffic class 0xB8, flow label 0x12345.
        bytes[0..4].copy_from_slice(&[0x6B, 0x81, 0x23, 0x45]);
        let (ip6, _) = Ipv6HdrRaw::ref_from_prefix(&bytes[..]).unwrap();
        assert_eq!(ip6.version(), 6);
        assert_eq!(ip6.priority(), 0xB);
        assert_eq!(ip6.traffic_class(), 0xB8);
        assert_eq!(ip6.flow_lbl(), [0x81, 0x23, 0x45]);
    }
}
