// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The header parser.
//!
//! Frames are decoded against one fixed grammar:
//!
//! ```text
//! Ethernet (802.1Q){0,3} (PPPoE session){0,1} (IPv4 | IPv6) L4
//! ```
//!
//! where L4 is TCP, UDP, or one of the two tunnel encapsulations the
//! engine can bind (IPv4 in IPv6 for DS-Lite, IPv6 in IPv4 for 6RD).
//! Any other upper-layer protocol is reported as such and left to the
//! binder to refuse.
//!
//! The encapsulation walk is a small loop over a bounded stack of
//! [`EncapStep`]s, one per tag consumed. Parsing is a pure function of
//! the frame bytes.
use super::ether::ETHER_HDR_SZ;
use super::ether::EtherHdrRaw;
use super::ether::EtherType;
use super::ether::PPP_IP;
use super::ether::PPP_IPV6;
use super::ether::PPPOE_HDR_SZ;
use super::ether::PppoeHdrRaw;
use super::ether::VLAN_HDR_SZ;
use super::ether::VLAN_VID_MASK;
use super::ether::VlanHdrRaw;
use super::ip::IPV4_HDR_SZ;
use super::ip::IPV4_VERSION;
use super::ip::IPV6_HDR_SZ;
use super::ip::IPV6_VERSION;
use super::ip::Ipv4HdrRaw;
use super::ip::Ipv6HdrRaw;
use super::ip::TcpHdrRaw;
use super::ip::UdpHdrRaw;
use core::fmt;
use ppe_api::Ipv4Addr;
use ppe_api::Ipv6Addr;
use ppe_api::MacAddr;
use ppe_api::PROTO_IPIP;
use ppe_api::PROTO_IPV6;
use ppe_api::PROTO_IPV6_FRAG;
use ppe_api::PROTO_TCP;
use ppe_api::PROTO_UDP;
use zerocopy::FromBytes;

/// The deepest VLAN stack the engine understands.
pub const MAX_VLAN_DEPTH: usize = 3;

/// VLAN tags plus at most one PPPoE session header.
pub const MAX_ENCAP_STEPS: usize = MAX_VLAN_DEPTH + 1;

pub type EncapSteps = heapless::Vec<EncapStep, MAX_ENCAP_STEPS>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The frame ends inside a header.
    Truncated,
    /// More VLAN tags, or more PPPoE headers, than the engine handles.
    TooDeep,
    /// The ethertype (or PPP protocol) after the tags is not IP.
    UnknownL3(u16),
    /// The IP version field disagrees with the ethertype.
    BadVersion(u8),
    /// Not a PPPoE version 1 session header.
    BadPppoe,
    /// Any piece of a fragmented datagram.
    Fragment,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated frame"),
            Self::TooDeep => write!(f, "encapsulation nested too deep"),
            Self::UnknownL3(et) => write!(f, "unsupported L3 0x{et:04X}"),
            Self::BadVersion(v) => write!(f, "bad IP version {v}"),
            Self::BadPppoe => write!(f, "bad PPPoE session header"),
            Self::Fragment => write!(f, "IP fragment"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncapKind {
    /// An 802.1Q tag, with its full TCI.
    Vlan { tci: u16 },
    PppoeSession { sid: u16 },
}

/// One encapsulation header consumed by the walk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EncapStep {
    pub kind: EncapKind,
    pub consumed: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ipv4Info {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub proto: u8,
    pub tos: u8,
    pub ttl: u8,
    /// Header checksum, host order.
    pub csum: u16,
    pub total_len: u16,
    /// The three flag bits.
    pub flags: u8,
    pub hdr_len: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ipv6Info {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub next_hdr: u8,
    pub traffic_class: u8,
    pub priority: u8,
    pub flow_lbl: [u8; 3],
    pub hop_limit: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum L3Info {
    Ipv4(Ipv4Info),
    Ipv6(Ipv6Info),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum L4Info {
    Tcp { sport: u16, dport: u16 },
    /// `csum` is as found on the wire; zero means the sender did not
    /// compute one.
    Udp { sport: u16, dport: u16, csum: u16 },
    /// IPv4 in IPv6 (DS-Lite). The inner header is not examined.
    Ipv4InIpv6,
    /// IPv6 in IPv4 (6RD). The inner header is not examined.
    Ipv6InIpv4,
    /// Any other protocol.
    Other(u8),
}

/// The normalized view of a frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlowTuple {
    pub dmac: MacAddr,
    pub smac: MacAddr,
    pub encap: EncapSteps,
    pub l3_off: usize,
    pub l3: L3Info,
    pub l4_off: usize,
    pub l4: L4Info,
}

impl FlowTuple {
    /// The TCIs of the VLAN tags, outermost first.
    pub fn vlans(&self) -> impl Iterator<Item = u16> + '_ {
        self.encap.iter().filter_map(|s| match s.kind {
            EncapKind::Vlan { tci } => Some(tci),
            _ => None,
        })
    }

    pub fn vlan_layer(&self) -> u8 {
        // Bounded by `MAX_VLAN_DEPTH`.
        self.vlans().count() as u8
    }

    /// The outer TCI, or zero when untagged.
    pub fn vlan1(&self) -> u16 {
        self.vlans().next().unwrap_or(0)
    }

    pub fn vlan2(&self) -> u16 {
        self.vlans().nth(1).unwrap_or(0)
    }

    pub fn outer_vid(&self) -> Option<u16> {
        self.vlans().next().map(|tci| tci & VLAN_VID_MASK)
    }

    pub fn pppoe_sid(&self) -> Option<u16> {
        self.encap.iter().find_map(|s| match s.kind {
            EncapKind::PppoeSession { sid } => Some(sid),
            _ => None,
        })
    }

    /// The DSCP/traffic-class byte the entry carries.
    pub fn dscp(&self) -> u8 {
        match &self.l3 {
            L3Info::Ipv4(ip) => ip.tos,
            L3Info::Ipv6(ip) => ip.traffic_class,
        }
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self.l3, L3Info::Ipv4(_))
    }
}

fn hdr<T: FromBytes + zerocopy::KnownLayout + zerocopy::Immutable>(
    bytes: &[u8],
    off: usize,
) -> Result<&T, ParseError> {
    let rest = bytes.get(off..).ok_or(ParseError::Truncated)?;
    T::ref_from_prefix(rest)
        .map(|(hdr, _)| hdr)
        .map_err(|_| ParseError::Truncated)
}

/// Walk the tags after the Ethernet header, returning the steps taken,
/// the L3 ethertype and its offset.
fn walk_encap(
    bytes: &[u8],
    mut etype: u16,
) -> Result<(EncapSteps, EtherType, usize), ParseError> {
    let mut steps = heapless::Vec::new();
    let mut off = ETHER_HDR_SZ;
    let mut vlans = 0;

    loop {
        let step = match EtherType::from(etype) {
            EtherType::Ipv4 | EtherType::Ipv6 => {
                return Ok((steps, EtherType::from(etype), off));
            }

            EtherType::Vlan => {
                if vlans == MAX_VLAN_DEPTH {
                    return Err(ParseError::TooDeep);
                }
                let vh = hdr::<VlanHdrRaw>(bytes, off)?;
                vlans += 1;
                etype = vh.inner_type.get();
                EncapStep {
                    kind: EncapKind::Vlan { tci: vh.tci.get() },
                    consumed: VLAN_HDR_SZ,
                }
            }

            EtherType::PppoeSession => {
                let seen = steps.iter().any(|s: &EncapStep| {
                    matches!(s.kind, EncapKind::PppoeSession { .. })
                });
                if seen {
                    return Err(ParseError::TooDeep);
                }

                let ph = hdr::<PppoeHdrRaw>(bytes, off)?;
                if !ph.is_v1() {
                    return Err(ParseError::BadPppoe);
                }
                etype = match ph.ppp_proto.get() {
                    PPP_IP => u16::from(EtherType::Ipv4),
                    PPP_IPV6 => u16::from(EtherType::Ipv6),
                    other => return Err(ParseError::UnknownL3(other)),
                };
                EncapStep {
                    kind: EncapKind::PppoeSession { sid: ph.sid.get() },
                    consumed: PPPOE_HDR_SZ,
                }
            }

            EtherType::Unknown(other) => {
                return Err(ParseError::UnknownL3(other));
            }
        };

        off += step.consumed;
        steps.push(step).map_err(|_| ParseError::TooDeep)?;
    }
}

fn parse_l4(bytes: &[u8], off: usize, proto: u8) -> Result<L4Info, ParseError> {
    let l4 = match proto {
        PROTO_TCP => {
            let tcp = hdr::<TcpHdrRaw>(bytes, off)?;
            L4Info::Tcp { sport: tcp.src_port.get(), dport: tcp.dst_port.get() }
        }

        PROTO_UDP => {
            let udp = hdr::<UdpHdrRaw>(bytes, off)?;
            L4Info::Udp {
                sport: udp.src_port.get(),
                dport: udp.dst_port.get(),
                csum: u16::from_be_bytes(udp.csum),
            }
        }

        other => L4Info::Other(other),
    };

    Ok(l4)
}

/// Decode `bytes`, which start at the Ethernet header.
pub fn parse(bytes: &[u8]) -> Result<FlowTuple, ParseError> {
    let eth = hdr::<EtherHdrRaw>(bytes, 0)?;
    let (encap, l3_type, l3_off) = walk_encap(bytes, eth.ether_type.get())?;

    let (l3, l4_off, l4) = match l3_type {
        EtherType::Ipv4 => {
            let ip = hdr::<Ipv4HdrRaw>(bytes, l3_off)?;
            if ip.version() != IPV4_VERSION {
                return Err(ParseError::BadVersion(ip.version()));
            }
            if ip.hdr_len() < IPV4_HDR_SZ {
                return Err(ParseError::Truncated);
            }
            if ip.is_fragment() {
                return Err(ParseError::Fragment);
            }

            let l4_off = l3_off + ip.hdr_len();
            let l4 = match ip.proto {
                PROTO_IPV6 => L4Info::Ipv6InIpv4,
                proto => parse_l4(bytes, l4_off, proto)?,
            };
            let info = Ipv4Info {
                src: ip.src_ip(),
                dst: ip.dst_ip(),
                proto: ip.proto,
                tos: ip.dscp_ecn,
                ttl: ip.ttl,
                csum: ip.csum_host(),
                total_len: ip.total_len.get(),
                flags: ip.flags(),
                hdr_len: ip.hdr_len(),
            };
            (L3Info::Ipv4(info), l4_off, l4)
        }

        EtherType::Ipv6 => {
            let ip = hdr::<Ipv6HdrRaw>(bytes, l3_off)?;
            if ip.version() != IPV6_VERSION {
                return Err(ParseError::BadVersion(ip.version()));
            }

            let l4_off = l3_off + IPV6_HDR_SZ;
            let l4 = match ip.next_hdr {
                PROTO_IPV6_FRAG => return Err(ParseError::Fragment),
                PROTO_IPIP => L4Info::Ipv4InIpv6,
                proto => parse_l4(bytes, l4_off, proto)?,
            };
            let info = Ipv6Info {
                src: ip.src_ip(),
                dst: ip.dst_ip(),
                next_hdr: ip.next_hdr,
                traffic_class: ip.traffic_class(),
                priority: ip.priority(),
                flow_lbl: ip.flow_lbl(),
                hop_limit: ip.hop_limit,
            };
            (L3Info::Ipv6(info), l4_off, l4)
        }

        other => return Err(ParseError::UnknownL3(u16::from(other))),
    };

    Ok(FlowTuple {
        dmac: eth.dst_mac(),
        smac: eth.src_mac(),
        encap,
        l3_off,
        l3,
        l4_off,
        l4,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::ip::TCP_HDR_SZ;
    use alloc::vec::Vec;

    const DMAC: [u8; 6] = [0x00, 0x0C, 0x43, 0x76, 0x20, 0x01];
    const SMAC: [u8; 6] = [0xA8, 0x40, 0x25, 0x11, 0x22, 0x33];

    fn ipv4(proto: u8, frag: u16, l4: &[u8]) -> Vec<u8> {
        let total = (IPV4_HDR_SZ + l4.len()) as u16;
        let mut ip = vec![0x45, 0xB8];
        ip.extend_from_slice(&total.to_be_bytes());
        ip.extend_from_slice(&[0x12, 0x34]);
        ip.extend_from_slice(&frag.to_be_bytes());
        ip.extend_from_slice(&[64, proto, 0xAB, 0xCD]);
        ip.extend_from_slice(&[10, 0, 0, 5]);
        ip.extend_from_slice(&[93, 184, 216, 34]);
        ip.extend_from_slice(l4);
        ip
    }

    fn tcp() -> Vec<u8> {
        let mut tcp = vec![0u8; TCP_HDR_SZ];
        tcp[0..2].copy_from_slice(&51000u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&443u16.to_be_bytes());
        tcp[12] = 0x50;
        tcp
    }

    fn frame(tcis: &[u16], etype: u16, l3: &[u8]) -> Vec<u8> {
        let mut f = Vec::new();
        f.extend_from_slice(&DMAC);
        f.extend_from_slice(&SMAC);
        for tci in tcis {
            f.extend_from_slice(&[0x81, 0x00]);
            f.extend_from_slice(&tci.to_be_bytes());
        }
        f.extend_from_slice(&etype.to_be_bytes());
        f.extend_from_slice(l3);
        f
    }

    #[test]
    fn untagged_tcp() {
        let bytes = frame(&[], 0x0800, &ipv4(PROTO_TCP, 0, &tcp()));
        let tuple = parse(&bytes).unwrap();

        assert_eq!(tuple.dmac, MacAddr::from(DMAC));
        assert_eq!(tuple.smac, MacAddr::from(SMAC));
        assert!(tuple.encap.is_empty());
        assert_eq!(tuple.vlan_layer(), 0);
        assert_eq!(tuple.l3_off, 14);
        assert_eq!(tuple.l4_off, 34);
        assert_eq!(tuple.dscp(), 0xB8);
        assert_eq!(tuple.l4, L4Info::Tcp { sport: 51000, dport: 443 });

        let L3Info::Ipv4(ip) = tuple.l3 else {
            panic!("expected IPv4: {:?}", tuple.l3);
        };
        assert_eq!(ip.src, Ipv4Addr::from([10, 0, 0, 5]));
        assert_eq!(ip.dst, Ipv4Addr::from([93, 184, 216, 34]));
        assert_eq!(ip.csum, 0xABCD);
    }

    #[test]
    fn vlan_stack_depth() {
        let l3 = ipv4(PROTO_TCP, 0, &tcp());

        let two = frame(&[0x2002, 7], 0x0800, &l3);
        let tuple = parse(&two).unwrap();
        assert_eq!(tuple.vlan_layer(), 2);
        assert_eq!(tuple.vlan1(), 0x2002);
        assert_eq!(tuple.outer_vid(), Some(2));
        assert_eq!(tuple.vlan2(), 7);
        assert_eq!(tuple.l3_off, 14 + 8);

        let three = frame(&[1, 2, 3], 0x0800, &l3);
        assert_eq!(parse(&three).unwrap().vlan_layer(), 3);

        let four = frame(&[1, 2, 3, 4], 0x0800, &l3);
        assert_eq!(parse(&four), Err(ParseError::TooDeep));
    }

    #[test]
    fn pppoe_session() {
        let l3 = ipv4(PROTO_UDP, 0, &[0x01, 0xF4, 0x01, 0xF4, 0, 8, 0, 0]);
        let mut pppoe = vec![0x11, 0x00, 0x00, 0x2A];
        pppoe.extend_from_slice(&((l3.len() + 2) as u16).to_be_bytes());
        pppoe.extend_from_slice(&[0x00, 0x21]);
        pppoe.extend_from_slice(&l3);

        let bytes = frame(&[2], 0x8864, &pppoe);
        let tuple = parse(&bytes).unwrap();
        assert_eq!(tuple.pppoe_sid(), Some(0x2A));
        assert_eq!(tuple.vlan_layer(), 1);
        assert_eq!(tuple.l3_off, 14 + 4 + 8);
        assert_eq!(tuple.l4, L4Info::Udp { sport: 500, dport: 500, csum: 0 });

        // LCP rather than IP.
        let mut lcp = pppoe.clone();
        lcp[6..8].copy_from_slice(&[0xC0, 0x21]);
        assert_eq!(
            parse(&frame(&[], 0x8864, &lcp)),
            Err(ParseError::UnknownL3(0xC021))
        );
    }

    #[test]
    fn fragments_never_parse() {
        // More fragments.
        let mf = frame(&[], 0x0800, &ipv4(PROTO_TCP, 0x2000, &tcp()));
        assert_eq!(parse(&mf), Err(ParseError::Fragment));

        // Non-zero offset, with DF noise in the flags.
        let off = frame(&[], 0x0800, &ipv4(PROTO_UDP, 0x4000 | 0x00B9, &[]));
        assert_eq!(parse(&off), Err(ParseError::Fragment));

        // Don't fragment alone is fine.
        let df = frame(&[], 0x0800, &ipv4(PROTO_TCP, 0x4000, &tcp()));
        assert!(parse(&df).is_ok());
    }

    #[test]
    fn ipv6_and_tunnels() {
        let mut ip6 = vec![0x6B, 0x81, 0x23, 0x45, 0, 20, PROTO_IPIP, 64];
        ip6.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        ip6.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
        let tuple = parse(&frame(&[], 0x86DD, &ip6)).unwrap();
        assert_eq!(tuple.l4, L4Info::Ipv4InIpv6);
        let L3Info::Ipv6(info) = tuple.l3 else {
            panic!("expected IPv6: {:?}", tuple.l3);
        };
        assert_eq!(info.priority, 0xB);
        assert_eq!(info.traffic_class, 0xB8);
        assert_eq!(info.flow_lbl, [0x81, 0x23, 0x45]);

        ip6[6] = PROTO_IPV6_FRAG;
        assert_eq!(parse(&frame(&[], 0x86DD, &ip6)), Err(ParseError::Fragment));

        let six_rd = frame(&[], 0x0800, &ipv4(PROTO_IPV6, 0x4000, &[0u8; 40]));
        assert_eq!(parse(&six_rd).unwrap().l4, L4Info::Ipv6InIpv4);

        let gre = frame(&[], 0x0800, &ipv4(0x2F, 0, &[0u8; 4]));
        assert_eq!(parse(&gre).unwrap().l4, L4Info::Other(0x2F));
    }

    #[test]
    fn malformed_input() {
        assert_eq!(parse(&[0u8; 10]), Err(ParseError::Truncated));
        assert_eq!(
            parse(&frame(&[], 0x0806, &[0u8; 28])),
            Err(ParseError::UnknownL3(0x0806))
        );

        // IPv4 header cut short.
        let full = frame(&[], 0x0800, &ipv4(PROTO_TCP, 0, &tcp()));
        assert_eq!(parse(&full[..30]), Err(ParseError::Truncated));
        // TCP header cut short.
        assert_eq!(parse(&full[..40]), Err(ParseError::Truncated));

        // IPv6 ethertype carrying an IPv4 header.
        let mismatch = frame(&[], 0x86DD, &ipv4(PROTO_TCP, 0, &[0u8; 40]));
        assert_eq!(parse(&mismatch), Err(ParseError::BadVersion(4)));
    }
}
