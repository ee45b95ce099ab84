// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub mod pcap;

// Let's make our lives easier and pub use a bunch of stuff.
pub use ppe::api::Chip;
pub use ppe::api::FoeKind;
pub use ppe::api::FoeState;
pub use ppe::api::Ipv4Addr;
pub use ppe::api::Ipv6Addr;
pub use ppe::api::MacAddr;
pub use ppe::api::PpeConfig;
pub use ppe::api::PpeError;
pub use ppe::api::TableSize;
pub use ppe::engine::Engine;
pub use ppe::engine::RxAction;
pub use ppe::engine::TxAction;
pub use ppe::engine::bind::BindOutcome;
pub use ppe::engine::bind::Egress;
pub use ppe::engine::bind::NotAccelerated;
pub use ppe::engine::flow_table::FoeHw;
pub use ppe::engine::flow_table::FoeTable;
pub use ppe::engine::foe::FoeEntry;
pub use ppe::engine::foe::FoeFlow;
pub use ppe::engine::foe::Ipv4DsLite;
pub use ppe::engine::foe::Ipv4Hnapt;
pub use ppe::engine::foe::Ipv6Route5T;
pub use ppe::engine::foe::Ipv6SixRd;
pub use ppe::engine::frame::FoeMagic;
pub use ppe::engine::frame::FoeTag;
pub use ppe::engine::frame::Frame;
pub use ppe::engine::frame::PktType;
pub use ppe::engine::ifdir::*;
pub use ppe::engine::parse::ParseError;
pub use ppe::engine::reason::v1;
pub use ppe::engine::reason::v2;
pub use smoltcp::wire::IpAddress;
pub use smoltcp::wire::Ipv4Packet;
pub use smoltcp::wire::Ipv6Packet;
pub use smoltcp::wire::TcpPacket;
pub use smoltcp::wire::UdpPacket;
use smoltcp::wire::IpProtocol;
use smoltcp::wire::Ipv4Address;
use smoltcp::wire::Ipv6Address;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::Ordering;

pub const LAN_MAC: [u8; 6] = [0xA8, 0x40, 0x25, 0x00, 0x00, 0x01];
pub const WAN_MAC: [u8; 6] = [0xA8, 0x40, 0x25, 0x00, 0x00, 0x02];
pub const GW_MAC: [u8; 6] = [0xA8, 0x40, 0x25, 0x00, 0x00, 0xFE];

pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_IPV6: u16 = 0x86DD;
pub const ETHER_TYPE_VLAN: u16 = 0x8100;
pub const ETHER_TYPE_PPPOE_SES: u16 = 0x8864;

/// The hardware side of the flow table: a settable clock and a record
/// of every DMA barrier.
#[derive(Debug, Default)]
pub struct MockHw {
    ts: AtomicU16,
    syncs: Mutex<Vec<u32>>,
}

impl MockHw {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_timestamp(&self, ts: u16) {
        self.ts.store(ts, Ordering::Relaxed);
    }

    /// The slots synced so far, in order.
    pub fn syncs(&self) -> Vec<u32> {
        self.syncs.lock().unwrap().clone()
    }

    pub fn clear_syncs(&self) {
        self.syncs.lock().unwrap().clear();
    }
}

impl FoeHw for MockHw {
    fn timestamp(&self) -> u16 {
        self.ts.load(Ordering::Relaxed)
    }

    fn sync_for_device(&self, idx: u32, _slot: &[u8]) {
        self.syncs.lock().unwrap().push(idx);
    }
}

/// An interface that records what it is asked to transmit.
pub struct MockDev {
    name: String,
    mac: MacAddr,
    up: AtomicBool,
    sent: Mutex<Vec<Frame>>,
}

impl MockDev {
    pub fn new(name: &str, mac: [u8; 6]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            mac: MacAddr::from(mac),
            up: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Relaxed);
    }

    /// Take every frame transmitted so far.
    pub fn take_sent(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn netdev(self: &Arc<Self>) -> NetDevRef {
        self.clone()
    }
}

impl NetDev for MockDev {
    fn name(&self) -> &str {
        &self.name
    }

    fn mac(&self) -> MacAddr {
        self.mac
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::Relaxed)
    }

    fn xmit(&self, frame: Frame) {
        self.sent.lock().unwrap().push(frame);
    }
}

/// Resolves names against a fixed set of mock interfaces.
#[derive(Default)]
pub struct MockNet {
    devs: Vec<Arc<MockDev>>,
}

impl MockNet {
    /// Create one interface per name. Interface `i` gets a MAC ending
    /// in `i + 1`.
    pub fn new(names: &[&str]) -> Self {
        let devs = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                MockDev::new(name, [0x02, 0x08, 0x20, 0, 0, i as u8 + 1])
            })
            .collect();
        Self { devs }
    }

    pub fn dev(&self, name: &str) -> Arc<MockDev> {
        self.devs
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("no mock device {name}"))
    }
}

impl DeviceResolver for MockNet {
    fn get_by_name(&self, name: &str) -> Option<NetDevRef> {
        self.devs
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.clone() as NetDevRef)
    }
}

/// An engine over a 1K table, its hardware, and a network with both
/// GMACs, the first three virtual APs of each radio, and one uplink.
pub struct TestEngine {
    pub engine: Engine<v2::CpuReason>,
    pub hw: Arc<MockHw>,
    pub net: MockNet,
}

pub const TEST_IFS: [&str; 9] =
    ["eth2", "eth3", "ra0", "ra1", "ra2", "rai0", "rai1", "rai2", "weth0"];

impl TestEngine {
    pub fn new(cfg: PpeConfig) -> Self {
        let hw = MockHw::new();
        let cfg = PpeConfig { table_size: TableSize::Size1K, ..cfg };
        let engine = Engine::new(cfg, hw.clone()).unwrap();
        let net = MockNet::new(&TEST_IFS);
        engine.start(&net);
        hw.clear_syncs();
        Self { engine, hw, net }
    }
}

/// The tag hardware puts on a frame it hands to software.
pub fn hw_tag<R: Into<u8>>(reason: R, entry: u32) -> FoeTag {
    FoeTag {
        magic: FoeMagic::Gmac,
        entry,
        reason: reason.into(),
        ..Default::default()
    }
}

/// Build raw Ethernet frames. IP and L4 checksums are filled in by
/// smoltcp.
#[derive(Clone, Debug)]
pub struct FrameBuilder {
    dmac: [u8; 6],
    smac: [u8; 6],
    vlans: Vec<u16>,
    pppoe: Option<u16>,
    tos: u8,
    frag: Option<(bool, u16)>,
}

impl FrameBuilder {
    pub fn new(dmac: [u8; 6], smac: [u8; 6]) -> Self {
        Self { dmac, smac, vlans: vec![], pppoe: None, tos: 0, frag: None }
    }

    /// Add an 802.1Q tag inside any already added.
    pub fn vlan(mut self, tci: u16) -> Self {
        self.vlans.push(tci);
        self
    }

    /// Add a PPPoE session header after the tags.
    pub fn pppoe(mut self, sid: u16) -> Self {
        self.pppoe = Some(sid);
        self
    }

    pub fn tos(mut self, tos: u8) -> Self {
        self.tos = tos;
        self
    }

    /// Mark the IPv4 datagram as a fragment.
    pub fn fragment(mut self, more_frags: bool, offset: u16) -> Self {
        self.frag = Some((more_frags, offset));
        self
    }

    fn l2(&self, ethertype: u16, l3: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&self.dmac);
        b.extend_from_slice(&self.smac);
        for tci in &self.vlans {
            b.extend_from_slice(&ETHER_TYPE_VLAN.to_be_bytes());
            b.extend_from_slice(&tci.to_be_bytes());
        }

        match self.pppoe {
            Some(sid) => {
                let ppp = if ethertype == ETHER_TYPE_IPV4 { 0x0021u16 } else { 0x0057 };
                b.extend_from_slice(&ETHER_TYPE_PPPOE_SES.to_be_bytes());
                b.extend_from_slice(&[0x11, 0x00]);
                b.extend_from_slice(&sid.to_be_bytes());
                b.extend_from_slice(&((l3.len() + 2) as u16).to_be_bytes());
                b.extend_from_slice(&ppp.to_be_bytes());
            }

            None => b.extend_from_slice(&ethertype.to_be_bytes()),
        }

        b.extend_from_slice(l3);
        b
    }

    fn ipv4(&self, src: [u8; 4], dst: [u8; 4], proto: IpProtocol, l4: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 20 + l4.len()];
        buf[20..].copy_from_slice(l4);
        let mut ip = Ipv4Packet::new_unchecked(&mut buf);
        ip.set_version(4);
        ip.set_header_len(20);
        ip.set_dscp(self.tos >> 2);
        ip.set_ecn(self.tos & 0x3);
        ip.set_total_len((20 + l4.len()) as u16);
        ip.set_ident(0x1234);
        ip.clear_flags();
        if let Some((more_frags, offset)) = self.frag {
            ip.set_more_frags(more_frags);
            ip.set_frag_offset(offset);
        } else {
            ip.set_dont_frag(true);
        }
        ip.set_hop_limit(64);
        ip.set_next_header(proto);
        ip.set_src_addr(Ipv4Address(src));
        ip.set_dst_addr(Ipv4Address(dst));
        ip.fill_checksum();
        buf
    }

    fn ipv6(&self, src: [u8; 16], dst: [u8; 16], proto: IpProtocol, l4: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 40 + l4.len()];
        buf[40..].copy_from_slice(l4);
        let mut ip = Ipv6Packet::new_unchecked(&mut buf);
        ip.set_version(6);
        ip.set_traffic_class(self.tos);
        ip.set_flow_label(0x12345);
        ip.set_payload_len(l4.len() as u16);
        ip.set_next_header(proto);
        ip.set_hop_limit(64);
        ip.set_src_addr(Ipv6Address(src));
        ip.set_dst_addr(Ipv6Address(dst));
        buf
    }

    fn tcp(src: &IpAddress, sport: u16, dst: &IpAddress, dport: u16) -> Vec<u8> {
        let mut buf = vec![0u8; 20];
        let mut tcp = TcpPacket::new_unchecked(&mut buf);
        tcp.set_src_port(sport);
        tcp.set_dst_port(dport);
        tcp.set_seq_number(smoltcp::wire::TcpSeqNumber(1000));
        tcp.set_header_len(20);
        tcp.set_ack(true);
        tcp.set_window_len(64240);
        tcp.fill_checksum(src, dst);
        buf
    }

    fn udp(
        src: &IpAddress,
        sport: u16,
        dst: &IpAddress,
        dport: u16,
        csum: bool,
    ) -> Vec<u8> {
        let mut buf = vec![0u8; 8 + 4];
        buf[8..].copy_from_slice(b"ping");
        let mut udp = UdpPacket::new_unchecked(&mut buf);
        udp.set_src_port(sport);
        udp.set_dst_port(dport);
        udp.set_len(12);
        if csum {
            udp.fill_checksum(src, dst);
        } else {
            udp.set_checksum(0);
        }
        buf
    }

    pub fn ipv4_tcp(&self, src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16) -> Vec<u8> {
        let (s, d) = (v4(src), v4(dst));
        let l4 = Self::tcp(&s, sport, &d, dport);
        self.l2(ETHER_TYPE_IPV4, &self.ipv4(src, dst, IpProtocol::Tcp, &l4))
    }

    pub fn ipv4_udp(
        &self,
        src: [u8; 4],
        sport: u16,
        dst: [u8; 4],
        dport: u16,
        csum: bool,
    ) -> Vec<u8> {
        let (s, d) = (v4(src), v4(dst));
        let l4 = Self::udp(&s, sport, &d, dport, csum);
        self.l2(ETHER_TYPE_IPV4, &self.ipv4(src, dst, IpProtocol::Udp, &l4))
    }

    pub fn ipv4_icmp(&self, src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let l4 = [8u8, 0, 0xF7, 0xFF, 0, 0, 0, 0];
        self.l2(ETHER_TYPE_IPV4, &self.ipv4(src, dst, IpProtocol::Icmp, &l4))
    }

    pub fn ipv6_tcp(&self, src: [u8; 16], sport: u16, dst: [u8; 16], dport: u16) -> Vec<u8> {
        let (s, d) = (v6(src), v6(dst));
        let l4 = Self::tcp(&s, sport, &d, dport);
        self.l2(ETHER_TYPE_IPV6, &self.ipv6(src, dst, IpProtocol::Tcp, &l4))
    }

    /// An IPv4 TCP segment inside an IPv6 tunnel (DS-Lite).
    pub fn ipv4_in_ipv6(
        &self,
        tun_src: [u8; 16],
        tun_dst: [u8; 16],
        src: [u8; 4],
        dst: [u8; 4],
    ) -> Vec<u8> {
        let inner = {
            let l4 = Self::tcp(&v4(src), 1000, &v4(dst), 80);
            self.ipv4(src, dst, IpProtocol::Tcp, &l4)
        };
        self.l2(
            ETHER_TYPE_IPV6,
            &self.ipv6(tun_src, tun_dst, IpProtocol::Unknown(4), &inner),
        )
    }

    /// An IPv6 TCP segment inside an IPv4 tunnel (6RD).
    pub fn ipv6_in_ipv4(
        &self,
        tun_src: [u8; 4],
        tun_dst: [u8; 4],
        src: [u8; 16],
        dst: [u8; 16],
    ) -> Vec<u8> {
        let inner = {
            let l4 = Self::tcp(&v6(src), 1000, &v6(dst), 80);
            self.ipv6(src, dst, IpProtocol::Tcp, &l4)
        };
        self.l2(
            ETHER_TYPE_IPV4,
            &self.ipv4(tun_src, tun_dst, IpProtocol::Unknown(41), &inner),
        )
    }
}

pub fn v4(addr: [u8; 4]) -> IpAddress {
    IpAddress::Ipv4(Ipv4Address(addr))
}

pub fn v6(addr: [u8; 16]) -> IpAddress {
    IpAddress::Ipv6(Ipv6Address(addr))
}

/// Verify the IPv4 header and TCP/UDP checksums of an untagged frame
/// (L3 at offset `l3`).
pub fn ipv4_checksums_ok(frame: &[u8], l3: usize) -> bool {
    let ip = Ipv4Packet::new_checked(&frame[l3..]).unwrap();
    if !ip.verify_checksum() {
        return false;
    }

    let (src, dst) = (IpAddress::Ipv4(ip.src_addr()), IpAddress::Ipv4(ip.dst_addr()));
    let payload = ip.payload();
    match ip.next_header() {
        IpProtocol::Tcp => {
            TcpPacket::new_checked(payload).unwrap().verify_checksum(&src, &dst)
        }
        IpProtocol::Udp => {
            UdpPacket::new_checked(payload).unwrap().verify_checksum(&src, &dst)
        }
        _ => true,
    }
}
