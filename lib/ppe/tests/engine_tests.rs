// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Engine tests.
//!
//! These drive a whole [`Engine`] the way a driver would: hardware's
//! side of the flow table is simulated (learn, age, tag), frames are
//! built byte for byte, and every frame the engine hands to an
//! interface is captured by a mock device.

use ppe::engine::bind;
use ppe::engine::checksum::six_rd_chksum_base;
use ppe::engine::foe::raw_pkt_type;
use ppe::engine::parse;
use ppe::print::print_foe_into;
use ppe_test_utils as common;

use common::*;

const FLOW: u32 = 42;

const LAN_HOST: [u8; 4] = [192, 168, 1, 5];
const NAT_ADDR: [u8; 4] = [10, 0, 0, 5];
const SERVER: [u8; 4] = [93, 184, 216, 34];

/// The tuple hardware learned on the LAN side of the NAT.
fn learned() -> FoeFlow {
    FoeFlow::Ipv4Hnapt(Ipv4Hnapt {
        sip: Ipv4Addr::from(LAN_HOST),
        dip: Ipv4Addr::from(SERVER),
        sport: 40000,
        dport: 443,
        ..Default::default()
    })
}

/// The same flow after the stack applied NAT, leaving through GMAC1.
fn nat_tcp(b: FrameBuilder) -> Vec<u8> {
    b.ipv4_tcp(NAT_ADDR, 51000, SERVER, 443)
}

fn tx_frame(bytes: Vec<u8>, reason: v2::CpuReason) -> Frame {
    Frame::new(bytes).with_tag(hw_tag(reason, FLOW))
}

fn raw_slot(t: &TestEngine) -> Vec<u8> {
    t.engine.table().hw_read_raw(FLOW).unwrap()
}

#[test]
fn tcp_flow_binds_to_wan() {
    let t = TestEngine::new(PpeConfig::default());
    t.engine.table().hw_learn(FLOW, learned()).unwrap();
    t.hw.set_timestamp(0x0BAD);

    let bytes = nat_tcp(FrameBuilder::new(GW_MAC, WAN_MAC));
    let frame = tx_frame(bytes.clone(), v2::CpuReason::HitUnbindRateReach);
    let TxAction::Continue(out) = t.engine.tx(frame, Egress::Gmac1) else {
        panic!("frame consumed");
    };
    assert_eq!(out.bytes(), &bytes[..]);

    let entry = t.engine.table().peek(FLOW).unwrap();
    assert_eq!(entry.state(), FoeState::Bind);
    assert_eq!(entry.ib1.ts, 0x0BAD);
    assert!(entry.ib1.cah);
    assert!(!entry.ib1.udp);
    assert_eq!(entry.l2.dmac, MacAddr::from(GW_MAC));
    assert_eq!(entry.l2.smac, MacAddr::from(WAN_MAC));
    assert_eq!(entry.l2.vlan1, 0);
    assert_eq!(entry.ib2.port_ag, 2);
    assert_eq!(entry.act_dp, 0);

    let FoeFlow::Ipv4Hnapt(f) = entry.flow else {
        panic!("layout changed: {:?}", entry.flow);
    };
    assert_eq!(f.sip, Ipv4Addr::from(LAN_HOST));
    assert_eq!(f.sport, 40000);
    assert_eq!(f.new_sip, Ipv4Addr::from(NAT_ADDR));
    assert_eq!(f.new_dip, Ipv4Addr::from(SERVER));
    assert_eq!(f.new_sport, 51000);
    assert_eq!(f.new_dport, 443);

    // Published exactly once.
    assert_eq!(t.hw.syncs(), vec![FLOW]);

    let mut out = Vec::new();
    print_foe_into(&mut out, &t.engine.dump()).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("10.0.0.5:51000 -> 93.184.216.34:443"));
    assert!(out.contains("BIND"));
}

#[test]
fn bound_slot_is_never_rewritten() {
    let t = TestEngine::new(PpeConfig::default());
    t.engine.table().hw_learn(FLOW, learned()).unwrap();

    let bytes = nat_tcp(FrameBuilder::new(GW_MAC, WAN_MAC));
    let frame = Frame::new(bytes.clone());
    let cfg = t.engine.cfg();
    let dir = t.engine.dir();
    let table = t.engine.table();

    let res = bind::bind(&mut table.lock(), FLOW, &frame, Egress::Gmac1, cfg, dir);
    assert_eq!(res, Ok(BindOutcome::Bound));
    let before = raw_slot(&t);

    let other = Frame::new(
        FrameBuilder::new(GW_MAC, WAN_MAC).ipv4_tcp(NAT_ADDR, 1, SERVER, 2),
    );
    for frame in [&frame, &other] {
        let res =
            bind::bind(&mut table.lock(), FLOW, frame, Egress::Gmac2, cfg, dir);
        assert_eq!(res, Err(NotAccelerated::AlreadyBound));
    }

    assert_eq!(raw_slot(&t), before);
    assert_eq!(t.hw.syncs(), vec![FLOW]);

    // Once hardware ages the flow it may be bound again.
    table.hw_age(FLOW).unwrap();
    let res = bind::bind(&mut table.lock(), FLOW, &other, Egress::Gmac1, cfg, dir);
    assert_eq!(res, Ok(BindOutcome::Bound));
}

#[test]
fn zero_udp_checksum_rejected_before_port() {
    // MT7620 revision 0 mishandles UDP without a checksum.
    let cfg = PpeConfig { udp_offload: true, asic_rev: 0, ..Default::default() };
    let t = TestEngine::new(cfg);
    t.engine.table().hw_learn(FLOW, learned()).unwrap();
    let b = FrameBuilder::new(GW_MAC, WAN_MAC);

    let ike = Frame::new(b.ipv4_udp(NAT_ADDR, 500, SERVER, 500, false));
    let res = bind::bind(
        &mut t.engine.table().lock(),
        FLOW,
        &ike,
        Egress::Gmac1,
        t.engine.cfg(),
        t.engine.dir(),
    );
    assert_eq!(res, Err(NotAccelerated::UdpChecksumBug));

    let natt = Frame::new(b.ipv4_udp(NAT_ADDR, 4500, SERVER, 4500, true));
    let res = bind::bind(
        &mut t.engine.table().lock(),
        FLOW,
        &natt,
        Egress::Gmac1,
        t.engine.cfg(),
        t.engine.dir(),
    );
    assert_eq!(res, Err(NotAccelerated::TunnelPort(4500)));

    // Through the dispatcher the failure turns the frame into an
    // unhit one.
    let frame = tx_frame(
        b.ipv4_udp(NAT_ADDR, 500, SERVER, 500, false),
        v2::CpuReason::HitUnbindRateReach,
    );
    let TxAction::Continue(out) = t.engine.tx(frame, Egress::Gmac1) else {
        panic!("frame consumed");
    };
    assert_eq!(out.tag().reason, u8::from(v2::CpuReason::UnHit));
    assert_eq!(t.engine.table().peek(FLOW).unwrap().state(), FoeState::Unbind);
    assert!(t.hw.syncs().is_empty());

    // Fixed silicon takes the same flow.
    let cfg = PpeConfig { udp_offload: true, asic_rev: 5, ..Default::default() };
    let t = TestEngine::new(cfg);
    t.engine.table().hw_learn(FLOW, learned()).unwrap();
    let frame = tx_frame(
        b.ipv4_udp(NAT_ADDR, 500, SERVER, 500, false),
        v2::CpuReason::HitUnbindRateReach,
    );
    t.engine.tx(frame, Egress::Gmac1);
    assert_eq!(t.engine.table().peek(FLOW).unwrap().state(), FoeState::Bind);
}

#[test]
fn fragments_never_bind() {
    let cfg = PpeConfig { udp_offload: true, asic_rev: 5, ..Default::default() };
    let t = TestEngine::new(cfg);
    t.engine.table().hw_learn(FLOW, learned()).unwrap();
    let before = raw_slot(&t);

    let builders = [
        FrameBuilder::new(GW_MAC, WAN_MAC).fragment(true, 0),
        FrameBuilder::new(GW_MAC, WAN_MAC).fragment(false, 185),
        FrameBuilder::new(GW_MAC, WAN_MAC).fragment(true, 370).vlan(2),
        FrameBuilder::new(GW_MAC, WAN_MAC).fragment(true, 0).vlan(2).pppoe(9),
    ];

    for b in builders {
        for bytes in [
            nat_tcp(b.clone()),
            b.ipv4_udp(NAT_ADDR, 5353, SERVER, 53, true),
        ] {
            let frame = Frame::new(bytes);
            let res = bind::bind(
                &mut t.engine.table().lock(),
                FLOW,
                &frame,
                Egress::Gmac1,
                t.engine.cfg(),
                t.engine.dir(),
            );
            assert_eq!(res, Err(NotAccelerated::Parse(ParseError::Fragment)));
        }
    }

    assert_eq!(raw_slot(&t), before);
}

#[test]
fn pppoe_needs_vlan_or_second_gmac() {
    let t = TestEngine::new(PpeConfig::default());
    t.engine.table().hw_learn(FLOW, learned()).unwrap();

    let untagged = Frame::new(nat_tcp(FrameBuilder::new(GW_MAC, WAN_MAC).pppoe(7)));
    let res = bind::bind(
        &mut t.engine.table().lock(),
        FLOW,
        &untagged,
        Egress::Gmac1,
        t.engine.cfg(),
        t.engine.dir(),
    );
    assert_eq!(res, Err(NotAccelerated::Pppoe));

    let tagged =
        Frame::new(nat_tcp(FrameBuilder::new(GW_MAC, WAN_MAC).vlan(2).pppoe(7)));
    let res = bind::bind(
        &mut t.engine.table().lock(),
        FLOW,
        &tagged,
        Egress::Gmac1,
        t.engine.cfg(),
        t.engine.dir(),
    );
    assert_eq!(res, Ok(BindOutcome::Bound));

    let entry = t.engine.table().peek(FLOW).unwrap();
    assert!(entry.ib1.psn);
    assert_eq!(entry.l2.pppoe_id, 7);
    assert_eq!(entry.l2.vlan1, 2);
    assert_eq!(entry.ib1.vlan_layer, 1);
}

const TUN6_SRC: [u8; 16] =
    [0x20, 0x01, 0x0D, 0xB8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
const TUN6_DST: [u8; 16] =
    [0x20, 0x01, 0x0D, 0xB8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];
const LAN6_HOST: [u8; 16] =
    [0xFD, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 5];
const SERVER6: [u8; 16] =
    [0x26, 0x06, 0x28, 0, 0x02, 0x20, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0x34];

type BindResult = Result<BindOutcome, NotAccelerated>;

fn bind_slot(t: &TestEngine, idx: u32, bytes: Vec<u8>) -> BindResult {
    bind::bind(
        &mut t.engine.table().lock(),
        idx,
        &Frame::new(bytes),
        Egress::Gmac1,
        t.engine.cfg(),
        t.engine.dir(),
    )
}

#[test]
fn six_rd_encap_converts_route_slot() {
    let cfg = PpeConfig { ipv6_offload: true, ..Default::default() };
    let t = TestEngine::new(cfg);
    let table = t.engine.table();

    // Hardware learned the IPv6 flow on the LAN side.
    let route = Ipv6Route5T {
        sip: Ipv6Addr::from(LAN6_HOST),
        dip: Ipv6Addr::from(SERVER6),
        sport: 1000,
        dport: 80,
    };
    table.hw_learn(FLOW, FoeFlow::Ipv6Route5T(route)).unwrap();

    let bytes = FrameBuilder::new(GW_MAC, WAN_MAC)
        .ipv6_in_ipv4(NAT_ADDR, SERVER, LAN6_HOST, SERVER6);
    let tuple = parse::parse(&bytes).unwrap();
    let parse::L3Info::Ipv4(outer) = tuple.l3 else {
        panic!("outer header is not IPv4");
    };

    assert_eq!(bind_slot(&t, FLOW, bytes), Ok(BindOutcome::Bound));

    let entry = table.peek(FLOW).unwrap();
    assert_eq!(entry.kind(), FoeKind::Ipv6SixRd);
    assert_eq!(raw_pkt_type(&raw_slot(&t)), Some(entry.flow.pkt_type()));
    assert!(!entry.ib1.rmt);
    assert_eq!(entry.state(), FoeState::Bind);

    let FoeFlow::Ipv6SixRd(f) = entry.flow else {
        panic!("layout not converted: {:?}", entry.flow);
    };
    assert_eq!(f.sip, route.sip);
    assert_eq!(f.dip, route.dip);
    assert_eq!(f.sport, 1000);
    assert_eq!(f.dport, 80);
    assert_eq!(f.tunnel_sip, Ipv4Addr::from(NAT_ADDR));
    assert_eq!(f.tunnel_dip, Ipv4Addr::from(SERVER));
    assert_eq!(f.hdr_chksum, six_rd_chksum_base(outer.csum, outer.total_len));
    assert_eq!(f.ttl, 64);
}

#[test]
fn ds_lite_encap_converts_napt_slot() {
    let cfg = PpeConfig { ipv6_offload: true, ..Default::default() };
    let t = TestEngine::new(cfg);
    let table = t.engine.table();
    table.hw_learn(FLOW, learned()).unwrap();

    let bytes = FrameBuilder::new(GW_MAC, WAN_MAC)
        .ipv4_in_ipv6(TUN6_SRC, TUN6_DST, LAN_HOST, SERVER);
    assert_eq!(bind_slot(&t, FLOW, bytes), Ok(BindOutcome::Bound));

    let entry = table.peek(FLOW).unwrap();
    assert_eq!(entry.kind(), FoeKind::Ipv4DsLite);
    assert_eq!(raw_pkt_type(&raw_slot(&t)), Some(entry.flow.pkt_type()));
    assert!(!entry.ib1.rmt);

    let FoeFlow::Ipv4DsLite(f) = entry.flow else {
        panic!("layout not converted: {:?}", entry.flow);
    };
    assert_eq!(f.sip, Ipv4Addr::from(LAN_HOST));
    assert_eq!(f.dip, Ipv4Addr::from(SERVER));
    assert_eq!(f.sport, 40000);
    assert_eq!(f.dport, 443);
    assert_eq!(f.tunnel_sip, Ipv6Addr::from(TUN6_SRC));
    assert_eq!(f.tunnel_dip, Ipv6Addr::from(TUN6_DST));
    assert_eq!(f.flow_lbl, [0x01, 0x23, 0x45]);
    assert_eq!(f.hop_limit, 64);

    // A learned IPv6 route cannot carry a DS-Lite tunnel.
    table
        .hw_learn(FLOW + 1, FoeFlow::Ipv6Route5T(Ipv6Route5T::default()))
        .unwrap();
    let bytes = FrameBuilder::new(GW_MAC, WAN_MAC)
        .ipv4_in_ipv6(TUN6_SRC, TUN6_DST, LAN_HOST, SERVER);
    assert_eq!(
        bind_slot(&t, FLOW + 1, bytes),
        Err(NotAccelerated::KindMismatch(FoeKind::Ipv6Route5T))
    );
}

#[test]
fn tunnel_decap_removes_outer_header() {
    // UDP offload is off and the silicon has the checksum bug; neither
    // applies to a flow leaving a DS-Lite tunnel.
    let cfg = PpeConfig { ipv6_offload: true, asic_rev: 0, ..Default::default() };
    let t = TestEngine::new(cfg);
    let table = t.engine.table();
    let b = FrameBuilder::new(GW_MAC, LAN_MAC);

    table.hw_learn(1, FoeFlow::Ipv4DsLite(Ipv4DsLite::default())).unwrap();
    let bytes = b.ipv4_udp(SERVER, 4500, LAN_HOST, 4500, false);
    assert_eq!(bind_slot(&t, 1, bytes), Ok(BindOutcome::Bound));
    let entry = table.peek(1).unwrap();
    assert_eq!(entry.kind(), FoeKind::Ipv4DsLite);
    assert!(entry.ib1.rmt);

    table.hw_learn(2, FoeFlow::Ipv6SixRd(Ipv6SixRd::default())).unwrap();
    let bytes = b.ipv6_tcp(SERVER6, 80, LAN6_HOST, 1000);
    assert_eq!(bind_slot(&t, 2, bytes), Ok(BindOutcome::Bound));
    let entry = table.peek(2).unwrap();
    assert_eq!(entry.kind(), FoeKind::Ipv6SixRd);
    assert!(entry.ib1.rmt);

    // A plain route never strips anything, whatever the slot held.
    let mut stale = FoeEntry::learned(
        FoeFlow::Ipv6Route5T(Ipv6Route5T::default()),
        0,
    );
    stale.ib1.rmt = true;
    table.hw_write(3, &stale).unwrap();
    let bytes = b.tos(0xB8).ipv6_tcp(LAN6_HOST, 1000, SERVER6, 80);
    assert_eq!(bind_slot(&t, 3, bytes), Ok(BindOutcome::Bound));
    let entry = table.peek(3).unwrap();
    assert!(!entry.ib1.rmt);
    assert_eq!(entry.ib2.dscp, 0xB8);
}

#[test]
fn ipv6_requires_offload() {
    let t = TestEngine::new(PpeConfig::default());
    let table = t.engine.table();
    table.hw_learn(3, FoeFlow::Ipv6Route5T(Ipv6Route5T::default())).unwrap();

    let frame = Frame::new(
        FrameBuilder::new(GW_MAC, WAN_MAC).ipv6_tcp([0xFD; 16], 1, [0xFE; 16], 2),
    );
    let res = bind::bind(&mut table.lock(), 3, &frame, Egress::Gmac1, t.engine.cfg(), t.engine.dir());
    assert_eq!(res, Err(NotAccelerated::Ipv6Disabled));
}

#[test]
fn ext_if_round_trip() {
    let cfg = PpeConfig { wifi_offload: true, ..Default::default() };
    let t = TestEngine::new(cfg);
    let ra1 = t.net.dev("ra1");
    let eth2 = t.net.dev("eth2");

    let bytes = FrameBuilder::new(ra1.mac().bytes(), LAN_MAC)
        .ipv4_tcp(LAN_HOST, 40000, SERVER, 443);
    let frame = Frame::new(bytes.clone())
        .with_dev(ra1.netdev())
        .with_tag(FoeTag { magic: FoeMagic::ExtIf, ..Default::default() });
    assert!(matches!(t.engine.rx(frame), RxAction::Consumed));

    let mut sent = eth2.take_sent();
    assert_eq!(sent.len(), 1);
    let tagged = sent.remove(0);
    assert_eq!(tagged.tag().magic, FoeMagic::Ppe);
    assert_eq!(&tagged.bytes()[12..14], &ETHER_TYPE_VLAN.to_be_bytes());
    assert_eq!(&tagged.bytes()[14..16], &DP_RA1.to_be_bytes());

    // The engine loops it back on the CPU port (6 on MT7620).
    let mut tag = hw_tag(v2::CpuReason::HitUnbind, FLOW);
    tag.sport = 6;
    let back = Frame::new(tagged.into_bytes())
        .with_dev(eth2.netdev())
        .with_pkt_type(PktType::OtherHost)
        .with_tag(tag);

    let RxAction::Continue(out) = t.engine.rx(back) else {
        panic!("reinjected frame consumed");
    };
    assert_eq!(out.bytes(), &bytes[..]);
    assert!(same_dev(out.dev().unwrap(), &ra1.netdev()));
    assert_eq!(out.pkt_type(), PktType::Host);
}

#[test]
fn ext_if_never_double_tags() {
    let cfg = PpeConfig { wifi_offload: true, ..Default::default() };
    let t = TestEngine::new(cfg);
    let ra0 = t.net.dev("ra0");
    let eth2 = t.net.dev("eth2");

    let builders = [
        FrameBuilder::new(GW_MAC, LAN_MAC).vlan(1),
        FrameBuilder::new(GW_MAC, LAN_MAC).vlan(1).vlan(100),
        FrameBuilder::new(GW_MAC, LAN_MAC).vlan(1).pppoe(3),
        FrameBuilder::new(GW_MAC, LAN_MAC).pppoe(3),
    ];

    for b in builders {
        let bytes = b.ipv4_tcp(LAN_HOST, 40000, SERVER, 443);
        let frame = Frame::new(bytes.clone())
            .with_dev(ra0.netdev())
            .with_tag(FoeTag { magic: FoeMagic::ExtIf, ..Default::default() });

        let RxAction::Continue(out) = t.engine.rx(frame) else {
            panic!("encapsulated frame was steered");
        };
        assert_eq!(out.bytes(), &bytes[..]);
    }
    assert_eq!(eth2.sent_count(), 0);

    // Untagged frames are steered, with exactly one tag.
    let bytes = FrameBuilder::new(GW_MAC, LAN_MAC).ipv4_tcp(LAN_HOST, 1, SERVER, 2);
    let frame = Frame::new(bytes.clone())
        .with_dev(ra0.netdev())
        .with_tag(FoeTag { magic: FoeMagic::ExtIf, ..Default::default() });
    assert!(matches!(t.engine.rx(frame), RxAction::Consumed));
    let sent = eth2.take_sent();
    assert_eq!(sent[0].len(), bytes.len() + 4);
    assert_eq!(&sent[0].bytes()[16..18], &ETHER_TYPE_IPV4.to_be_bytes());
}

fn bind_lan_flow(t: &TestEngine, udp: bool) {
    let mut entry = FoeEntry::learned(
        FoeFlow::Ipv4Hnapt(Ipv4Hnapt {
            sip: Ipv4Addr::from(LAN_HOST),
            dip: Ipv4Addr::from(SERVER),
            sport: 40000,
            dport: 443,
            new_sip: Ipv4Addr::from(NAT_ADDR),
            new_dip: Ipv4Addr::from(SERVER),
            new_sport: 51000,
            new_dport: 443,
            ..Default::default()
        }),
        0,
    );
    entry.ib1.state = FoeState::Bind;
    entry.ib1.udp = udp;
    t.engine.table().hw_write(FLOW, &entry).unwrap();
}

#[test]
fn keepalive_recovers_original_header() {
    let t = TestEngine::new(PpeConfig { asic_rev: 5, ..Default::default() });
    bind_lan_flow(&t, false);

    let mut results = Vec::new();
    for (vid, tos) in [(2, 0), (2, 0x10), (7, 0x28)] {
        // The rewritten frame as the engine forwarded it to the WAN.
        let bytes = FrameBuilder::new(GW_MAC, WAN_MAC)
            .vlan(0x6000 | vid)
            .tos(tos)
            .ipv4_tcp(NAT_ADDR, 51000, SERVER, 443);
        let frame = Frame::new(bytes)
            .with_pkt_type(PktType::OtherHost)
            .with_tag(hw_tag(v2::CpuReason::HitBindKeepaliveMcNewHdr, FLOW));

        let RxAction::Continue(out) = t.engine.rx(frame) else {
            panic!("keepalive consumed");
        };
        let b = out.bytes();
        assert_eq!(out.pkt_type(), PktType::Host);
        assert!(ipv4_checksums_ok(b, 18));

        let ip = Ipv4Packet::new_checked(&b[18..]).unwrap();
        assert_eq!(ip.src_addr().0, LAN_HOST);
        assert_eq!(ip.dst_addr().0, SERVER);
        let tcp = TcpPacket::new_checked(ip.payload()).unwrap();
        assert_eq!(tcp.src_port(), 40000);
        assert_eq!(tcp.dst_port(), 443);

        results.push((b[0..12].to_vec(), b[14..16].to_vec()));
    }

    // Addresses swap back and the source is marked multicast.
    let mut smac = GW_MAC;
    smac[0] |= 0x01;
    let expect_macs = [WAN_MAC, smac].concat();
    for (macs, _) in &results {
        assert_eq!(macs, &expect_macs);
    }
    // WAN (2) becomes LAN (1); anything else becomes WAN.
    assert_eq!(results[0].1, [0, 1]);
    assert_eq!(results[1].1, [0, 1]);
    assert_eq!(results[2].1, [0, 2]);
    assert_eq!(t.engine.table().peek(FLOW).unwrap().state(), FoeState::Bind);
}

#[test]
fn keepalive_unbinds_checksumless_udp() {
    let t = TestEngine::new(PpeConfig { asic_rev: 0, ..Default::default() });
    bind_lan_flow(&t, true);
    t.hw.set_timestamp(99);

    let bytes = FrameBuilder::new(GW_MAC, LAN_MAC)
        .ipv4_udp(LAN_HOST, 40000, SERVER, 443, false);
    let frame = Frame::new(bytes.clone())
        .with_tag(hw_tag(v2::CpuReason::HitBindKeepaliveDupOldHdr, FLOW));

    let RxAction::Continue(out) = t.engine.rx(frame) else {
        panic!("keepalive consumed");
    };
    // The old header is left alone apart from the source MAC.
    assert_eq!(&out.bytes()[12..], &bytes[12..]);

    let entry = t.engine.table().peek(FLOW).unwrap();
    assert_eq!(entry.state(), FoeState::Unbind);
    assert_eq!(entry.ib1.ts, 99);
    assert_eq!(t.hw.syncs(), vec![FLOW]);
}

#[test]
fn keepalive_old_unicast_untouched() {
    let t = TestEngine::new(PpeConfig::default());
    bind_lan_flow(&t, false);

    let bytes = nat_tcp(FrameBuilder::new(GW_MAC, WAN_MAC));
    let frame = Frame::new(bytes.clone())
        .with_tag(hw_tag(v2::CpuReason::HitBindKeepaliveUcOldHdr, FLOW));
    let RxAction::Continue(out) = t.engine.rx(frame) else {
        panic!("keepalive consumed");
    };
    assert_eq!(out.bytes(), &bytes[..]);

    // Keepalives never leave through the engine.
    let frame = Frame::new(bytes)
        .with_tag(hw_tag(v2::CpuReason::HitBindKeepaliveMcNewHdr, FLOW));
    assert!(matches!(t.engine.tx(frame, Egress::Gmac1), TxAction::Consumed));
}

#[test]
fn multicast_fan_out() {
    let cfg = PpeConfig { mcast_offload: true, ..Default::default() };
    let t = TestEngine::new(cfg);
    t.net.dev("ra2").set_up(false);

    let bytes = FrameBuilder::new([0x01, 0x00, 0x5E, 0, 0, 0xFB], LAN_MAC)
        .vlan(1)
        .ipv4_udp(LAN_HOST, 5353, [224, 0, 0, 251], 5353, true);
    let frame = Frame::new(bytes)
        .with_pkt_type(PktType::Multicast)
        .with_tag(hw_tag(v2::CpuReason::HitBindMulticastToCpu, FLOW));
    assert!(matches!(t.engine.rx(frame), RxAction::Consumed));

    for name in ["ra0", "ra1", "rai0", "rai1", "rai2"] {
        let sent = t.net.dev(name).take_sent();
        assert_eq!(sent.len(), 1, "{name}");
        assert_eq!(sent[0].ether_type(), Some(ETHER_TYPE_IPV4));
        assert!(same_dev(sent[0].dev().unwrap(), &t.net.dev(name).netdev()));
    }
    for name in ["ra2", "eth2", "eth3", "weth0"] {
        assert_eq!(t.net.dev(name).sent_count(), 0, "{name}");
    }
}

#[test]
fn force_to_cpu_steering() {
    let t = TestEngine::new(PpeConfig { wifi_offload: true, ..Default::default() });
    let ra0 = t.net.dev("ra0");

    let mut entry = FoeEntry::learned(learned(), 0);
    entry.ib1.state = FoeState::Bind;
    let bytes = FrameBuilder::new(GW_MAC, WAN_MAC)
        .vlan(DP_RA0)
        .ipv4_tcp(SERVER, 443, LAN_HOST, 40000);
    let frame = || {
        Frame::new(bytes.clone())
            .with_tag(hw_tag(v2::CpuReason::HitBindForceToCpu, FLOW))
    };

    entry.act_dp = DP_RA0;
    t.engine.table().hw_write(FLOW, &entry).unwrap();
    assert!(matches!(t.engine.rx(frame()), RxAction::Consumed));
    let sent = ra0.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].len(), bytes.len() - 4);
    assert_eq!(sent[0].ether_type(), Some(ETHER_TYPE_IPV4));

    // Link down.
    ra0.set_up(false);
    assert!(matches!(t.engine.rx(frame()), RxAction::Consumed));
    assert_eq!(ra0.sent_count(), 0);

    // No such interface.
    entry.act_dp = DP_RA5;
    t.engine.table().hw_write(FLOW, &entry).unwrap();
    assert!(matches!(t.engine.rx(frame()), RxAction::Consumed));
    for name in TEST_IFS {
        assert_eq!(t.net.dev(name).sent_count(), 0, "{name}");
    }
}

#[test]
fn dynamic_uplinks() {
    let t = TestEngine::new(PpeConfig::default());
    let usb = MockDev::new("usb0", [0x02, 0, 0, 0, 0, 0x99]);

    assert!(t.engine.dir().is(DP_PCI0, &t.net.dev("weth0").netdev()));
    assert_eq!(t.engine.dir().hold(usb.netdev()), Ok(DP_PCI1));
    assert!(matches!(
        t.engine.dir().hold(MockDev::new("usb1", [0; 6]).netdev()),
        Err(PpeError::NoFreeSlot(_))
    ));
    assert_eq!(t.engine.dir().release(&usb.netdev()), Ok(DP_PCI1));

    t.engine.stop();
    assert!(t.engine.dir().get(DP_GMAC1).is_none());
}
