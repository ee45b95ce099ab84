// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flow binder.
//!
//! Hardware learns a flow's tuple into a slot on its own, but it
//! cannot forward the flow until software has filled in the rest of
//! the entry: the L2 header to put on the egress frame, the
//! translated addresses and ports, any tunnel fields, and where the
//! frame goes. The binder takes a frame on its way out of software,
//! which by then carries every rewrite the stack applied, copies
//! those fields into the slot the frame hashed to, and flips the slot
//! to BIND.
//!
//! A flow the engine cannot or should not accelerate is not an
//! error: [`bind()`] returns a [`NotAccelerated`] naming the reason
//! and the frame continues through software as usual.
use super::checksum::six_rd_chksum_base;
use super::ether::ETHER_TYPE_VLAN;
use super::ether::VLAN_VID_MASK;
use super::flow_table::FoeSlotGuard;
use super::foe::FoeEntry;
use super::foe::FoeFlow;
use super::foe::InfoBlk2;
use super::foe::Ipv4DsLite;
use super::foe::Ipv6SixRd;
use super::foe::L2Act;
use super::frame::Frame;
use super::ifdir::InterfaceDirectory;
use super::parse;
use super::parse::EncapKind;
use super::parse::FlowTuple;
use super::parse::L3Info;
use super::parse::L4Info;
use super::parse::ParseError;
use super::steer::ext_if_index;
use core::fmt;
use ppe_api::Chip;
use ppe_api::FoeKind;
use ppe_api::FoeState;
use ppe_api::Generation;
use ppe_api::PpeConfig;

/// UDP destination ports the checksum-bug silicon must never
/// accelerate: IKE, IPsec NAT-T and L2TP.
pub const UDP_TUNNEL_PORTS: [u16; 3] = [500, 4500, 1701];

/// The port a frame is leaving software through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Egress {
    Gmac1,
    Gmac2,
    /// A pseudo-interface behind the CPU (wireless, PCI/USB uplink).
    ExtIf,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BindOutcome {
    /// The slot is in BIND; hardware forwards the flow from now on.
    Bound,
    /// The slot is filled in and marked pre-bind; the next hit binds
    /// it.
    PreBound,
}

/// Why a flow was left to software.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotAccelerated {
    /// The slot is bound already; it is never rewritten.
    AlreadyBound,
    /// Hardware has not learned a flow into the slot.
    NotLearned,
    Multicast,
    /// Frames leaving through a pseudo-interface must be untagged IP.
    ExtIfEncap,
    /// PPPoE without a VLAN tag needs the second GMAC.
    Pppoe,
    /// More VLAN tags than the entry can describe.
    VlanDepth,
    Parse(ParseError),
    Protocol(u8),
    UdpDisabled,
    /// UDP without a checksum, on silicon that mishandles it.
    UdpChecksumBug,
    /// A tunneling port, on silicon with the UDP checksum bug.
    TunnelPort(u16),
    Ipv6Disabled,
    /// The learned layout does not fit the frame.
    KindMismatch(FoeKind),
    /// The pseudo-interface the frame leaves through has no index.
    ExtIfIndex,
    BadEntry,
}

impl fmt::Display for NotAccelerated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyBound => write!(f, "already bound"),
            Self::NotLearned => write!(f, "not learned"),
            Self::Multicast => write!(f, "multicast"),
            Self::ExtIfEncap => {
                write!(f, "encapsulated pseudo-interface egress")
            }
            Self::Pppoe => write!(f, "untagged PPPoE"),
            Self::VlanDepth => write!(f, "too many VLAN tags"),
            Self::Parse(e) => write!(f, "parse: {e}"),
            Self::Protocol(p) => write!(f, "protocol {p}"),
            Self::UdpDisabled => write!(f, "UDP offload disabled"),
            Self::UdpChecksumBug => write!(f, "UDP without checksum"),
            Self::TunnelPort(p) => write!(f, "UDP tunnel port {p}"),
            Self::Ipv6Disabled => write!(f, "IPv6 offload disabled"),
            Self::KindMismatch(k) => write!(f, "learned as {k}"),
            Self::ExtIfIndex => write!(f, "no pseudo-interface index"),
            Self::BadEntry => write!(f, "bad entry"),
        }
    }
}

impl From<ParseError> for NotAccelerated {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

#[allow(unused_variables)]
fn bind_done_probe(idx: u32, entry: &FoeEntry) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            use alloc::string::ToString;
            let dump = entry.to_dump(idx);
            crate::ppe_provider::bind__done!(
                || (idx, entry.kind().to_string(), dump.orig)
            );
        } else {
            let _ = (idx, entry);
        }
    }
}

#[allow(unused_variables)]
fn bind_reject_probe(idx: u32, why: &NotAccelerated) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            use alloc::string::ToString;
            crate::ppe_provider::bind__reject!(|| (idx, why.to_string()));
        } else {
            let _ = (idx, why);
        }
    }
}

fn ipv6_enabled(cfg: &PpeConfig) -> bool {
    cfg!(feature = "ipv6") && cfg.ipv6_offload
}

/// Bind slot `idx` from `frame`, which is leaving software through
/// `egress`.
///
/// The caller holds the table lock for the whole call, so the state
/// hardware left in the slot is re-read here and cannot change under
/// the bind. On success the entry has been published.
pub fn bind(
    guard: &mut FoeSlotGuard<'_>,
    idx: u32,
    frame: &Frame,
    egress: Egress,
    cfg: &PpeConfig,
    dir: &InterfaceDirectory,
) -> Result<BindOutcome, NotAccelerated> {
    let res = try_bind(guard, idx, frame, egress, cfg, dir);

    if let Err(why) = &res {
        super::dbg!("bind: flow {} not accelerated: {}", idx, why);
        bind_reject_probe(idx, why);
    }

    res
}

fn try_bind(
    guard: &mut FoeSlotGuard<'_>,
    idx: u32,
    frame: &Frame,
    egress: Egress,
    cfg: &PpeConfig,
    dir: &InterfaceDirectory,
) -> Result<BindOutcome, NotAccelerated> {
    let mut entry = guard.read(idx).map_err(|_| NotAccelerated::BadEntry)?;

    match entry.state() {
        FoeState::Unbind => {}
        FoeState::Invalid => return Err(NotAccelerated::NotLearned),
        FoeState::Bind | FoeState::BindTcpFin => {
            return Err(NotAccelerated::AlreadyBound);
        }
    }

    let tuple = parse::parse(frame.bytes())?;
    let generation = cfg.generation();
    let is_mcast = tuple.dmac.is_multicast();

    if is_mcast && (generation == Generation::V1 || !cfg.mcast_offload) {
        return Err(NotAccelerated::Multicast);
    }

    check_encap(&tuple, egress, cfg)?;
    fill_flow(&mut entry, &tuple, cfg)?;
    fill_l2(&mut entry, &tuple, cfg.chip);
    fill_dest(&mut entry, &tuple, frame, egress, is_mcast, cfg, dir)?;

    entry.ib1.ts = guard.timestamp();
    entry.ib1.ttl = cfg.ttl_regen;
    entry.ib1.cah = true;

    let outcome = if generation == Generation::V2 && cfg.prebind {
        entry.ib1.preb = true;
        BindOutcome::PreBound
    } else {
        entry.ib1.preb = false;
        entry.ib1.state = FoeState::Bind;
        BindOutcome::Bound
    };

    guard.publish(idx, &entry).map_err(|_| NotAccelerated::BadEntry)?;
    bind_done_probe(idx, &entry);
    Ok(outcome)
}

fn check_encap(
    tuple: &FlowTuple,
    egress: Egress,
    cfg: &PpeConfig,
) -> Result<(), NotAccelerated> {
    if egress == Egress::ExtIf {
        let v1_non_ip4 = cfg.generation() == Generation::V1 && !tuple.is_ipv4();
        if !tuple.encap.is_empty() || v1_non_ip4 {
            return Err(NotAccelerated::ExtIfEncap);
        }
    }

    if let Some(first) = tuple.encap.first() {
        let untagged_pppoe =
            matches!(first.kind, EncapKind::PppoeSession { .. });
        if untagged_pppoe && !cfg.dual_gmac {
            return Err(NotAccelerated::Pppoe);
        }
    }

    // The entry describes at most two tags.
    if tuple.vlan_layer() > 2 {
        return Err(NotAccelerated::VlanDepth);
    }

    Ok(())
}

fn check_udp(
    dport: u16,
    csum: u16,
    check_bug: bool,
    cfg: &PpeConfig,
) -> Result<(), NotAccelerated> {
    if !cfg.udp_offload {
        return Err(NotAccelerated::UdpDisabled);
    }

    if check_bug && cfg.udp_csum_bug() {
        if csum == 0 {
            return Err(NotAccelerated::UdpChecksumBug);
        }

        if UDP_TUNNEL_PORTS.contains(&dport) {
            return Err(NotAccelerated::TunnelPort(dport));
        }
    }

    Ok(())
}

/// Fill the L3/L4 part of the entry.
///
/// Hardware learns the flow a tunnel carries, not the tunnel: a 6RD
/// or DS-Lite frame leaving for the tunnel finds its inner flow in a
/// route or NAPT slot. Binding it converts the slot to the tunnel
/// layout, keeping the learned tuple. The opposite direction finds
/// the tunnel layout already in place and has hardware strip the
/// outer header.
fn fill_flow(
    entry: &mut FoeEntry,
    tuple: &FlowTuple,
    cfg: &PpeConfig,
) -> Result<(), NotAccelerated> {
    let mismatch = NotAccelerated::KindMismatch(entry.kind());
    entry.ib1.rmt = false;

    match (&tuple.l3, tuple.l4) {
        (L3Info::Ipv4(ip), L4Info::Tcp { sport, dport })
        | (L3Info::Ipv4(ip), L4Info::Udp { sport, dport, .. }) => {
            match &mut entry.flow {
                FoeFlow::Ipv4Hnapt(f) => {
                    if let L4Info::Udp { csum, .. } = tuple.l4 {
                        check_udp(dport, csum, true, cfg)?;
                    }

                    f.new_sip = ip.src;
                    f.new_dip = ip.dst;
                    f.new_sport = sport;
                    f.new_dport = dport;
                    entry.ib1.udp = matches!(tuple.l4, L4Info::Udp { .. });
                }

                // Leaving the IPv6 side of a DS-Lite tunnel. The UDP
                // policy only applies to translated flows.
                FoeFlow::Ipv4DsLite(_) => {
                    if !ipv6_enabled(cfg) {
                        return Err(NotAccelerated::Ipv6Disabled);
                    }
                    entry.ib1.rmt = true;
                }

                _ => return Err(mismatch),
            }

            entry.ib2.dscp = ip.tos;
        }

        (L3Info::Ipv4(ip), L4Info::Ipv6InIpv4) => {
            if !ipv6_enabled(cfg) {
                return Err(NotAccelerated::Ipv6Disabled);
            }

            let mut six_rd = match entry.flow {
                FoeFlow::Ipv6SixRd(f) => f,
                FoeFlow::Ipv6Route5T(f) => Ipv6SixRd {
                    sip: f.sip,
                    dip: f.dip,
                    sport: f.sport,
                    dport: f.dport,
                    ..Default::default()
                },
                _ => return Err(mismatch),
            };

            six_rd.tunnel_sip = ip.src;
            six_rd.tunnel_dip = ip.dst;
            six_rd.hdr_chksum = six_rd_chksum_base(ip.csum, ip.total_len);
            six_rd.flag = ip.flags;
            six_rd.ttl = ip.ttl;
            six_rd.dscp = ip.tos;
            entry.flow = FoeFlow::Ipv6SixRd(six_rd);
            entry.ib2.dscp = ip.tos;
        }

        (L3Info::Ipv4(ip), _) => {
            return Err(NotAccelerated::Protocol(ip.proto));
        }

        (L3Info::Ipv6(ip), l4) => {
            if !ipv6_enabled(cfg) {
                return Err(NotAccelerated::Ipv6Disabled);
            }

            match l4 {
                L4Info::Ipv4InIpv6 => {
                    let mut ds_lite = match entry.flow {
                        FoeFlow::Ipv4DsLite(f) => f,
                        FoeFlow::Ipv4Hnapt(f) => Ipv4DsLite {
                            sip: f.sip,
                            dip: f.dip,
                            sport: f.sport,
                            dport: f.dport,
                            ..Default::default()
                        },
                        _ => return Err(mismatch),
                    };

                    ds_lite.tunnel_sip = ip.src;
                    ds_lite.tunnel_dip = ip.dst;
                    ds_lite.flow_lbl = ip.flow_lbl;
                    ds_lite.priority = ip.priority;
                    ds_lite.hop_limit = ip.hop_limit;
                    entry.flow = FoeFlow::Ipv4DsLite(ds_lite);
                }

                L4Info::Tcp { .. } | L4Info::Udp { .. } => {
                    let is_udp = matches!(l4, L4Info::Udp { .. });
                    if let L4Info::Udp { dport, csum, .. } = l4 {
                        check_udp(dport, csum, false, cfg)?;
                    }

                    match &mut entry.flow {
                        FoeFlow::Ipv6Route5T(f) => {
                            f.sip = ip.src;
                            f.dip = ip.dst;
                        }

                        // Leaving the IPv4 side of a 6RD tunnel.
                        FoeFlow::Ipv6SixRd(_) => entry.ib1.rmt = true,
                        _ => return Err(mismatch),
                    }

                    entry.ib1.udp = is_udp;
                }

                L4Info::Ipv6InIpv4 => {
                    return Err(NotAccelerated::Protocol(ip.next_hdr));
                }

                L4Info::Other(p) => return Err(NotAccelerated::Protocol(p)),
            }

            entry.ib2.dscp = ip.traffic_class;
        }
    }

    Ok(())
}

/// Copy the egress L2 header verbatim.
fn fill_l2(entry: &mut FoeEntry, tuple: &FlowTuple, chip: Chip) {
    let generation = chip.generation();
    let vlan_layer = tuple.vlan_layer();
    let pppoe = tuple.pppoe_sid();

    entry.l2.dmac = tuple.dmac;
    entry.l2.smac = tuple.smac;
    entry.l2.vlan1 = tuple.vlan1();
    entry.l2.vlan2 = tuple.vlan2();
    entry.l2.pppoe_id = pppoe.unwrap_or(0);
    entry.l2.etype = if vlan_layer > 0 { ETHER_TYPE_VLAN } else { 0 };
    entry.ib1.vlan_layer = vlan_layer;
    entry.ib1.psn = pppoe.is_some();

    match generation {
        // TPID 0x8100 on the tags hardware inserts.
        Generation::V2 => entry.ib1.vpm = chip == Chip::Mt7621,

        Generation::V1 => {
            let act = |present: bool| {
                if present { L2Act::Insert } else { L2Act::Delete }
            };

            if let FoeFlow::Ipv4Hnapt(f) = &mut entry.flow {
                f.act.vlan1 = act(vlan_layer >= 1);
                f.act.vlan2 = act(vlan_layer >= 2);
                f.act.pppoe = act(pppoe.is_some());
            }
            entry.ib2.fd = true;
        }
    }
}

/// Pick the egress port. LAN traffic carries the LAN VLAN id; anything
/// else is headed for the WAN port.
fn fill_dest(
    entry: &mut FoeEntry,
    tuple: &FlowTuple,
    frame: &Frame,
    egress: Egress,
    is_mcast: bool,
    cfg: &PpeConfig,
    dir: &InterfaceDirectory,
) -> Result<(), NotAccelerated> {
    let lan_or_wan = || {
        if tuple.vlan1() & VLAN_VID_MASK != cfg.lan_vid { 2 } else { 1 }
    };

    entry.act_dp = 0;

    if egress == Egress::ExtIf {
        let dev = frame.dev().ok_or(NotAccelerated::ExtIfIndex)?;
        entry.act_dp = ext_if_index(dir, dev, frame.if_idx())
            .ok_or(NotAccelerated::ExtIfIndex)?;
    }

    match cfg.generation() {
        Generation::V2 => {
            let ib2 = &mut entry.ib2;
            ib2.port_mg = InfoBlk2::PORT_MG_NONE;

            if egress == Egress::ExtIf {
                ib2.port_ag = 0x3F;
                if cfg.chip == Chip::Mt7621 {
                    ib2.fpidx = 0;
                    ib2.mcast = is_mcast;
                } else {
                    ib2.fpidx = if is_mcast { 8 } else { 6 };
                }
            } else if cfg.dual_gmac && cfg.chip == Chip::Mt7621 {
                ib2.fpidx = if egress == Egress::Gmac2 { 2 } else { 1 };
                ib2.port_ag = ib2.fpidx;
                ib2.mcast = is_mcast;
            } else {
                ib2.port_ag = lan_or_wan();
                if cfg.chip == Chip::Mt7621 {
                    ib2.fpidx = 1;
                    ib2.mcast = is_mcast;
                } else {
                    ib2.fpidx = 8;
                }
            }
        }

        Generation::V1 => {
            entry.ib2.fpidx = if egress == Egress::ExtIf {
                0
            } else if cfg.dual_gmac {
                if egress == Egress::Gmac2 { 2 } else { 1 }
            } else if cfg.chip == Chip::Rt3883 {
                1
            } else {
                lan_or_wan()
            };
        }
    }

    Ok(())
}
