// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flow entry.
//!
//! One slot of the hardware flow table holds one of four layouts,
//! named by the packet-type field of the first info block:
//!
//! * IPv4 HNAPT: the learned 5-tuple and the tuple to rewrite it to.
//! * IPv4 DS-Lite: an IPv4 5-tuple carried over an IPv6 tunnel.
//! * IPv6 5-tuple route.
//! * IPv6 6RD: an IPv6 5-tuple carried over an IPv4 tunnel.
//!
//! All four share the info blocks, the L2 rewrite fields and the
//! pseudo-interface destination, but place them at different offsets.
//! [`FoeEntry`] is the decoded form, a closed sum over the layouts;
//! the raw `#[repr(C)]` structs below are the only place the byte
//! layout is spelled out, and every conversion between the two
//! branches on the packet type.

use crate::api::FOE_ENTRY_SIZE;
use alloc::string::String;
use core::fmt;
use ppe_api::FoeEntryDump;
use ppe_api::FoeKind;
use ppe_api::FoeState;
use ppe_api::Ipv4Addr;
use ppe_api::Ipv6Addr;
use ppe_api::MacAddr;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::byteorder::little_endian::U32;

// Packet type values of info block 1.
pub const PKT_IPV4_HNAPT: u8 = 0;
pub const PKT_IPV4_HNAT: u8 = 1;
pub const PKT_IPV6_1T_ROUTE: u8 = 2;
pub const PKT_IPV4_DSLITE: u8 = 3;
pub const PKT_IPV6_3T_ROUTE: u8 = 4;
pub const PKT_IPV6_5T_ROUTE: u8 = 5;
pub const PKT_IPV6_6RD: u8 = 7;

// State values of info block 1.
const STATE_INVALID: u32 = 0;
const STATE_UNBIND: u32 = 1;
const STATE_BIND: u32 = 2;
const STATE_FIN: u32 = 3;

/// The largest VLAN layer count the engine understands.
pub const MAX_VLAN_LAYER: u8 = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FoeDecodeError {
    /// The slot is shorter than the layout its packet type names.
    Size { need: usize, have: usize },
    UnsupportedType(u8),
}

impl fmt::Display for FoeDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size { need, have } => {
                write!(f, "layout needs {need} bytes, slot has {have}")
            }
            Self::UnsupportedType(t) => {
                write!(f, "unsupported packet type {t}")
            }
        }
    }
}

/// Info block 1: the state and the rewrite directives common to every
/// layout. The packet type lives in these bits too but is carried by
/// the [`FoeFlow`] variant instead.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InfoBlk1 {
    /// Hardware timestamp of the last bind or unbind.
    pub ts: u16,
    /// The number of VLAN tags on the egress frame.
    pub vlan_layer: u8,
    /// Insert a PPPoE session header on egress.
    pub psn: bool,
    /// Use TPID 0x8100 for the tags hardware inserts (MT7621).
    pub vpm: bool,
    /// Cache the entry in the engine.
    pub cah: bool,
    /// Remove the outer tunnel header on egress.
    pub rmt: bool,
    /// Regenerate TTL / hop limit.
    pub ttl: bool,
    /// Static entry, exempt from aging.
    pub sta: bool,
    pub state: FoeState,
    /// The flow is UDP rather than TCP.
    pub udp: bool,
    /// Pre-bind: bind on the next hit.
    pub preb: bool,
}

impl InfoBlk1 {
    fn from_raw(raw: u32) -> Self {
        let state = match (raw >> 28) & 0x3 {
            STATE_UNBIND => FoeState::Unbind,
            STATE_BIND => FoeState::Bind,
            STATE_FIN => FoeState::BindTcpFin,
            _ => FoeState::Invalid,
        };

        Self {
            ts: (raw & 0xFFFF) as u16,
            vlan_layer: ((raw >> 16) & 0x7) as u8,
            psn: raw & (1 << 19) != 0,
            vpm: raw & (1 << 20) != 0,
            cah: raw & (1 << 21) != 0,
            rmt: raw & (1 << 22) != 0,
            ttl: raw & (1 << 23) != 0,
            sta: raw & (1 << 27) != 0,
            state,
            udp: raw & (1 << 30) != 0,
            preb: raw & (1 << 31) != 0,
        }
    }

    fn to_raw(self, pkt_type: u8) -> u32 {
        let state = match self.state {
            FoeState::Unbind => STATE_UNBIND,
            FoeState::Bind => STATE_BIND,
            FoeState::BindTcpFin => STATE_FIN,
            FoeState::Invalid => STATE_INVALID,
        };

        u32::from(self.ts)
            | (u32::from(self.vlan_layer.min(MAX_VLAN_LAYER) & 0x7) << 16)
            | (u32::from(self.psn) << 19)
            | (u32::from(self.vpm) << 20)
            | (u32::from(self.cah) << 21)
            | (u32::from(self.rmt) << 22)
            | (u32::from(self.ttl) << 23)
            | (u32::from(pkt_type & 0x7) << 24)
            | (u32::from(self.sta) << 27)
            | (state << 28)
            | (u32::from(self.udp) << 30)
            | (u32::from(self.preb) << 31)
    }
}

/// Read the packet type without decoding the rest of the slot.
pub fn raw_pkt_type(slot: &[u8]) -> Option<u8> {
    let ib1: [u8; 4] = slot.get(0..4)?.try_into().ok()?;
    Some(((u32::from_le_bytes(ib1) >> 24) & 0x7) as u8)
}

/// Info block 2: where the engine sends the frame.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InfoBlk2 {
    /// Forced egress port. On the second generation this is the
    /// force-port index; on the first it is the destination port.
    pub fpidx: u8,
    pub port_mg: u8,
    pub port_ag: u8,
    pub dscp: u8,
    pub mcast: bool,
    /// Force the destination port (first generation).
    pub fd: bool,
}

impl InfoBlk2 {
    /// Meter group meaning "no meter".
    pub const PORT_MG_NONE: u8 = 0x3F;

    fn from_raw(raw: u32) -> Self {
        Self {
            fpidx: (raw & 0xFF) as u8,
            port_mg: ((raw >> 8) & 0x3F) as u8,
            port_ag: ((raw >> 14) & 0x3F) as u8,
            dscp: ((raw >> 20) & 0xFF) as u8,
            mcast: raw & (1 << 28) != 0,
            fd: raw & (1 << 29) != 0,
        }
    }

    fn to_raw(self) -> u32 {
        u32::from(self.fpidx)
            | (u32::from(self.port_mg & 0x3F) << 8)
            | (u32::from(self.port_ag & 0x3F) << 14)
            | (u32::from(self.dscp) << 20)
            | (u32::from(self.mcast) << 28)
            | (u32::from(self.fd) << 29)
    }
}

/// The L2 header to put on the egress frame. These are copied from
/// the frame that caused the bind and never translated.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct L2Info {
    pub dmac: MacAddr,
    pub smac: MacAddr,
    pub vlan1: u16,
    pub vlan2: u16,
    /// The TPID of the outer tag, zero when untagged.
    pub etype: u16,
    pub pppoe_id: u16,
}

/// First generation tag push/pop directive.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum L2Act {
    #[default]
    Modify,
    Insert,
    Delete,
}

impl L2Act {
    fn from_raw(raw: u8) -> Self {
        match raw & 0x3 {
            1 => Self::Insert,
            2 => Self::Delete,
            _ => Self::Modify,
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Self::Modify => 0,
            Self::Insert => 1,
            Self::Delete => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct L2Actions {
    pub vlan1: L2Act,
    pub vlan2: L2Act,
    pub pppoe: L2Act,
}

impl L2Actions {
    fn from_raw(raw: u8) -> Self {
        Self {
            vlan1: L2Act::from_raw(raw),
            vlan2: L2Act::from_raw(raw >> 2),
            pppoe: L2Act::from_raw(raw >> 4),
        }
    }

    fn to_raw(self) -> u8 {
        self.vlan1.to_raw()
            | (self.vlan2.to_raw() << 2)
            | (self.pppoe.to_raw() << 4)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Ipv4Hnapt {
    pub sip: Ipv4Addr,
    pub dip: Ipv4Addr,
    pub sport: u16,
    pub dport: u16,
    pub new_sip: Ipv4Addr,
    pub new_dip: Ipv4Addr,
    pub new_sport: u16,
    pub new_dport: u16,
    pub act: L2Actions,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Ipv4DsLite {
    pub sip: Ipv4Addr,
    pub dip: Ipv4Addr,
    pub sport: u16,
    pub dport: u16,
    pub tunnel_sip: Ipv6Addr,
    pub tunnel_dip: Ipv6Addr,
    pub flow_lbl: [u8; 3],
    pub priority: u8,
    pub hop_limit: u8,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Ipv6Route5T {
    pub sip: Ipv6Addr,
    pub dip: Ipv6Addr,
    pub sport: u16,
    pub dport: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Ipv6SixRd {
    pub sip: Ipv6Addr,
    pub dip: Ipv6Addr,
    pub sport: u16,
    pub dport: u16,
    pub tunnel_sip: Ipv4Addr,
    pub tunnel_dip: Ipv4Addr,
    /// Checksum base for fixing up the outer IPv4 header.
    pub hdr_chksum: u16,
    pub dscp: u8,
    pub ttl: u8,
    /// The outer IPv4 flag bits.
    pub flag: u8,
}

/// The layout-specific part of an entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FoeFlow {
    Ipv4Hnapt(Ipv4Hnapt),
    Ipv4DsLite(Ipv4DsLite),
    Ipv6Route5T(Ipv6Route5T),
    Ipv6SixRd(Ipv6SixRd),
}

impl FoeFlow {
    pub fn kind(&self) -> FoeKind {
        match self {
            Self::Ipv4Hnapt(_) => FoeKind::Ipv4Hnapt,
            Self::Ipv4DsLite(_) => FoeKind::Ipv4DsLite,
            Self::Ipv6Route5T(_) => FoeKind::Ipv6Route5T,
            Self::Ipv6SixRd(_) => FoeKind::Ipv6SixRd,
        }
    }

    pub fn pkt_type(&self) -> u8 {
        match self {
            Self::Ipv4Hnapt(_) => PKT_IPV4_HNAPT,
            Self::Ipv4DsLite(_) => PKT_IPV4_DSLITE,
            Self::Ipv6Route5T(_) => PKT_IPV6_5T_ROUTE,
            Self::Ipv6SixRd(_) => PKT_IPV6_6RD,
        }
    }
}

/// A decoded flow table slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FoeEntry {
    pub ib1: InfoBlk1,
    pub ib2: InfoBlk2,
    pub l2: L2Info,
    /// Logical destination port, used when the egress is a
    /// pseudo-interface behind the CPU.
    pub act_dp: u16,
    pub flow: FoeFlow,
}

impl FoeEntry {
    /// An entry as hardware creates it when it first learns a flow.
    pub fn learned(flow: FoeFlow, ts: u16) -> Self {
        Self {
            ib1: InfoBlk1 { ts, state: FoeState::Unbind, ..Default::default() },
            ib2: InfoBlk2::default(),
            l2: L2Info::default(),
            act_dp: 0,
            flow,
        }
    }

    pub fn kind(&self) -> FoeKind {
        self.flow.kind()
    }

    pub fn state(&self) -> FoeState {
        self.ib1.state
    }

    /// Is this one of the layouts hardware forwards as IPv4?
    pub fn is_ipv4_grp(&self) -> bool {
        matches!(self.flow, FoeFlow::Ipv4Hnapt(_) | FoeFlow::Ipv4DsLite(_))
    }

    pub fn is_ipv6_grp(&self) -> bool {
        matches!(self.flow, FoeFlow::Ipv6Route5T(_) | FoeFlow::Ipv6SixRd(_))
    }

    /// The size of the layout this entry encodes to.
    pub fn encoded_len(&self) -> usize {
        match self.flow {
            FoeFlow::Ipv4Hnapt(_) => HNAPT_SZ,
            _ => EXT_SZ,
        }
    }

    pub fn decode(slot: &[u8]) -> Result<Self, FoeDecodeError> {
        let pkt_type = raw_pkt_type(slot)
            .ok_or(FoeDecodeError::Size { need: 4, have: slot.len() })?;

        match pkt_type {
            PKT_IPV4_HNAPT => Ok(read_raw::<HnaptRaw>(slot)?.decode()),
            PKT_IPV4_DSLITE => Ok(read_raw::<DsLiteRaw>(slot)?.decode()),
            PKT_IPV6_5T_ROUTE => Ok(read_raw::<Route5TRaw>(slot)?.decode()),
            PKT_IPV6_6RD => Ok(read_raw::<SixRdRaw>(slot)?.decode()),
            other => Err(FoeDecodeError::UnsupportedType(other)),
        }
    }

    /// Write the entry into `slot`. Bytes past the end of the layout
    /// are left alone.
    pub fn encode(&self, slot: &mut [u8]) -> Result<(), FoeDecodeError> {
        let need = self.encoded_len();
        let have = slot.len();
        let dst = slot
            .get_mut(..need)
            .ok_or(FoeDecodeError::Size { need, have })?;

        let written = match &self.flow {
            FoeFlow::Ipv4Hnapt(f) => {
                HnaptRaw::encode(self, f).write_to(dst).is_ok()
            }
            FoeFlow::Ipv4DsLite(f) => {
                DsLiteRaw::encode(self, f).write_to(dst).is_ok()
            }
            FoeFlow::Ipv6Route5T(f) => {
                Route5TRaw::encode(self, f).write_to(dst).is_ok()
            }
            FoeFlow::Ipv6SixRd(f) => {
                SixRdRaw::encode(self, f).write_to(dst).is_ok()
            }
        };

        if written { Ok(()) } else { Err(FoeDecodeError::Size { need, have }) }
    }

    pub fn to_dump(&self, index: u32) -> FoeEntryDump {
        let (orig, new) = match &self.flow {
            FoeFlow::Ipv4Hnapt(f) => (
                format!("{}:{} -> {}:{}", f.sip, f.sport, f.dip, f.dport),
                format!(
                    "{}:{} -> {}:{}",
                    f.new_sip, f.new_sport, f.new_dip, f.new_dport
                ),
            ),
            FoeFlow::Ipv4DsLite(f) => (
                format!("{}:{} -> {}:{}", f.sip, f.sport, f.dip, f.dport),
                format!("tunnel {} -> {}", f.tunnel_sip, f.tunnel_dip),
            ),
            FoeFlow::Ipv6Route5T(f) => (
                format!("[{}]:{} -> [{}]:{}", f.sip, f.sport, f.dip, f.dport),
                String::from("-"),
            ),
            FoeFlow::Ipv6SixRd(f) => (
                format!("[{}]:{} -> [{}]:{}", f.sip, f.sport, f.dip, f.dport),
                format!("tunnel {} -> {}", f.tunnel_sip, f.tunnel_dip),
            ),
        };

        FoeEntryDump {
            index,
            state: self.ib1.state,
            kind: self.kind(),
            orig,
            new,
            smac: self.l2.smac,
            dmac: self.l2.dmac,
            vlan1: self.l2.vlan1,
            vlan2: self.l2.vlan2,
            pppoe_id: self.l2.pppoe_id,
            fpidx: self.ib2.fpidx,
            act_dp: self.act_dp,
            ts: self.ib1.ts,
        }
    }
}

fn read_raw<T: FromBytes + KnownLayout + Immutable>(
    slot: &[u8],
) -> Result<T, FoeDecodeError> {
    let need = core::mem::size_of::<T>();
    let have = slot.len();
    let bytes = slot.get(..need).ok_or(FoeDecodeError::Size { need, have })?;
    T::read_from_bytes(bytes).map_err(|_| FoeDecodeError::Size { need, have })
}

// ================================================================
// Raw layouts
// ================================================================

const HNAPT_SZ: usize = FOE_ENTRY_SIZE;
const EXT_SZ: usize = 80;
const HNAPT_RSV: usize = HNAPT_SZ - 55;

// The MAC is split into a 32-bit high part and a 16-bit low part,
// each holding the bytes in transmission order as a host integer.
fn mac_split(mac: MacAddr) -> (U32, U16) {
    let b = mac.bytes();
    (
        U32::new(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        U16::new(u16::from_be_bytes([b[4], b[5]])),
    )
}

fn mac_join(hi: U32, lo: U16) -> MacAddr {
    let [b0, b1, b2, b3] = hi.get().to_be_bytes();
    let [b4, b5] = lo.get().to_be_bytes();
    MacAddr::from([b0, b1, b2, b3, b4, b5])
}

fn v4(addr: Ipv4Addr) -> U32 {
    U32::new(u32::from(addr))
}

fn from_v4(raw: U32) -> Ipv4Addr {
    Ipv4Addr::from(raw.get())
}

// IPv6 addresses are stored as four host-order words, most
// significant word first.
fn v6(addr: Ipv6Addr) -> [U32; 4] {
    let b = addr.bytes();
    core::array::from_fn(|i| {
        U32::new(u32::from_be_bytes([
            b[i * 4],
            b[i * 4 + 1],
            b[i * 4 + 2],
            b[i * 4 + 3],
        ]))
    })
}

fn from_v6(raw: [U32; 4]) -> Ipv6Addr {
    let mut out = [0u8; 16];
    for (chunk, word) in out.chunks_exact_mut(4).zip(raw.iter()) {
        chunk.copy_from_slice(&word.get().to_be_bytes());
    }
    Ipv6Addr::from(out)
}

/// The fields every layout carries, at layout-specific offsets.
macro_rules! common_fields {
    ($raw:ident) => {
        impl $raw {
            fn common(&self) -> (InfoBlk1, InfoBlk2, L2Info, u16) {
                let l2 = L2Info {
                    dmac: mac_join(self.dmac_hi, self.dmac_lo),
                    smac: mac_join(self.smac_hi, self.smac_lo),
                    vlan1: self.vlan1.get(),
                    vlan2: self.vlan2.get(),
                    etype: self.etype.get(),
                    pppoe_id: self.pppoe_id.get(),
                };

                (
                    InfoBlk1::from_raw(self.ib1.get()),
                    InfoBlk2::from_raw(self.ib2.get()),
                    l2,
                    self.act_dp.get(),
                )
            }

            fn set_common(&mut self, entry: &FoeEntry) {
                self.ib1 = U32::new(entry.ib1.to_raw(entry.flow.pkt_type()));
                self.ib2 = U32::new(entry.ib2.to_raw());
                (self.dmac_hi, self.dmac_lo) = mac_split(entry.l2.dmac);
                (self.smac_hi, self.smac_lo) = mac_split(entry.l2.smac);
                self.vlan1 = U16::new(entry.l2.vlan1);
                self.vlan2 = U16::new(entry.l2.vlan2);
                self.etype = U16::new(entry.l2.etype);
                self.pppoe_id = U16::new(entry.l2.pppoe_id);
                self.act_dp = U16::new(entry.act_dp);
            }
        }
    };
}

#[repr(C)]
#[derive(Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct HnaptRaw {
    ib1: U32,
    sip: U32,
    dip: U32,
    dport: U16,
    sport: U16,
    ib2: U32,
    new_sip: U32,
    new_dip: U32,
    new_dport: U16,
    new_sport: U16,
    act_dp: U16,
    vlan1: U16,
    dmac_hi: U32,
    dmac_lo: U16,
    smac_lo: U16,
    smac_hi: U32,
    pppoe_id: U16,
    vlan2: U16,
    etype: U16,
    l2_act: u8,
    _rsv: [u8; HNAPT_RSV],
}

common_fields!(HnaptRaw);

impl HnaptRaw {
    fn decode(&self) -> FoeEntry {
        let (ib1, ib2, l2, act_dp) = self.common();
        let flow = Ipv4Hnapt {
            sip: from_v4(self.sip),
            dip: from_v4(self.dip),
            sport: self.sport.get(),
            dport: self.dport.get(),
            new_sip: from_v4(self.new_sip),
            new_dip: from_v4(self.new_dip),
            new_sport: self.new_sport.get(),
            new_dport: self.new_dport.get(),
            act: L2Actions::from_raw(self.l2_act),
        };
        FoeEntry { ib1, ib2, l2, act_dp, flow: FoeFlow::Ipv4Hnapt(flow) }
    }

    fn encode(entry: &FoeEntry, f: &Ipv4Hnapt) -> Self {
        let mut raw = Self::new_zeroed();
        raw.set_common(entry);
        raw.sip = v4(f.sip);
        raw.dip = v4(f.dip);
        raw.sport = U16::new(f.sport);
        raw.dport = U16::new(f.dport);
        raw.new_sip = v4(f.new_sip);
        raw.new_dip = v4(f.new_dip);
        raw.new_sport = U16::new(f.new_sport);
        raw.new_dport = U16::new(f.new_dport);
        raw.l2_act = f.act.to_raw();
        raw
    }
}

#[repr(C)]
#[derive(Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct DsLiteRaw {
    ib1: U32,
    sip: U32,
    dip: U32,
    dport: U16,
    sport: U16,
    tunnel_sip: [U32; 4],
    tunnel_dip: [U32; 4],
    flow_lbl: [u8; 3],
    priority: u8,
    hop_limit: u8,
    _rsv: u8,
    act_dp: U16,
    ib2: U32,
    vlan1: U16,
    dmac_lo: U16,
    dmac_hi: U32,
    smac_hi: U32,
    smac_lo: U16,
    pppoe_id: U16,
    vlan2: U16,
    etype: U16,
}

common_fields!(DsLiteRaw);

impl DsLiteRaw {
    fn decode(&self) -> FoeEntry {
        let (ib1, ib2, l2, act_dp) = self.common();
        let flow = Ipv4DsLite {
            sip: from_v4(self.sip),
            dip: from_v4(self.dip),
            sport: self.sport.get(),
            dport: self.dport.get(),
            tunnel_sip: from_v6(self.tunnel_sip),
            tunnel_dip: from_v6(self.tunnel_dip),
            flow_lbl: self.flow_lbl,
            priority: self.priority,
            hop_limit: self.hop_limit,
        };
        FoeEntry { ib1, ib2, l2, act_dp, flow: FoeFlow::Ipv4DsLite(flow) }
    }

    fn encode(entry: &FoeEntry, f: &Ipv4DsLite) -> Self {
        let mut raw = Self::new_zeroed();
        raw.set_common(entry);
        raw.sip = v4(f.sip);
        raw.dip = v4(f.dip);
        raw.sport = U16::new(f.sport);
        raw.dport = U16::new(f.dport);
        raw.tunnel_sip = v6(f.tunnel_sip);
        raw.tunnel_dip = v6(f.tunnel_dip);
        raw.flow_lbl = f.flow_lbl;
        raw.priority = f.priority;
        raw.hop_limit = f.hop_limit;
        raw
    }
}

#[repr(C)]
#[derive(Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct Route5TRaw {
    ib1: U32,
    sip: [U32; 4],
    dip: [U32; 4],
    dport: U16,
    sport: U16,
    ib2: U32,
    act_dp: U16,
    vlan1: U16,
    dmac_hi: U32,
    dmac_lo: U16,
    smac_lo: U16,
    smac_hi: U32,
    pppoe_id: U16,
    vlan2: U16,
    etype: U16,
    _rsv: [u8; 14],
}

common_fields!(Route5TRaw);

impl Route5TRaw {
    fn decode(&self) -> FoeEntry {
        let (ib1, ib2, l2, act_dp) = self.common();
        let flow = Ipv6Route5T {
            sip: from_v6(self.sip),
            dip: from_v6(self.dip),
            sport: self.sport.get(),
            dport: self.dport.get(),
        };
        FoeEntry { ib1, ib2, l2, act_dp, flow: FoeFlow::Ipv6Route5T(flow) }
    }

    fn encode(entry: &FoeEntry, f: &Ipv6Route5T) -> Self {
        let mut raw = Self::new_zeroed();
        raw.set_common(entry);
        raw.sip = v6(f.sip);
        raw.dip = v6(f.dip);
        raw.sport = U16::new(f.sport);
        raw.dport = U16::new(f.dport);
        raw
    }
}

#[repr(C)]
#[derive(Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
struct SixRdRaw {
    ib1: U32,
    sip: [U32; 4],
    dip: [U32; 4],
    dport: U16,
    sport: U16,
    tunnel_sip: U32,
    tunnel_dip: U32,
    hdr_chksum: U16,
    dscp: u8,
    ttl: u8,
    flag: u8,
    _rsv: u8,
    act_dp: U16,
    ib2: U32,
    vlan1: U16,
    dmac_lo: U16,
    dmac_hi: U32,
    smac_hi: U32,
    smac_lo: U16,
    pppoe_id: U16,
    vlan2: U16,
    etype: U16,
}

common_fields!(SixRdRaw);

impl SixRdRaw {
    fn decode(&self) -> FoeEntry {
        let (ib1, ib2, l2, act_dp) = self.common();
        let flow = Ipv6SixRd {
            sip: from_v6(self.sip),
            dip: from_v6(self.dip),
            sport: self.sport.get(),
            dport: self.dport.get(),
            tunnel_sip: from_v4(self.tunnel_sip),
            tunnel_dip: from_v4(self.tunnel_dip),
            hdr_chksum: self.hdr_chksum.get(),
            dscp: self.dscp,
            ttl: self.ttl,
            flag: self.flag,
        };
        FoeEntry { ib1, ib2, l2, act_dp, flow: FoeFlow::Ipv6SixRd(flow) }
    }

    fn encode(entry: &FoeEntry, f: &Ipv6SixRd) -> Self {
        let mut raw = Self::new_zeroed();
        raw.set_common(entry);
        raw.sip = v6(f.sip);
        raw.dip = v6(f.dip);
        raw.sport = U16::new(f.sport);
        raw.dport = U16::new(f.dport);
        raw.tunnel_sip = v4(f.tunnel_sip);
        raw.tunnel_dip = v4(f.tunnel_dip);
        raw.hdr_chksum = U16::new(f.hdr_chksum);
        raw.dscp = f.dscp;
        raw.ttl = f.ttl;
        raw.flag = f.flag;
        raw
    }
}

const _: () = assert!(core::mem::size_of::<HnaptRaw>() == HNAPT_SZ);
const _: () = assert!(core::mem::size_of::<DsLiteRaw>() == EXT_SZ);
const _: () = assert!(core::mem::size_of::<Route5TRaw>() == EXT_SZ);
const _: () = assert!(core::mem::size_of::<SixRdRaw>() == EXT_SZ);

#[cfg(test)]
mod test {
    use super::*;

    fn mac(last: u8) -> MacAddr {
        MacAddr::from([0xA8, 0x40, 0x25, 0x00, 0x00, last])
    }

    fn bound_hnapt() -> FoeEntry {
        FoeEntry {
            ib1: InfoBlk1 {
                ts: 0x1234,
                vlan_layer: 1,
                vpm: true,
                cah: true,
                ttl: true,
                state: FoeState::Bind,
                udp: true,
                ..Default::default()
            },
            ib2: InfoBlk2 {
                fpidx: 8,
                port_mg: InfoBlk2::PORT_MG_NONE,
                port_ag: 2,
                dscp: 0xB8,
                ..Default::default()
            },
            l2: L2Info {
                dmac: mac(1),
                smac: mac(2),
                vlan1: 2,
                etype: 0x8100,
                ..Default::default()
            },
            act_dp: 0,
            flow: FoeFlow::Ipv4Hnapt(Ipv4Hnapt {
                sip: Ipv4Addr::from([192, 168, 1, 10]),
                dip: Ipv4Addr::from([93, 184, 216, 34]),
                sport: 51000,
                dport: 443,
                new_sip: Ipv4Addr::from([10, 0, 0, 5]),
                new_dip: Ipv4Addr::from([93, 184, 216, 34]),
                new_sport: 40000,
                new_dport: 443,
                act: L2Actions::default(),
            }),
        }
    }

    #[test]
    fn hnapt_layout() {
        let entry = bound_hnapt();
        let mut slot = [0u8; FOE_ENTRY_SIZE];
        entry.encode(&mut slot).unwrap();

        // State BIND, UDP, packet type HNAPT.
        let ib1 = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
        assert_eq!((ib1 >> 28) & 0x3, STATE_BIND);
        assert_eq!((ib1 >> 24) & 0x7, u32::from(PKT_IPV4_HNAPT));
        assert_eq!(ib1 & 0xFFFF, 0x1234);
        assert_ne!(ib1 & (1 << 30), 0);

        // The learned source address, host order, little endian.
        assert_eq!(&slot[4..8], &[10, 1, 168, 192]);
        // Destination MAC high word.
        assert_eq!(&slot[36..40], &[0x00, 0x25, 0x40, 0xA8]);

        assert_eq!(FoeEntry::decode(&slot), Ok(entry));
    }

    #[test]
    fn decode_branches_on_pkt_type() {
        let flow = FoeFlow::Ipv6Route5T(Ipv6Route5T {
            sip: Ipv6Addr::from([0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]),
            dip: Ipv6Addr::from([0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]),
            sport: 1000,
            dport: 2000,
        });
        let entry = FoeEntry::learned(flow, 7);
        let mut slot = [0u8; 80];
        entry.encode(&mut slot).unwrap();

        assert_eq!(raw_pkt_type(&slot), Some(PKT_IPV6_5T_ROUTE));
        let decoded = FoeEntry::decode(&slot).unwrap();
        assert_eq!(decoded.kind(), FoeKind::Ipv6Route5T);
        assert_eq!(decoded.state(), FoeState::Unbind);
        assert!(decoded.is_ipv6_grp());
        assert_eq!(decoded, entry);

        // A 64-byte slot cannot hold the extended layout.
        assert_eq!(
            FoeEntry::decode(&slot[..64]),
            Err(FoeDecodeError::Size { need: 80, have: 64 })
        );
        assert!(entry.encode(&mut [0u8; 64]).is_err());
    }

    #[test]
    fn unsupported_pkt_type() {
        let mut slot = [0u8; FOE_ENTRY_SIZE];
        slot[3] = PKT_IPV6_1T_ROUTE;
        assert_eq!(
            FoeEntry::decode(&slot),
            Err(FoeDecodeError::UnsupportedType(PKT_IPV6_1T_ROUTE))
        );
    }

    #[test]
    fn zeroed_slot_is_invalid_hnapt() {
        let slot = [0u8; FOE_ENTRY_SIZE];
        let entry = FoeEntry::decode(&slot).unwrap();
        assert_eq!(entry.state(), FoeState::Invalid);
        assert_eq!(entry.kind(), FoeKind::Ipv4Hnapt);
    }

    #[test]
    fn tunnel_layouts() {
        let six_rd = FoeEntry {
            flow: FoeFlow::Ipv6SixRd(Ipv6SixRd {
                tunnel_sip: Ipv4Addr::from([198, 51, 100, 1]),
                tunnel_dip: Ipv4Addr::from([192, 0, 2, 1]),
                hdr_chksum: 0xED77,
                dscp: 0x20,
                ttl: 64,
                flag: 0b010,
                ..Default::default()
            }),
            ..bound_hnapt()
        };
        let mut slot = [0u8; 80];
        six_rd.encode(&mut slot).unwrap();
        assert_eq!(FoeEntry::decode(&slot), Ok(six_rd));

        let ds_lite = FoeEntry {
            flow: FoeFlow::Ipv4DsLite(Ipv4DsLite {
                flow_lbl: [0x01, 0x23, 0x45],
                priority: 0xB,
                hop_limit: 64,
                ..Default::default()
            }),
            ..bound_hnapt()
        };
        ds_lite.encode(&mut slot).unwrap();
        assert_eq!(FoeEntry::decode(&slot), Ok(ds_lite));
    }

    #[test]
    fn v1_l2_actions() {
        let acts = L2Actions {
            vlan1: L2Act::Insert,
            vlan2: L2Act::Delete,
            pppoe: L2Act::Delete,
        };
        assert_eq!(L2Actions::from_raw(acts.to_raw()), acts);
    }
}
