// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Keepalive reconstruction.
//!
//! While a flow is bound, software never sees it, and the connection
//! tracker would eventually expire it. To prevent that the engine
//! periodically sends a copy of a hit frame to the CPU. Depending on
//! the keepalive mode that copy is either the frame as it arrived
//! (old header) or the frame after the engine rewrote it (new
//! header). The latter looks to the stack like a frame going the
//! wrong way, so its original header is rebuilt from the flow entry
//! before the stack sees it.
use super::checksum::update_in_place;
use super::ether::ETHER_TYPE_VLAN;
use super::ether::VLAN_VID_MASK;
use super::flow_table::FoeTable;
use super::foe::FoeFlow;
use super::frame::Frame;
use super::frame::PktType;
use super::ip::IPV4_CSUM_OFF;
use super::ip::IPV4_DST_OFF;
use super::ip::IPV4_SRC_OFF;
use super::ip::TCP_CSUM_OFF;
use super::ip::UDP_CSUM_OFF;
use super::parse;
use super::parse::L3Info;
use super::parse::L4Info;
use ppe_api::FoeState;
use ppe_api::Ipv4Addr;
use ppe_api::PpeConfig;

#[allow(unused_variables)]
fn keepalive_unbind_probe(idx: u32) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            crate::ppe_provider::keepalive__unbind!(|| idx);
        } else {
            let _ = idx;
        }
    }
}

/// Replace `bytes[off..off + new.len()]` with `new`, patching each
/// checksum in `csums` (offset, UDP semantics) to match.
fn patch(bytes: &mut [u8], off: usize, new: &[u8], csums: &[(usize, bool)]) {
    let mut old = [0u8; 4];
    let len = new.len();
    let Some(cur) = bytes.get(off..off + len) else {
        return;
    };
    old[..len].copy_from_slice(cur);

    for &(csum_off, udp) in csums {
        if let Some(csum) = bytes.get_mut(csum_off..csum_off + 2) {
            update_in_place(csum, &old[..len], new, udp);
        }
    }

    bytes[off..off + len].copy_from_slice(new);
}

/// The tuple the flow was learned with.
fn learned_tuple(flow: &FoeFlow) -> Option<(Ipv4Addr, Ipv4Addr, u16, u16)> {
    match flow {
        FoeFlow::Ipv4Hnapt(f) => Some((f.sip, f.dip, f.sport, f.dport)),
        FoeFlow::Ipv4DsLite(f) => Some((f.sip, f.dip, f.sport, f.dport)),
        _ => None,
    }
}

/// Prepare a keepalive frame for the stack.
///
/// With `recover` set the frame carries the engine's rewritten
/// header: its MACs are swapped back, its VLAN moved to the other
/// side, and its IPv4 addresses and ports restored from the entry.
/// Either way the source MAC is made multicast so bridges do not
/// learn it, and the frame is marked as addressed to this host.
///
/// A bound UDP flow with no checksum on silicon with the checksum bug
/// is unbound here, whatever `recover` says.
pub fn reconstruct(
    table: &FoeTable,
    cfg: &PpeConfig,
    frame: &mut Frame,
    recover: bool,
) {
    let idx = frame.tag().entry;
    let entry = match table.peek(idx) {
        Ok(entry) => entry,
        Err(e) => {
            super::dbg!("keepalive: flow {}: {}", idx, e);
            return;
        }
    };

    let bytes = frame.bytes_mut();
    if bytes.len() < 14 {
        return;
    }

    if recover {
        let (dst, src) = bytes.split_at_mut(6);
        dst.swap_with_slice(&mut src[..6]);
    }
    bytes[6] |= 0x01;

    if recover && u16::from_be_bytes([bytes[12], bytes[13]]) == ETHER_TYPE_VLAN
    {
        if let Some(tci) = bytes.get_mut(14..16) {
            let vid = u16::from_be_bytes([tci[0], tci[1]]) & VLAN_VID_MASK;
            let flipped =
                if vid == cfg.wan_vid { cfg.lan_vid } else { cfg.wan_vid };
            tci.copy_from_slice(&flipped.to_be_bytes());
        }
    }

    let Ok(tuple) = parse::parse(bytes) else {
        return;
    };

    if let (L3Info::Ipv4(_), Some((sip, dip, sport, dport))) =
        (&tuple.l3, learned_tuple(&entry.flow))
    {
        let l3 = tuple.l3_off;
        let l4 = tuple.l4_off;

        let l4_csum = match tuple.l4 {
            L4Info::Tcp { .. } => Some((l4 + TCP_CSUM_OFF, false)),

            L4Info::Udp { csum, .. } => {
                if csum == 0 && cfg.udp_csum_bug() {
                    force_unbind(table, idx);
                }
                Some((l4 + UDP_CSUM_OFF, true))
            }

            _ => None,
        };

        if let (true, Some(l4_csum)) = (recover, l4_csum) {
            patch(bytes, l4, &sport.to_be_bytes(), &[l4_csum]);
            patch(bytes, l4 + 2, &dport.to_be_bytes(), &[l4_csum]);

            let csums = [(l3 + IPV4_CSUM_OFF, false), l4_csum];
            patch(bytes, l3 + IPV4_SRC_OFF, &sip.bytes(), &csums);
            patch(bytes, l3 + IPV4_DST_OFF, &dip.bytes(), &csums);
        }
    }

    frame.set_pkt_type(PktType::Host);
}

fn force_unbind(table: &FoeTable, idx: u32) {
    let mut guard = table.lock();
    let bound = guard.read(idx).is_ok_and(|e| e.state() == FoeState::Bind);
    if !bound {
        return;
    }

    match guard.set_state(idx, FoeState::Unbind) {
        Ok(_) => keepalive_unbind_probe(idx),
        Err(e) => {
            super::err!("keepalive: unbind of flow {} failed: {}", idx, e);
        }
    }
}
