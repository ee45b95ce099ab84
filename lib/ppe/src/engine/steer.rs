// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! External-interface steering.
//!
//! The engine only sees traffic on the GMAC. Frames to and from the
//! pseudo-interfaces behind the CPU (wireless APs, WDS and mesh
//! links, PCI/USB uplinks) are carried across that port with an
//! 802.1Q tag whose TCI is the interface's logical index in the
//! [`InterfaceDirectory`]:
//!
//! * [`outbound()`] tags a frame received on a pseudo-interface and
//!   hands it to the engine through GMAC1.
//! * [`inbound()`] takes a tagged frame the engine sent back, strips
//!   the tag and restores the frame's source interface.
//!
//! Bound flows whose destination is a pseudo-interface come back to
//! the CPU with a force-to-CPU reason; [`force_to_cpu()`] sends them
//! on to the interface named by the entry. Multicast flows the engine
//! cannot replicate to the radios are fanned out by [`fan_out()`].
use super::ether::ETHER_TYPE_IPV4;
use super::ether::ETHER_TYPE_IPV6;
use super::ether::ETHER_TYPE_VLAN;
use super::foe::FoeEntry;
use super::frame::FoeMagic;
use super::frame::FoeTag;
use super::frame::Frame;
use super::frame::PktType;
use super::ifdir::DP_APCLI0;
use super::ifdir::DP_APCLII0;
use super::ifdir::DP_GMAC1;
use super::ifdir::DP_GMAC2;
use super::ifdir::DP_MESH0;
use super::ifdir::DP_MESHI0;
use super::ifdir::DP_PCI0;
use super::ifdir::DP_PCI1;
use super::ifdir::DP_RA0;
use super::ifdir::DP_RAI0;
use super::ifdir::DP_WDS0;
use super::ifdir::DP_WDSI0;
use super::ifdir::InterfaceDirectory;
use super::ifdir::MAX_IF_NUM;
use super::ifdir::MAX_WIFI_IF_NUM;
use super::ifdir::NetDevRef;
use ppe_api::Chip;
use ppe_api::Generation;
use ppe_api::PpeConfig;

// Sub-index bases of the wireless driver's per-frame interface index.
pub const MIN_NET_DEVICE_FOR_MBSSID: u8 = 0x00;
pub const MIN_NET_DEVICE_FOR_WDS: u8 = 0x10;
pub const MIN_NET_DEVICE_FOR_APCLI: u8 = 0x20;
pub const MIN_NET_DEVICE_FOR_MESH: u8 = 0x30;

const MAX_MBSSID: u8 = 8;
const MAX_WDS: u8 = 4;

/// The disposition of a frame handed to steering.
#[derive(Debug)]
pub enum SteerResult {
    /// Not for this path; the frame continues unmodified.
    Pass(Frame),
    /// The frame was transmitted or dropped.
    Consumed,
}

#[allow(unused_variables)]
fn steer_drop_probe(idx: u32, port: u16, why: &str) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            crate::ppe_provider::steer__drop!(|| (idx, port, why));
        } else {
            let _ = (idx, port, why);
        }
    }
}

/// Map a wireless sub-index onto the logical ports of one radio.
fn wifi_index(
    if_idx: u8,
    ra: u16,
    wds: u16,
    apcli: u16,
    mesh: u16,
) -> Option<u16> {
    let (base, first, count) = if if_idx >= MIN_NET_DEVICE_FOR_MESH {
        (MIN_NET_DEVICE_FOR_MESH, mesh, 1)
    } else if if_idx >= MIN_NET_DEVICE_FOR_APCLI {
        (MIN_NET_DEVICE_FOR_APCLI, apcli, 1)
    } else if if_idx >= MIN_NET_DEVICE_FOR_WDS {
        (MIN_NET_DEVICE_FOR_WDS, wds, MAX_WDS)
    } else {
        (MIN_NET_DEVICE_FOR_MBSSID, ra, MAX_MBSSID)
    };

    let off = if_idx - base;
    (off < count).then(|| first + u16::from(off))
}

/// Resolve the logical index of the pseudo-interface a frame is
/// leaving through. Wireless interfaces are recognized by name, with
/// `if_idx` selecting the virtual AP, WDS, AP-client or mesh link;
/// everything else must be one of the uplinks in the directory.
pub fn ext_if_index(
    dir: &InterfaceDirectory,
    dev: &NetDevRef,
    if_idx: u8,
) -> Option<u16> {
    let name = dev.name();

    if name.starts_with("rai") {
        return wifi_index(if_idx, DP_RAI0, DP_WDSI0, DP_APCLII0, DP_MESHI0);
    }

    if name.starts_with("ra") {
        return wifi_index(if_idx, DP_RA0, DP_WDS0, DP_APCLI0, DP_MESH0);
    }

    [DP_PCI0, DP_PCI1, DP_GMAC1, DP_GMAC2]
        .into_iter()
        .find(|idx| dir.is(*idx, dev))
}

/// Is `idx` a port whose traffic is steered through the engine?
fn is_pseudo_port(idx: u16) -> bool {
    (DP_RA0..MAX_WIFI_IF_NUM).contains(&idx) || idx == DP_PCI0 || idx == DP_PCI1
}

/// Tag a frame received on a pseudo-interface with that interface's
/// index and send it to the engine through GMAC1.
///
/// Frames that already carry a VLAN tag or a PPPoE header, and
/// anything that is not IP, pass through untouched: tagging them
/// would stack a second tag or hide the encapsulation from the
/// engine.
pub fn outbound(
    dir: &InterfaceDirectory,
    cfg: &PpeConfig,
    mut frame: Frame,
) -> SteerResult {
    let allowed = match frame.ether_type() {
        Some(ETHER_TYPE_IPV4) => true,
        Some(ETHER_TYPE_IPV6) => cfg.generation() == Generation::V2,
        _ => false,
    };

    if !allowed {
        return SteerResult::Pass(frame);
    }

    let Some(dev) = frame.dev().cloned() else {
        super::dbg!("steer: no source interface, dropping");
        steer_drop_probe(frame.tag().entry, 0, "no source interface");
        return SteerResult::Consumed;
    };

    let idx = match dir.index_of(&dev) {
        Some(idx) if is_pseudo_port(idx) => idx,
        _ => {
            super::dbg!("steer: unknown interface {}", dev.name());
            return SteerResult::Pass(frame);
        }
    };

    let Some(gmac1) = dir.get(DP_GMAC1) else {
        super::err!("steer: no GMAC1 to reach the engine");
        steer_drop_probe(frame.tag().entry, idx, "no GMAC1");
        return SteerResult::Consumed;
    };

    if let Err(e) = frame.push_vlan(idx) {
        super::dbg!("steer: unable to tag frame for port {}: {}", idx, e);
        steer_drop_probe(frame.tag().entry, idx, "tag push failed");
        return SteerResult::Consumed;
    }

    *frame.tag_mut() = FoeTag { magic: FoeMagic::Ppe, ..Default::default() };
    frame.set_dev(gmac1.clone());
    gmac1.xmit(frame);
    SteerResult::Consumed
}

/// Undo [`outbound()`] for a frame the engine sent back to the CPU.
///
/// The frame is returned unmodified unless its outer tag names a
/// populated port, so a frame that was never steered is never
/// damaged.
pub fn inbound(
    dir: &InterfaceDirectory,
    cfg: &PpeConfig,
    mut frame: Frame,
) -> Frame {
    if frame.ether_type() != Some(ETHER_TYPE_VLAN) {
        return frame;
    }

    let Some(&[hi, lo]) = frame.bytes().get(14..16) else {
        return frame;
    };
    let idx = u16::from_be_bytes([hi, lo]);
    if idx >= MAX_IF_NUM {
        return frame;
    }

    let Some(dev) = dir.get(idx) else {
        super::err!("steer: reentry port {} does not exist", idx);
        return frame;
    };

    if frame.strip_vlan().is_err() {
        return frame;
    }

    frame.set_dev(dev.clone());

    // The GMAC classified the frame against its own address.
    if frame.pkt_type() == PktType::OtherHost {
        let dst = frame.dst_mac();
        let to_gmac2 = || {
            cfg.dual_gmac
                && dir.get(DP_GMAC2).is_some_and(|g| Some(g.mac()) == dst)
        };

        if dst == Some(dev.mac()) || to_gmac2() {
            frame.set_pkt_type(PktType::Host);
        }
    }

    frame
}

/// Deliver a bound flow's frame to the pseudo-interface its entry
/// names.
///
/// A destination that no longer exists, or whose link is down, means
/// hardware and software disagree about the interface: the frame is
/// dropped rather than sent anywhere else.
pub fn force_to_cpu(
    dir: &InterfaceDirectory,
    cfg: &PpeConfig,
    entry: &FoeEntry,
    mut frame: Frame,
) -> SteerResult {
    let port = entry.act_dp;
    let idx = frame.tag().entry;

    let Some(dev) = dir.get(port) else {
        super::err!(
            "steer: flow {} destination port {} does not exist",
            idx,
            port
        );
        steer_drop_probe(idx, port, "no destination");
        return SteerResult::Consumed;
    };

    if !dev.is_up() {
        steer_drop_probe(idx, port, "destination down");
        return SteerResult::Consumed;
    }

    // MT7620 always tags frames leaving the engine for the CPU.
    if cfg.chip == Chip::Mt7620
        && frame.ether_type() == Some(ETHER_TYPE_VLAN)
        && frame.strip_vlan().is_err()
    {
        return SteerResult::Pass(frame);
    }

    frame.set_dev(dev.clone());
    dev.xmit(frame);
    SteerResult::Consumed
}

/// Send a multicast frame to every wireless interface that is up.
///
/// Copies that cannot be allocated are skipped; the original frame is
/// always consumed.
pub fn fan_out(dir: &InterfaceDirectory, mut frame: Frame) -> SteerResult {
    if frame.ether_type() == Some(ETHER_TYPE_VLAN)
        && frame.strip_vlan().is_err()
    {
        return SteerResult::Pass(frame);
    }

    for port in DP_RA0..MAX_WIFI_IF_NUM {
        let Some(dev) = dir.get(port) else {
            continue;
        };

        if !dev.is_up() {
            continue;
        }

        match frame.try_clone() {
            Ok(mut copy) => {
                copy.set_dev(dev.clone());
                dev.xmit(copy);
            }

            Err(e) => {
                super::dbg!("steer: fan-out to port {} skipped: {}", port, e);
            }
        }
    }

    SteerResult::Consumed
}
