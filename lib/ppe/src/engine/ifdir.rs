// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The interface directory.
//!
//! The engine names its destinations by a small logical port index.
//! Index 0 is never assigned. The wireless virtual APs, WDS links,
//! AP-client and mesh links of the two radios (`ra*` and `rai*`) come
//! first, followed by the GMAC uplinks and the two dynamic PCI/USB
//! uplink slots.
//!
//! The directory is populated by name when the engine starts and
//! emptied when it stops. Between those points the only writers are
//! the control-plane hold/release notifications for dynamic uplinks.
//! Readers on the frame path take a reference to the interface and
//! drop the directory lock before using it.

use super::frame::Frame;
use crate::ddi::sync::KSpinLock;
use alloc::sync::Arc;
use alloc::vec::Vec;
use ppe_api::MacAddr;
use ppe_api::PpeError;

pub const DP_RA0: u16 = 1;
pub const DP_RA1: u16 = 2;
pub const DP_RA2: u16 = 3;
pub const DP_RA3: u16 = 4;
pub const DP_RA4: u16 = 5;
pub const DP_RA5: u16 = 6;
pub const DP_RA6: u16 = 7;
pub const DP_RA7: u16 = 8;
pub const DP_WDS0: u16 = 9;
pub const DP_WDS1: u16 = 10;
pub const DP_WDS2: u16 = 11;
pub const DP_WDS3: u16 = 12;
pub const DP_APCLI0: u16 = 13;
pub const DP_MESH0: u16 = 14;
pub const DP_RAI0: u16 = 15;
pub const DP_RAI1: u16 = 16;
pub const DP_RAI2: u16 = 17;
pub const DP_RAI3: u16 = 18;
pub const DP_RAI4: u16 = 19;
pub const DP_RAI5: u16 = 20;
pub const DP_RAI6: u16 = 21;
pub const DP_RAI7: u16 = 22;
pub const DP_WDSI0: u16 = 23;
pub const DP_WDSI1: u16 = 24;
pub const DP_WDSI2: u16 = 25;
pub const DP_WDSI3: u16 = 26;
pub const DP_APCLII0: u16 = 27;
pub const DP_MESHI0: u16 = 28;

/// One past the last wireless port.
pub const MAX_WIFI_IF_NUM: u16 = 29;

pub const DP_GMAC1: u16 = 29;
pub const DP_GMAC2: u16 = 30;
pub const DP_PCI0: u16 = 31;
pub const DP_PCI1: u16 = 32;

pub const MAX_IF_NUM: u16 = 33;

/// The conventional interface name of every statically assigned
/// port.
pub const PORT_NAMES: [(u16, &str); 30] = [
    (DP_RA0, "ra0"),
    (DP_RA1, "ra1"),
    (DP_RA2, "ra2"),
    (DP_RA3, "ra3"),
    (DP_RA4, "ra4"),
    (DP_RA5, "ra5"),
    (DP_RA6, "ra6"),
    (DP_RA7, "ra7"),
    (DP_WDS0, "wds0"),
    (DP_WDS1, "wds1"),
    (DP_WDS2, "wds2"),
    (DP_WDS3, "wds3"),
    (DP_APCLI0, "apcli0"),
    (DP_MESH0, "mesh0"),
    (DP_RAI0, "rai0"),
    (DP_RAI1, "rai1"),
    (DP_RAI2, "rai2"),
    (DP_RAI3, "rai3"),
    (DP_RAI4, "rai4"),
    (DP_RAI5, "rai5"),
    (DP_RAI6, "rai6"),
    (DP_RAI7, "rai7"),
    (DP_WDSI0, "wdsi0"),
    (DP_WDSI1, "wdsi1"),
    (DP_WDSI2, "wdsi2"),
    (DP_WDSI3, "wdsi3"),
    (DP_APCLII0, "apclii0"),
    (DP_MESHI0, "meshi0"),
    (DP_GMAC1, "eth2"),
    (DP_GMAC2, "eth3"),
];

/// The names probed, in order, for the dynamic uplink slots at start.
pub const PCI_NAMES: [&str; 2] = ["weth0", "wwan0"];

/// A network interface the engine can hand frames to.
pub trait NetDev: Send + Sync {
    fn name(&self) -> &str;
    fn mac(&self) -> MacAddr;
    fn is_up(&self) -> bool;

    /// Queue `frame` for transmission. The interface owns the frame
    /// from here on, whether it is sent or dropped.
    fn xmit(&self, frame: Frame);
}

pub type NetDevRef = Arc<dyn NetDev>;

/// Are these two handles the same interface?
pub fn same_dev(a: &NetDevRef, b: &NetDevRef) -> bool {
    core::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Name-based interface lookup, as provided by the host network
/// stack.
pub trait DeviceResolver {
    fn get_by_name(&self, name: &str) -> Option<NetDevRef>;
}

pub struct InterfaceDirectory {
    ports: KSpinLock<Vec<Option<NetDevRef>>>,
}

impl Default for InterfaceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceDirectory {
    pub fn new() -> Self {
        let ports = (0..MAX_IF_NUM).map(|_| None).collect();
        Self { ports: KSpinLock::new(ports) }
    }

    /// Resolve every conventional port name. Names the resolver does
    /// not know leave their port empty.
    pub fn populate<R: DeviceResolver + ?Sized>(&self, resolver: &R) -> usize {
        let mut ports = self.ports.lock_irqsave();
        let mut found = 0;

        for (idx, name) in PORT_NAMES {
            ports[usize::from(idx)] = resolver.get_by_name(name);
            found += usize::from(ports[usize::from(idx)].is_some());
        }

        // The second uplink name takes the first slot if the first
        // name is absent.
        let mut slot = DP_PCI0;
        for name in PCI_NAMES {
            if let Some(dev) = resolver.get_by_name(name) {
                ports[usize::from(slot)] = Some(dev);
                slot = DP_PCI1;
                found += 1;
            }
        }

        found
    }

    /// Drop every interface reference.
    pub fn release_all(&self) {
        let mut ports = self.ports.lock_irqsave();
        for port in ports.iter_mut() {
            *port = None;
        }
    }

    pub fn get(&self, idx: u16) -> Option<NetDevRef> {
        let ports = self.ports.lock_irqsave();
        ports.get(usize::from(idx)).and_then(|p| p.clone())
    }

    /// Find the logical index of `dev`, if it has one.
    pub fn index_of(&self, dev: &NetDevRef) -> Option<u16> {
        let ports = self.ports.lock_irqsave();
        ports.iter().enumerate().find_map(|(i, p)| match p {
            Some(p) if same_dev(p, dev) => u16::try_from(i).ok(),
            _ => None,
        })
    }

    /// Is `dev` the interface at `idx`?
    pub fn is(&self, idx: u16, dev: &NetDevRef) -> bool {
        self.get(idx).is_some_and(|p| same_dev(&p, dev))
    }

    /// Take a dynamic uplink (a hot-plugged PCI/USB interface) into
    /// the first free uplink slot. Holding an interface that already
    /// has a slot is a no-op that reports its slot.
    pub fn hold(&self, dev: NetDevRef) -> Result<u16, PpeError> {
        let mut ports = self.ports.lock_irqsave();

        for idx in [DP_PCI0, DP_PCI1] {
            if let Some(p) = &ports[usize::from(idx)] {
                if same_dev(p, &dev) {
                    return Ok(idx);
                }
            }
        }

        for idx in [DP_PCI0, DP_PCI1] {
            let port = &mut ports[usize::from(idx)];
            if port.is_none() {
                *port = Some(dev);
                return Ok(idx);
            }
        }

        Err(PpeError::NoFreeSlot(dev.name().into()))
    }

    /// Give up the uplink slot held by `dev`.
    pub fn release(&self, dev: &NetDevRef) -> Result<u16, PpeError> {
        let mut ports = self.ports.lock_irqsave();

        for idx in [DP_PCI0, DP_PCI1] {
            let port = &mut ports[usize::from(idx)];
            if port.as_ref().is_some_and(|p| same_dev(p, dev)) {
                *port = None;
                return Ok(idx);
            }
        }

        Err(PpeError::NoDevice(dev.name().into()))
    }

    /// A snapshot of the populated ports, for display.
    pub fn ports(&self) -> Vec<(u16, NetDevRef)> {
        let ports = self.ports.lock_irqsave();
        ports
            .iter()
            .enumerate()
            .filter_map(|(i, p)| Some((u16::try_from(i).ok()?, p.clone()?)))
            .collect()
    }
}
