// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The frame as the engine sees it.
//!
//! A [`Frame`] is the bytes of one Ethernet frame plus the per-frame
//! metadata the rest of the system attaches to it: the device it is
//! associated with, how the link layer classified its destination, and
//! the [`FoeTag`] hardware wrote for it.

use super::ether::ETHER_HDR_SZ;
use super::ether::ETHER_TYPE_VLAN;
use super::ether::VLAN_HDR_SZ;
use super::ifdir::NetDevRef;
use alloc::collections::TryReserveError;
use alloc::vec::Vec;
use core::fmt;
use ppe_api::MacAddr;

/// Frames shorter than this are never looked at. It covers the
/// Ethernet header and the smallest IPv4 header.
pub const MIN_FRAME_LEN: usize = ETHER_HDR_SZ + 20;

/// Where a frame's classification tag came from.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FoeMagic {
    /// No tag; the frame never touched the engine.
    #[default]
    None,
    /// Received from a GMAC port with a hardware-written tag.
    Gmac,
    /// Received on a pseudo-interface (wireless, PCI/USB uplink).
    ExtIf,
    /// Marked for redirection into the engine on transmit.
    Ppe,
}

/// The classification tag hardware attaches to every frame it
/// delivers to software.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FoeTag {
    pub magic: FoeMagic,

    /// The flow table slot this frame hashed to.
    pub entry: u32,

    /// Why the frame was delivered to software. The meaning depends
    /// on the engine generation; see [`super::reason`].
    pub reason: u8,

    /// Set when an application-layer gateway owns the flow and it must
    /// not be accelerated.
    pub alg: bool,

    /// The ingress switch port the frame entered the engine on.
    pub sport: u8,

    pub priority: u8,
}

impl FoeTag {
    /// Does this tag carry a flow index and reason written by
    /// hardware?
    pub fn is_hw_tag(&self) -> bool {
        self.magic == FoeMagic::Gmac
    }
}

/// How the link layer classified the frame's destination.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PktType {
    /// Addressed to this host.
    #[default]
    Host,
    Broadcast,
    Multicast,
    /// Addressed to some other host; the IP stack drops these.
    OtherHost,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameError {
    NoMem,
    NotTagged,
    Truncated,
}

impl From<TryReserveError> for FrameError {
    fn from(_: TryReserveError) -> Self {
        Self::NoMem
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoMem => "out of memory",
            Self::NotTagged => "frame carries no 802.1Q tag",
            Self::Truncated => "frame truncated",
        };
        write!(f, "{s}")
    }
}

pub struct Frame {
    // The frame starting with the Ethernet header.
    buf: Vec<u8>,
    dev: Option<NetDevRef>,
    pkt_type: PktType,
    tag: FoeTag,

    // The wireless driver's per-frame interface index (MBSSID, WDS,
    // AP-client or mesh sub-index).
    if_idx: u8,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.buf.len())
            .field("dev", &self.dev.as_ref().map(|d| d.name()))
            .field("pkt_type", &self.pkt_type)
            .field("tag", &self.tag)
            .field("if_idx", &self.if_idx)
            .finish()
    }
}

impl Frame {
    pub fn new(buf: Vec<u8>) -> Self {
        Self {
            buf,
            dev: None,
            pkt_type: PktType::default(),
            tag: FoeTag::default(),
            if_idx: 0,
        }
    }

    pub fn with_dev(mut self, dev: NetDevRef) -> Self {
        self.dev = Some(dev);
        self
    }

    pub fn with_pkt_type(mut self, pkt_type: PktType) -> Self {
        self.pkt_type = pkt_type;
        self
    }

    pub fn with_tag(mut self, tag: FoeTag) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_if_idx(mut self, if_idx: u8) -> Self {
        self.if_idx = if_idx;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn dev(&self) -> Option<&NetDevRef> {
        self.dev.as_ref()
    }

    pub fn set_dev(&mut self, dev: NetDevRef) {
        self.dev = Some(dev);
    }

    pub fn pkt_type(&self) -> PktType {
        self.pkt_type
    }

    pub fn set_pkt_type(&mut self, pkt_type: PktType) {
        self.pkt_type = pkt_type;
    }

    pub fn tag(&self) -> &FoeTag {
        &self.tag
    }

    pub fn tag_mut(&mut self) -> &mut FoeTag {
        &mut self.tag
    }

    pub fn if_idx(&self) -> u8 {
        self.if_idx
    }

    /// The outermost ethertype, if the frame is long enough to have
    /// one.
    pub fn ether_type(&self) -> Option<u16> {
        match self.buf.get(12..14) {
            Some(&[hi, lo]) => Some(u16::from_be_bytes([hi, lo])),
            _ => None,
        }
    }

    pub fn dst_mac(&self) -> Option<MacAddr> {
        let bytes: [u8; 6] = self.buf.get(0..6)?.try_into().ok()?;
        Some(MacAddr::from(bytes))
    }

    pub fn src_mac(&self) -> Option<MacAddr> {
        let bytes: [u8; 6] = self.buf.get(6..12)?.try_into().ok()?;
        Some(MacAddr::from(bytes))
    }

    /// Insert an 802.1Q tag carrying `tci` directly after the source
    /// MAC.
    ///
    /// The frame is left untouched if memory for the tag cannot be
    /// had.
    pub fn push_vlan(&mut self, tci: u16) -> Result<(), FrameError> {
        if self.buf.len() < ETHER_HDR_SZ {
            return Err(FrameError::Truncated);
        }

        self.buf.try_reserve(VLAN_HDR_SZ)?;
        let [tpid_hi, tpid_lo] = ETHER_TYPE_VLAN.to_be_bytes();
        let [tci_hi, tci_lo] = tci.to_be_bytes();
        self.buf.extend_from_slice(&[tpid_hi, tpid_lo, tci_hi, tci_lo]);
        self.buf[12..].rotate_right(VLAN_HDR_SZ);
        Ok(())
    }

    /// Remove the outermost 802.1Q tag, returning its TCI. The
    /// encapsulated ethertype becomes the frame's ethertype.
    pub fn strip_vlan(&mut self) -> Result<u16, FrameError> {
        if self.ether_type() != Some(ETHER_TYPE_VLAN) {
            return Err(FrameError::NotTagged);
        }

        if self.buf.len() < ETHER_HDR_SZ + VLAN_HDR_SZ {
            return Err(FrameError::Truncated);
        }

        let tci = u16::from_be_bytes([self.buf[14], self.buf[15]]);
        let len = self.buf.len();
        self.buf.copy_within(12 + VLAN_HDR_SZ.., 12);
        self.buf.truncate(len - VLAN_HDR_SZ);
        Ok(tci)
    }

    /// Copy the frame and its metadata. Unlike `Clone`, running out of
    /// memory is reported instead of aborting.
    pub fn try_clone(&self) -> Result<Self, FrameError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(self.buf.len())?;
        buf.extend_from_slice(&self.buf);

        Ok(Self {
            buf,
            dev: self.dev.clone(),
            pkt_type: self.pkt_type,
            tag: self.tag,
            if_idx: self.if_idx,
        })
    }
}
