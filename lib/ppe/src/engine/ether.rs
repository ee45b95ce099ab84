// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Ethernet, 802.1Q and PPPoE session headers.

use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use ppe_api::MacAddr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::network_endian::U16;

pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_VLAN: u16 = 0x8100;
pub const ETHER_TYPE_IPV6: u16 = 0x86DD;
pub const ETHER_TYPE_PPPOE_SES: u16 = 0x8864;

pub const ETHER_HDR_SZ: usize = core::mem::size_of::<EtherHdrRaw>();
pub const VLAN_HDR_SZ: usize = core::mem::size_of::<VlanHdrRaw>();

/// The PPPoE session header plus the two byte PPP protocol field.
pub const PPPOE_HDR_SZ: usize = core::mem::size_of::<PppoeHdrRaw>();

pub const VLAN_VID_MASK: u16 = 0x0FFF;

pub const PPP_IP: u16 = 0x0021;
pub const PPP_IPV6: u16 = 0x0057;

#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum EtherType {
    Ipv4,
    Vlan,
    Ipv6,
    PppoeSession,
    Unknown(u16),
}

impl From<u16> for EtherType {
    fn from(raw: u16) -> Self {
        match raw {
            ETHER_TYPE_IPV4 => Self::Ipv4,
            ETHER_TYPE_VLAN => Self::Vlan,
            ETHER_TYPE_IPV6 => Self::Ipv6,
            ETHER_TYPE_PPPOE_SES => Self::PppoeSession,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<EtherType> for u16 {
    fn from(et: EtherType) -> Self {
        use EtherType::*;

        match et {
            Ipv4 => ETHER_TYPE_IPV4,
            Vlan => ETHER_TYPE_VLAN,
            Ipv6 => ETHER_TYPE_IPV6,
            PppoeSession => ETHER_TYPE_PPPOE_SES,
            Unknown(val) => val,
        }
    }
}

impl Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04X}", u16::from(*self))
    }
}

/// We are never really interested in internal representation of
/// [`EtherType`].
impl Debug for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Note: For now we keep this unaligned to be safe.
#[repr(C)]
#[derive(Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct EtherHdrRaw {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub ether_type: U16,
}

impl EtherHdrRaw {
    pub fn dst_mac(&self) -> MacAddr {
        MacAddr::from(self.dst)
    }

    pub fn src_mac(&self) -> MacAddr {
        MacAddr::from(self.src)
    }
}

/// The 802.1Q tag as it follows the source MAC: the TCI and the
/// ethertype of what it encapsulates.
#[repr(C)]
#[derive(Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct VlanHdrRaw {
    pub tci: U16,
    pub inner_type: U16,
}

impl VlanHdrRaw {
    pub fn vid(&self) -> u16 {
        self.tci.get() & VLAN_VID_MASK
    }
}

#[repr(C)]
#[derive(Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct PppoeHdrRaw {
    pub ver_type: u8,
    pub code: u8,
    pub sid: U16,
    pub length: U16,
    pub ppp_proto: U16,
}

impl PppoeHdrRaw {
    /// Only version 1, type 1 sessions (RFC 2516) are understood.
    pub fn is_v1(&self) -> bool {
        self.ver_type == 0x11
    }
}
