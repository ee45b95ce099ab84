// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! CPU reason codes.
//!
//! The two engine generations both explain, in a one byte code, why
//! a frame was delivered to software. Their numbering and their
//! vocabulary differ, and some numbers mean different things on each.
//! Each generation gets its own enumeration; the dispatcher only ever
//! sees the generation-neutral [`ReasonClass`] a code maps to.

use core::fmt::Debug;
use ppe_api::Chip;
use ppe_api::Generation;

/// What the dispatcher needs to know about a reason code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReasonClass {
    /// The frame did not hash to any entry.
    Unhit,
    /// The frame hit an entry which is not bound.
    Unbind,
    /// The frame hit an unbound entry whose rate crossed the binding
    /// threshold.
    UnbindRateReach,
    /// The frame hit a bound entry marked to always go through the
    /// CPU.
    BindForceToCpu,
    /// First generation keepalive of a bound entry.
    BindKeepalive,
    /// Keepalive, unicast with the original header.
    KeepaliveUcOldHdr,
    /// Keepalive, multicast with the rewritten header.
    KeepaliveMcNewHdr,
    /// Keepalive, a duplicate of a forwarded frame with the original
    /// header.
    KeepaliveDupOldHdr,
    /// A multicast frame the switch cloned to the CPU.
    MulticastToCpu,
    /// A multicast frame the switch cloned to GMAC1 and the CPU.
    MulticastToGmacCpu,
    /// The frame hit an entry in the pre-bind state.
    PreBind,
    Other,
}

pub trait ReasonCode:
    Copy + Debug + Eq + From<u8> + Into<u8> + Send + Sync + 'static
{
    const GENERATION: Generation;

    /// The code for a frame that hit no entry.
    const UNHIT: Self;

    fn class(&self) -> ReasonClass;

    /// Did the frame come back out of the engine on a CPU-facing port
    /// after software sent it in? Such frames carry the steering tag
    /// and must be handed back to the pseudo-interface they belong
    /// to.
    fn is_loopback(&self, chip: Chip, sport: u8) -> bool;
}

macro_rules! reason_codes {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $val:literal,)* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, PartialEq)]
        pub enum $name {
            $($variant,)*
            Unknown(u8),
        }

        impl From<u8> for $name {
            fn from(raw: u8) -> Self {
                match raw {
                    $($val => Self::$variant,)*
                    _ => Self::Unknown(raw),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(reason: $name) -> u8 {
                match reason {
                    $($name::$variant => $val,)*
                    $name::Unknown(raw) => raw,
                }
            }
        }
    };
}

/// RT3052, RT3352 and RT3883.
pub mod v1 {
    use super::*;

    reason_codes! {
        CpuReason {
            Ttl0 = 0x80,
            NotIpv4Hlen5 = 0x90,
            NotTcpUdpL4Ready = 0x91,
            TcpSynFinRst = 0x92,
            UnHit = 0x93,
            HitUnbind = 0x94,
            HitUnbindRateReach = 0x95,
            HitFin = 0x96,
            HitBindTtl1 = 0x97,
            HitBindKeepalive = 0x98,
            HitBindForceToCpu = 0x99,
            AclFoeTblErr = 0x9A,
            AclTblTtl1 = 0x9B,
            AclAlertCpu = 0x9C,
            NoForceDestPort = 0xA0,
            ExceedMtu = 0xA7,
        }
    }

    impl ReasonCode for CpuReason {
        const GENERATION: Generation = Generation::V1;
        const UNHIT: Self = Self::UnHit;

        fn class(&self) -> ReasonClass {
            match self {
                Self::UnHit => ReasonClass::Unhit,
                Self::HitUnbind => ReasonClass::Unbind,
                Self::HitUnbindRateReach => ReasonClass::UnbindRateReach,
                Self::HitBindForceToCpu => ReasonClass::BindForceToCpu,
                Self::HitBindKeepalive => ReasonClass::BindKeepalive,
                _ => ReasonClass::Other,
            }
        }

        fn is_loopback(&self, _chip: Chip, sport: u8) -> bool {
            sport == 0 && *self != Self::HitBindKeepalive
        }
    }
}

/// MT7620 and MT7621.
pub mod v2 {
    use super::*;

    reason_codes! {
        CpuReason {
            Ttl0 = 0x02,
            HasOptionHeader = 0x03,
            NoFlowIsAssigned = 0x07,
            Ipv4WithFragment = 0x08,
            Ipv4HnaptDsliteWithFragment = 0x09,
            Ipv4HnaptDsliteWithoutTcpUdp = 0x0A,
            Ipv6Route6rdWithoutTcpUdp = 0x0B,
            TcpFinSynRst = 0x0C,
            UnHit = 0x0D,
            HitUnbind = 0x0E,
            HitUnbindRateReach = 0x0F,
            HitBindTcpFin = 0x10,
            HitBindTtl1 = 0x11,
            HitBindWithVlanViolation = 0x12,
            HitBindKeepaliveUcOldHdr = 0x13,
            HitBindKeepaliveMcNewHdr = 0x14,
            HitBindKeepaliveDupOldHdr = 0x15,
            HitBindForceToCpu = 0x16,
            HitBindWithOptionHeader = 0x17,
            HitBindMulticastToCpu = 0x18,
            HitBindMulticastToGmacCpu = 0x19,
            HitPreBind = 0x1A,
            HitBindPacketSampling = 0x1B,
            HitBindExceedMtu = 0x1C,
        }
    }

    impl ReasonCode for CpuReason {
        const GENERATION: Generation = Generation::V2;
        const UNHIT: Self = Self::UnHit;

        fn class(&self) -> ReasonClass {
            match self {
                Self::UnHit => ReasonClass::Unhit,
                Self::HitUnbind => ReasonClass::Unbind,
                Self::HitUnbindRateReach => ReasonClass::UnbindRateReach,
                Self::HitBindForceToCpu => ReasonClass::BindForceToCpu,
                Self::HitBindKeepaliveUcOldHdr => {
                    ReasonClass::KeepaliveUcOldHdr
                }
                Self::HitBindKeepaliveMcNewHdr => {
                    ReasonClass::KeepaliveMcNewHdr
                }
                Self::HitBindKeepaliveDupOldHdr => {
                    ReasonClass::KeepaliveDupOldHdr
                }
                Self::HitBindMulticastToCpu => ReasonClass::MulticastToCpu,
                Self::HitBindMulticastToGmacCpu => {
                    ReasonClass::MulticastToGmacCpu
                }
                Self::HitPreBind => ReasonClass::PreBind,
                _ => ReasonClass::Other,
            }
        }

        fn is_loopback(&self, chip: Chip, sport: u8) -> bool {
            match chip {
                // The GMAC port and the PPE port, respectively.
                Chip::Mt7621 => sport == 0 || sport == 5,
                _ => sport == 6,
            }
        }
    }
}

cfg_if! {
    if #[cfg(feature = "hnat-v2")] {
        /// The reason codes of the engine generation compiled in.
        pub type ActiveReason = v2::CpuReason;
    } else {
        /// The reason codes of the engine generation compiled in.
        pub type ActiveReason = v1::CpuReason;
    }
}
