// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Flow entry types visible outside of the engine.

use super::MacAddr;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The binding state of a flow entry.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum FoeState {
    /// Hardware is tracking the flow but forwarding it to software.
    #[default]
    Unbind,
    /// Hardware forwards the flow on its own.
    Bind,
    /// A bound TCP flow has seen a FIN and is draining.
    BindTcpFin,
    /// The slot holds no flow.
    Invalid,
}

impl FoeState {
    pub const fn is_bound(&self) -> bool {
        matches!(self, Self::Bind | Self::BindTcpFin)
    }
}

impl Display for FoeState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Unbind => "UNBIND",
            Self::Bind => "BIND",
            Self::BindTcpFin => "FIN",
            Self::Invalid => "INVALID",
        };
        write!(f, "{s}")
    }
}

/// The flow entry layout, as named by the packet-type field of the
/// entry's first info block.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum FoeKind {
    Ipv4Hnapt,
    Ipv4DsLite,
    Ipv6Route5T,
    Ipv6SixRd,
}

impl Display for FoeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Ipv4Hnapt => "IPv4 HNAPT",
            Self::Ipv4DsLite => "IPv4 DS-Lite",
            Self::Ipv6Route5T => "IPv6 5T",
            Self::Ipv6SixRd => "IPv6 6RD",
        };
        write!(f, "{s}")
    }
}

/// A human-oriented summary of one flow table slot.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FoeEntryDump {
    pub index: u32,
    pub state: FoeState,
    pub kind: FoeKind,
    /// The flow as hardware learned it.
    pub orig: String,
    /// The flow after rewrite, or the tunnel endpoints.
    pub new: String,
    pub smac: MacAddr,
    pub dmac: MacAddr,
    pub vlan1: u16,
    pub vlan2: u16,
    pub pppoe_id: u16,
    /// Forced egress port index.
    pub fpidx: u8,
    /// Logical destination port for pseudo-interface egress.
    pub act_dp: u16,
    pub ts: u16,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DumpFoeResp {
    pub entry_size: usize,
    pub num_slots: u32,
    pub entries: Vec<FoeEntryDump>,
}
