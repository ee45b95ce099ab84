// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Engine configuration.
//!
//! These values are fixed for the lifetime of a running engine. The
//! kernel embedder builds a [`PpeConfig`] from its module parameters;
//! userland tooling loads one from TOML.

use super::PpeError;
use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The SoC hosting the packet processing engine.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Chip {
    Rt3052,
    Rt3352,
    Rt3883,
    #[default]
    Mt7620,
    Mt7621,
}

/// The hardware generation of the engine. The two generations share
/// a table format but disagree on the meaning of the reason codes
/// they attach to frames.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Generation {
    V1,
    V2,
}

impl Chip {
    pub fn generation(&self) -> Generation {
        match self {
            Self::Rt3052 | Self::Rt3352 | Self::Rt3883 => Generation::V1,
            Self::Mt7620 | Self::Mt7621 => Generation::V2,
        }
    }
}

impl Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Rt3052 => "rt3052",
            Self::Rt3352 => "rt3352",
            Self::Rt3883 => "rt3883",
            Self::Mt7620 => "mt7620",
            Self::Mt7621 => "mt7621",
        };
        write!(f, "{s}")
    }
}

/// The number of slots in the flow table.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum TableSize {
    Size1K,
    Size2K,
    Size4K,
    Size8K,
    #[default]
    Size16K,
}

impl TableSize {
    pub const ALL: [Self; 5] = [
        Self::Size1K,
        Self::Size2K,
        Self::Size4K,
        Self::Size8K,
        Self::Size16K,
    ];

    pub const fn entries(&self) -> u32 {
        match self {
            Self::Size1K => 1024,
            Self::Size2K => 2048,
            Self::Size4K => 4096,
            Self::Size8K => 8192,
            Self::Size16K => 16384,
        }
    }
}

impl TryFrom<u32> for TableSize {
    type Error = String;

    fn try_from(val: u32) -> Result<Self, Self::Error> {
        match val {
            1024 => Ok(Self::Size1K),
            2048 => Ok(Self::Size2K),
            4096 => Ok(Self::Size4K),
            8192 => Ok(Self::Size8K),
            16384 => Ok(Self::Size16K),
            _ => Err(format!("unsupported table size: {val}")),
        }
    }
}

impl From<TableSize> for u32 {
    fn from(size: TableSize) -> u32 {
        size.entries()
    }
}

/// Policy and platform description for a running engine.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct PpeConfig {
    pub chip: Chip,

    /// The ASIC revision register. For the RT3052 this is the value
    /// of RF register 0 instead.
    pub asic_rev: u32,

    /// A second GMAC is wired up as a WAN uplink.
    pub dual_gmac: bool,

    /// Accelerate traffic to and from pseudo-interfaces (wireless
    /// virtual APs, PCI/USB uplinks).
    pub wifi_offload: bool,
    pub udp_offload: bool,
    pub ipv6_offload: bool,
    pub mcast_offload: bool,

    /// Commit bound entries in the pre-bind state and let the next
    /// hit promote them.
    pub prebind: bool,

    pub lan_vid: u16,
    pub wan_vid: u16,
    pub table_size: TableSize,

    /// Regenerate TTL/hop-limit on accelerated packets.
    pub ttl_regen: bool,
}

impl Default for PpeConfig {
    fn default() -> Self {
        Self {
            chip: Chip::default(),
            asic_rev: 0,
            dual_gmac: false,
            wifi_offload: false,
            udp_offload: false,
            ipv6_offload: false,
            mcast_offload: false,
            prebind: false,
            lan_vid: 1,
            wan_vid: 2,
            table_size: TableSize::default(),
            ttl_regen: true,
        }
    }
}

impl PpeConfig {
    pub fn generation(&self) -> Generation {
        self.chip.generation()
    }

    /// Does this silicon mishandle UDP datagrams without a checksum?
    pub fn udp_csum_bug(&self) -> bool {
        match self.chip {
            Chip::Rt3052 => self.asic_rev & 0xFF <= 0x53,
            Chip::Rt3352 => self.asic_rev & 0xFFFF < 0x0105,
            Chip::Rt3883 => true,
            Chip::Mt7620 => self.asic_rev & 0xF < 5,
            Chip::Mt7621 => false,
        }
    }

    pub fn validate(&self) -> Result<(), PpeError> {
        for (name, vid) in [("lan_vid", self.lan_vid), ("wan_vid", self.wan_vid)]
        {
            if vid == 0 || vid > 4094 {
                return Err(PpeError::BadConfig(format!(
                    "{name} out of range: {vid}"
                )));
            }
        }

        if self.lan_vid == self.wan_vid {
            return Err(PpeError::BadConfig(format!(
                "lan_vid and wan_vid must differ: {}",
                self.lan_vid
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn udp_bug_by_revision() {
        let mut cfg = PpeConfig { chip: Chip::Mt7620, ..Default::default() };
        cfg.asic_rev = 0x0000_0204;
        assert!(cfg.udp_csum_bug());
        cfg.asic_rev = 0x0000_0205;
        assert!(!cfg.udp_csum_bug());

        cfg.chip = Chip::Rt3052;
        cfg.asic_rev = 0x53;
        assert!(cfg.udp_csum_bug());
        cfg.asic_rev = 0x54;
        assert!(!cfg.udp_csum_bug());

        cfg.chip = Chip::Rt3352;
        cfg.asic_rev = 0x0104;
        assert!(cfg.udp_csum_bug());
        cfg.asic_rev = 0x0105;
        assert!(!cfg.udp_csum_bug());

        cfg.chip = Chip::Rt3883;
        assert!(cfg.udp_csum_bug());
        cfg.chip = Chip::Mt7621;
        assert!(!cfg.udp_csum_bug());
    }

    #[test]
    fn validate_vids() {
        assert!(PpeConfig::default().validate().is_ok());

        let cfg = PpeConfig { lan_vid: 2, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(PpeError::BadConfig(_))));

        let cfg = PpeConfig { wan_vid: 4095, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(PpeError::BadConfig(_))));
    }

    #[test]
    fn table_size_conversion() {
        assert_eq!(TableSize::try_from(4096), Ok(TableSize::Size4K));
        assert!(TableSize::try_from(3000).is_err());
        for size in TableSize::ALL {
            assert_eq!(TableSize::try_from(u32::from(size)), Ok(size));
        }
    }

    #[test]
    fn parse_toml() {
        let cfg: PpeConfig = toml::from_str(
            r#"
            chip = "mt7621"
            dual_gmac = true
            udp_offload = true
            table_size = 4096
            "#,
        )
        .unwrap();

        assert_eq!(cfg.chip, Chip::Mt7621);
        assert!(cfg.dual_gmac);
        assert!(cfg.udp_offload);
        assert_eq!(cfg.table_size, TableSize::Size4K);
        assert_eq!(cfg.lan_vid, 1);
        assert_eq!(cfg.wan_vid, 2);
        assert!(cfg.ttl_regen);

        let res: Result<PpeConfig, _> = toml::from_str("table_size = 1000");
        assert!(res.is_err());
    }
}
