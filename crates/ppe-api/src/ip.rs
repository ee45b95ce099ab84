// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub const PROTO_ICMP: u8 = 0x1;
pub const PROTO_IPIP: u8 = 0x4;
pub const PROTO_TCP: u8 = 0x6;
pub const PROTO_UDP: u8 = 0x11;
pub const PROTO_IPV6: u8 = 0x29;
pub const PROTO_IPV6_FRAG: u8 = 0x2C;
pub const PROTO_GRE: u8 = 0x2F;

/// The L4 protocol carried by an IP header, as far as the offload
/// engine cares about it.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum Protocol {
    TCP,
    UDP,
    /// IPv4 carried in IPv6 (DS-Lite).
    IPIP,
    /// IPv6 carried in IPv4 (6RD).
    IPv6,
    GRE,
    Unknown(u8),
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::TCP => write!(f, "TCP"),
            Protocol::UDP => write!(f, "UDP"),
            Protocol::IPIP => write!(f, "IPIP"),
            Protocol::IPv6 => write!(f, "IPv6"),
            Protocol::GRE => write!(f, "GRE"),
            Protocol::Unknown(proto) => write!(f, "Unknown({proto})"),
        }
    }
}

impl From<u8> for Protocol {
    fn from(proto: u8) -> Self {
        match proto {
            PROTO_TCP => Protocol::TCP,
            PROTO_UDP => Protocol::UDP,
            PROTO_IPIP => Protocol::IPIP,
            PROTO_IPV6 => Protocol::IPv6,
            PROTO_GRE => Protocol::GRE,
            _ => Protocol::Unknown(proto),
        }
    }
}

impl From<Protocol> for u8 {
    fn from(proto: Protocol) -> u8 {
        match proto {
            Protocol::TCP => PROTO_TCP,
            Protocol::UDP => PROTO_UDP,
            Protocol::IPIP => PROTO_IPIP,
            Protocol::IPv6 => PROTO_IPV6,
            Protocol::GRE => PROTO_GRE,
            Protocol::Unknown(v) => v,
        }
    }
}

/// An IPv4 address.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[repr(C)]
pub struct Ipv4Addr {
    inner: [u8; 4],
}

impl Ipv4Addr {
    pub const ANY_ADDR: Self = Self { inner: [0; 4] };

    /// Return the bytes of the address.
    #[inline]
    pub fn bytes(&self) -> [u8; 4] {
        self.inner
    }

    pub const fn from_const(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }
}

impl From<[u8; 4]> for Ipv4Addr {
    fn from(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }
}

impl From<u32> for Ipv4Addr {
    fn from(val: u32) -> Self {
        Self { inner: val.to_be_bytes() }
    }
}

impl From<Ipv4Addr> for u32 {
    fn from(ip: Ipv4Addr) -> u32 {
        u32::from_be_bytes(ip.inner)
    }
}

impl From<core::net::Ipv4Addr> for Ipv4Addr {
    fn from(ip4: core::net::Ipv4Addr) -> Self {
        Self { inner: ip4.octets() }
    }
}

impl From<Ipv4Addr> for core::net::Ipv4Addr {
    fn from(ip4: Ipv4Addr) -> Self {
        Self::from(ip4.inner)
    }
}

impl Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.inner[0], self.inner[1], self.inner[2], self.inner[3],
        )
    }
}

// There's no reason to view the address as its raw array, so just
// present it in a human-friendly manner.
impl Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ipv4Addr {{ inner: {self} }}")
    }
}

/// An IPv6 address.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[repr(C)]
pub struct Ipv6Addr {
    inner: [u8; 16],
}

impl Ipv6Addr {
    pub const ANY_ADDR: Self = Self { inner: [0; 16] };

    /// Return the bytes of the address.
    #[inline]
    pub fn bytes(&self) -> [u8; 16] {
        self.inner
    }

    pub const fn from_const(bytes: [u8; 16]) -> Self {
        Self { inner: bytes }
    }
}

impl From<[u8; 16]> for Ipv6Addr {
    fn from(bytes: [u8; 16]) -> Self {
        Self { inner: bytes }
    }
}

impl From<core::net::Ipv6Addr> for Ipv6Addr {
    fn from(ip6: core::net::Ipv6Addr) -> Self {
        Self { inner: ip6.octets() }
    }
}

impl From<Ipv6Addr> for core::net::Ipv6Addr {
    fn from(ip6: Ipv6Addr) -> Self {
        Self::from(ip6.inner)
    }
}

impl Display for Ipv6Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ip6 = core::net::Ipv6Addr::from(*self);
        write!(f, "{ip6}")
    }
}

impl Debug for Ipv6Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ipv6Addr {{ inner: {self} }}")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn ipv4_u32_conversions() {
        let ip = Ipv4Addr::from([10, 0, 0, 5]);
        assert_eq!(u32::from(ip), 0x0A00_0005);
        assert_eq!(Ipv4Addr::from(0x0A00_0005), ip);
        assert_eq!(ip.to_string(), "10.0.0.5");
    }

    #[test]
    fn ipv6_display() {
        let ip: Ipv6Addr =
            core::net::Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1).into();
        assert_eq!(ip.to_string(), "2001:db8::1");
    }

    #[test]
    fn protocol_round_trip_unknown() {
        assert_eq!(Protocol::from(PROTO_TCP), Protocol::TCP);
        assert_eq!(Protocol::from(0x84), Protocol::Unknown(0x84));
        assert_eq!(u8::from(Protocol::Unknown(0x84)), 0x84);
    }
}
