// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The public API of the engine, re-exported for consumers that only
//! need the types.

pub use ppe_api::*;

/// The size in bytes of one hardware flow table slot. The extended
/// layout is needed to hold the IPv6 and tunnel entries.
#[cfg(feature = "ipv6")]
pub const FOE_ENTRY_SIZE: usize = 80;

/// The size in bytes of one hardware flow table slot.
#[cfg(not(feature = "ipv6"))]
pub const FOE_ENTRY_SIZE: usize = 64;

/// The number of bytes of DMA-visible memory a table of `size` needs.
pub const fn table_bytes(size: TableSize) -> usize {
    size.entries() as usize * FOE_ENTRY_SIZE
}
