// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types for calculating the internet checksum.
//!
//! The [`Checksum`] type provides a rolling one's complement sum,
//! used to incrementally patch header checksums when the keepalive
//! path rewrites addresses and ports in place (RFC 1624).
//!
//! # Checksums and Endianness
//!
//! The checksum field is a pair of bytes, not a logical integer.
//! Every 16-bit word being summed is read with `from_ne_bytes()` and
//! the result is written back with `to_ne_bytes()`, so the bytes stay
//! in network order no matter which byte order the CPU uses (RFC 1071
//! §1.B).

/// The checksum value, as it is contained in a network header.
///
/// This holds the header bytes, which is to say the one's complement
/// of the one's complement sum.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderChecksum {
    inner: [u8; 2],
}

impl HeaderChecksum {
    /// Return the bytes of this header checksum.
    pub fn bytes(&self) -> [u8; 2] {
        self.inner
    }

    /// Wrap the checksum bytes found in a header.
    pub fn wrap(hc: [u8; 2]) -> Self {
        Self { inner: hc }
    }

    /// Is this the "no checksum" value a UDP sender may use?
    pub fn is_zero(&self) -> bool {
        self.inner == [0, 0]
    }
}

impl From<Checksum> for HeaderChecksum {
    /// Finalize the rolling checksum and put it into header form by
    /// performing one's complement.
    fn from(mut csum: Checksum) -> HeaderChecksum {
        Self { inner: (!csum.finalize()).to_ne_bytes() }
    }
}

/// A rolling one's complement checksum calculation.
///
/// Carries are accumulated in the upper half and only folded back in
/// when the sum is finalized.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    /// Creates a new checksum counter.
    pub fn new() -> Self {
        Self::from(0)
    }

    /// Update the sum by adding the contents of `bytes`.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_add(self.inner, bytes);
    }

    /// Create a new rolling checksum, starting with the passed in
    /// `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        Self { inner: csum_add(0, bytes) }
    }

    /// Update the sum by subtracting the contents of `bytes`.
    pub fn sub_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_sub(self.inner, bytes);
    }

    /// Finalize the sum by adding up all the accumulated carries and
    /// returning the resulting value as a `u16`.
    pub fn finalize(&mut self) -> u16 {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }

        (self.inner & 0xFFFF) as u16
    }
}

impl From<HeaderChecksum> for Checksum {
    // Convert a header's checksum bytes into a rolling checksum.
    fn from(hc: HeaderChecksum) -> Self {
        Self { inner: (!u16::from_ne_bytes(hc.bytes())) as u32 }
    }
}

impl From<u32> for Checksum {
    fn from(csum: u32) -> Self {
        Self { inner: csum }
    }
}

/// Patch the header checksum stored at `csum` after the covered bytes
/// `old` were replaced by `new`. Both slices must have the same, even,
/// length.
///
/// A stored value of zero is left alone when `zero_means_none` is set:
/// a UDP datagram sent without a checksum must stay that way.
pub fn update_in_place(
    csum: &mut [u8],
    old: &[u8],
    new: &[u8],
    zero_means_none: bool,
) {
    if csum.len() != 2 || old == new {
        return;
    }

    let hc = HeaderChecksum::wrap([csum[0], csum[1]]);
    if zero_means_none && hc.is_zero() {
        return;
    }

    let mut sum = Checksum::from(hc);
    sum.sub_bytes(old);
    sum.add_bytes(new);
    let mut out = HeaderChecksum::from(sum).bytes();

    // In UDP an all-zero checksum means "none", so a computed zero is
    // sent as all ones instead (RFC 768).
    if zero_means_none && out == [0, 0] {
        out = [0xFF, 0xFF];
    }
    csum.copy_from_slice(&out);
}

/// Derive the checksum base the engine needs to fix up the outer IPv4
/// checksum of a 6RD flow, from that header's checksum and total
/// length (both in host order).
///
/// The carry fold tests the upper half with a logical AND, so at most
/// one carry is folded per step, and the complements are taken after
/// widening to 32 bits. Hardware expects the value computed exactly
/// this way.
pub fn six_rd_chksum_base(csum: u16, tot_len: u16) -> u16 {
    let mut tmp = (!u32::from(csum)).wrapping_add(!u32::from(tot_len));
    tmp = u32::from((tmp >> 16) != 0) + (tmp & 0xFFFF);
    tmp = u32::from((tmp >> 16) != 0) + (tmp & 0xFFFF);
    (tmp & 0xFFFF) as u16
}

fn csum_add(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    for pair in &mut chunks {
        csum += u16::from_ne_bytes([pair[0], pair[1]]) as u32;
    }

    // A trailing odd byte is summed as if padded with a zero byte.
    if let [last] = chunks.remainder() {
        csum += u16::from_ne_bytes([*last, 0]) as u32;
    }

    csum
}

fn csum_sub(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    for pair in &mut chunks {
        csum += (!u16::from_ne_bytes([pair[0], pair[1]])) as u32;
    }

    if let [last] = chunks.remainder() {
        csum += (!u16::from_ne_bytes([*last, 0])) as u32;
    }

    csum
}
