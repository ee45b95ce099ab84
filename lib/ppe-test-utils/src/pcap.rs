// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Saving the frames a test produced as an Ethernet pcap file.

use pcap_parser::Linktype;
use pcap_parser::ToVec;
use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::pcap::PcapHeader;
use ppe::engine::frame::Frame;
use std::path::Path;

const SNAPLEN_MAX: u32 = 65535;

/// Frames collected in memory until written out.
#[derive(Debug)]
pub struct Capture {
    snaplen: u32,
    // (original length, captured bytes)
    frames: Vec<(u32, Vec<u8>)>,
}

impl Default for Capture {
    fn default() -> Self {
        Self::new()
    }
}

impl Capture {
    pub fn new() -> Self {
        Self::with_snaplen(SNAPLEN_MAX)
    }

    /// A capture that keeps at most `snaplen` bytes of each frame,
    /// as a capture taken with `tcpdump -s` would.
    pub fn with_snaplen(snaplen: u32) -> Self {
        Self { snaplen, frames: vec![] }
    }

    pub fn push(&mut self, frame: &Frame) {
        self.push_bytes(frame.bytes());
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let keep = bytes.len().min(self.snaplen as usize);
        self.frames.push((bytes.len() as u32, bytes[..keep].to_vec()));
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Write the capture to `path`, one second between frames.
    pub fn write(&self, path: &Path) {
        let mut hdr = PcapHeader {
            magic_number: 0xa1b2c3d4,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: self.snaplen,
            network: Linktype::ETHERNET,
        };

        let mut out = hdr.to_vec().unwrap();
        for (i, (origlen, data)) in self.frames.iter().enumerate() {
            let mut block = LegacyPcapBlock {
                ts_sec: i as u32,
                ts_usec: 0,
                caplen: data.len() as u32,
                origlen: *origlen,
                data,
            };
            out.extend_from_slice(&block.to_vec().unwrap());
        }

        std::fs::write(path, out).unwrap();
    }
}
