// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod cfg;
pub mod foe;
pub mod ip;
pub mod mac;

pub use cfg::*;
pub use foe::*;
pub use ip::*;
pub use mac::*;

/// The overall version of the API. Anytime an API is added, removed,
/// or modified, this number should increment. It lets the tooling
/// verify that it and the engine agree on the shape of the types in
/// this crate.
pub const API_VERSION: u64 = 3;

// The errno values the kernel embedder expects back from a failed
// control-plane call.
pub const EINVAL: i32 = 22;
pub const ENOMEM: i32 = 12;
pub const ENOENT: i32 = 2;
pub const ENODEV: i32 = 19;
pub const ENOSPC: i32 = 28;
pub const EPROTO: i32 = 71;
pub const ERANGE: i32 = 34;

/// Failures of control-plane and table-access operations. The data
/// path never surfaces these; it returns a disposition instead.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PpeError {
    BadApiVersion { user: u64, kernel: u64 },
    BadConfig(String),

    /// A flow index outside of the configured table.
    BadTableIndex { index: u32, size: u32 },

    /// The slot contents do not decode as any known entry layout.
    BadEntry { index: u32, msg: String },

    NoDevice(String),

    /// Both dynamic uplink slots are occupied.
    NoFreeSlot(String),

    System { errno: i32, msg: String },
}

impl PpeError {
    /// Convert to an errno value.
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::BadApiVersion { .. } => EPROTO,
            Self::BadConfig(_) => EINVAL,
            Self::BadTableIndex { .. } => ERANGE,
            Self::BadEntry { .. } => EINVAL,
            Self::NoDevice(_) => ENODEV,
            Self::NoFreeSlot(_) => ENOSPC,
            Self::System { errno, .. } => *errno,
        }
    }
}

impl Display for PpeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadApiVersion { user, kernel } => {
                write!(f, "API version mismatch: user {user} kernel {kernel}")
            }
            Self::BadConfig(msg) => write!(f, "bad config: {msg}"),
            Self::BadTableIndex { index, size } => {
                write!(f, "flow index {index} outside table of {size}")
            }
            Self::BadEntry { index, msg } => {
                write!(f, "bad entry at {index}: {msg}")
            }
            Self::NoDevice(name) => write!(f, "no such device: {name}"),
            Self::NoFreeSlot(name) => {
                write!(f, "no free interface slot for {name}")
            }
            Self::System { errno, msg } => {
                write!(f, "system error {errno}: {msg}")
            }
        }
    }
}

#[cfg(any(feature = "std", test))]
impl std::error::Error for PpeError {}
