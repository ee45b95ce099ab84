// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The engine in PPE.
//!
//! All code under this namespace is guarded by the `engine` feature flag.
pub mod bind;
pub mod checksum;
pub mod classify;
pub mod ether;
pub mod flow_table;
pub mod foe;
pub mod frame;
pub mod ifdir;
pub mod ip;
pub mod keepalive;
pub mod parse;
pub mod reason;
pub mod steer;

use core::fmt;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;

pub use classify::Engine;
pub use classify::RxAction;
pub use classify::TxAction;

/// When non-zero, debug messages are emitted.
#[unsafe(no_mangle)]
pub static ppe_debug: AtomicU32 = AtomicU32::new(0);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum LogLevel {
    Note = 1,
    Warn = 2,
}

pub fn debug_enabled() -> bool {
    ppe_debug.load(Ordering::Relaxed) != 0
}

cfg_if! {
    if #[cfg(feature = "std")] {
        #[doc(hidden)]
        pub fn log_args(level: LogLevel, args: fmt::Arguments<'_>) {
            match level {
                LogLevel::Note => std::println!("{args}"),
                LogLevel::Warn => std::println!("ERROR: {args}"),
            }
        }
    } else if #[cfg(feature = "kernel")] {
        unsafe extern "C" {
            /// Supplied by the driver: write one NUL-terminated line to
            /// the console at the given level.
            fn ppe_log(level: u32, msg: *const core::ffi::c_char);
        }

        #[doc(hidden)]
        pub fn log_args(level: LogLevel, args: fmt::Arguments<'_>) {
            let mut out = alloc::string::String::new();
            if fmt::write(&mut out, args).is_err() {
                return;
            }
            out.push('\0');

            let cstr = core::ffi::CStr::from_bytes_with_nul(out.as_bytes());
            if let Ok(cstr) = cstr {
                // Safety: the driver hook only reads the string for
                // the duration of the call.
                unsafe { ppe_log(level as u32, cstr.as_ptr()) };
            }
        }
    } else {
        #[doc(hidden)]
        pub fn log_args(_level: LogLevel, _args: fmt::Arguments<'_>) {}
    }
}

#[macro_export]
macro_rules! dbg_macro {
    ($s:tt) => {
        if $crate::engine::debug_enabled() {
            $crate::engine::log_args(
                $crate::engine::LogLevel::Note,
                format_args!($s),
            );
        }
    };
    ($s:tt, $($arg:tt)*) => {
        if $crate::engine::debug_enabled() {
            $crate::engine::log_args(
                $crate::engine::LogLevel::Note,
                format_args!($s, $($arg)*),
            );
        }
    };
}

#[macro_export]
macro_rules! err_macro {
    ($s:tt) => {
        $crate::engine::log_args(
            $crate::engine::LogLevel::Warn,
            format_args!($s),
        );
    };
    ($s:tt, $($arg:tt)*) => {
        $crate::engine::log_args(
            $crate::engine::LogLevel::Warn,
            format_args!($s, $($arg)*),
        );
    };
}

pub use dbg_macro as dbg;
pub use err_macro as err;
