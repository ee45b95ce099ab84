// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flow offload classification and binding engine.
//!
//! Frames that the packet processing engine (PPE) hands to software
//! carry a classification tag explaining why. The [`engine`] decides
//! what to do with each of them and, for flows worth accelerating,
//! writes the hardware flow entry that lets the rest of the flow
//! bypass software.

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]
// Enable features needed for USDT, if needed.
#![cfg_attr(all(feature = "usdt", not(usdt_stable_asm)), feature(asm))]
#![cfg_attr(
    all(feature = "usdt", target_os = "macos", not(usdt_stable_asm_sym)),
    feature(asm_sym)
)]

#[cfg_attr(feature = "engine", macro_use)]
extern crate alloc;

#[cfg(any(feature = "engine", feature = "kernel"))]
#[macro_use]
extern crate cfg_if;

#[cfg(any(feature = "api", test))]
pub mod api;
#[cfg(any(feature = "engine", test))]
pub mod ddi;
#[cfg(any(feature = "engine", test))]
pub mod engine;
#[cfg(any(feature = "std", test))]
pub mod print;

// ================================================================
// DTrace USDT Provider
//
// Allowing us to use USDT to trace the engine probes when running in
// std/test.
// ================================================================
#[cfg(feature = "usdt")]
#[usdt::provider]
mod ppe_provider {
    fn bind__done(idx: u32, kind: &str, flow: &str) {}
    fn bind__reject(idx: u32, reason: &str) {}
    fn keepalive__unbind(idx: u32) {}
    fn rx__dispatch(idx: u32, reason: u8, action: &str) {}
    fn steer__drop(idx: u32, port: u16, why: &str) {}
    fn tx__dispatch(idx: u32, reason: u8, action: &str) {}
}
