// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The SR-IOV control plane of a Physical Function.
//!
//! A PF owns the hardware switch that its Virtual Functions sit
//! behind. The VF drivers are untrusted: everything they want from the
//! switch (a MAC filter, a VLAN, a bigger frame size) is asked for
//! over a small per-VF mailbox, and the engine in this crate decides
//! what to grant and programs the switch accordingly. The host
//! administrator drives the same engine through the commands in
//! [`api`], pinning addresses, VLANs and rate limits that no VF can
//! override.
//!
//! The hardware itself is reached only through the traits in
//! [`engine::backend`], which keeps the policy testable against the
//! simulated device in [`sim`].

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg_attr(feature = "engine", macro_use)]
extern crate alloc;

#[cfg(any(feature = "engine", test))]
#[macro_use]
extern crate cfg_if;

#[cfg(any(feature = "api", test))]
pub mod api;
#[cfg(any(feature = "engine", test))]
pub mod engine;
#[cfg(any(feature = "std", test))]
pub mod print;
#[cfg(any(feature = "engine", test))]
pub mod provider;
#[cfg(any(feature = "test-help", test))]
pub mod sim;

/// Return a mask with the low `width` bits set.
pub const fn low_mask(width: u32) -> u32 {
    if width >= 32 { u32::MAX } else { (1 << width) - 1 }
}
