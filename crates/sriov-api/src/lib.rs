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

pub mod cmd;
pub mod mac;
pub mod vf;

pub use cmd::*;
pub use mac::*;
pub use vf::*;

/// The overall version of the administrative API. Anytime a command
/// or one of its request/response types is added, removed, or
/// modified, this number should increment. It carries no semantic
/// meaning other than as a means to verify that the caller and the
/// engine are compiled for the same API.
pub const API_VERSION: u64 = 3;

/// Major version of the package.
pub const MAJOR_VERSION: u64 = 0;
