// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Per-VF types shared between the engine and its administrative
//! callers.

use super::mac::MacAddr;
use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// The index of a Virtual Function on a given PF.
///
/// This is the VF's pool number from the point of view of the
/// switch fabric. The PF's own pool always sits directly after the
/// last VF.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct VfIndex(u16);

impl VfIndex {
    pub const fn new(idx: u16) -> Self {
        Self(idx)
    }

    #[inline]
    pub const fn get(&self) -> usize {
        self.0 as usize
    }

    /// The switch pool carrying this VF's traffic.
    #[inline]
    pub const fn pool(&self) -> u32 {
        self.0 as u32
    }

    /// Which 32-bit register of a per-VF bitmap register pair holds
    /// this VF's bit.
    #[inline]
    pub const fn reg_offset(&self) -> u32 {
        self.0 as u32 / 32
    }

    /// The bit of this VF inside its bitmap register.
    #[inline]
    pub const fn bit(&self) -> u32 {
        1 << (self.0 as u32 % 32)
    }
}

impl From<u16> for VfIndex {
    fn from(idx: u16) -> Self {
        Self(idx)
    }
}

impl Display for VfIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The administrative link state of a VF, independent of the physical
/// link.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[repr(u8)]
pub enum LinkState {
    /// Follow the state of the PF.
    #[default]
    Auto = 0,
    /// Force the link up.
    Enable = 1,
    /// Force the link down.
    Disable = 2,
}

impl FromStr for LinkState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            lower => Err(format!(
                "unexpected link state {lower} -- expected 'auto', \
                'enable', or 'disable'"
            )),
        }
    }
}

impl Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Enable => "enable",
            Self::Disable => "disable",
        };
        write!(f, "{s}")
    }
}

/// The breadth of receive filtering a VF asks for.
///
/// The discriminants are the values carried on the mailbox.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[repr(u32)]
pub enum XcastMode {
    #[default]
    None = 0,
    Multi = 1,
    AllMulti = 2,
    Promisc = 3,
}

impl TryFrom<u32> for XcastMode {
    type Error = u32;

    fn try_from(val: u32) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(Self::None),
            1 => Ok(Self::Multi),
            2 => Ok(Self::AllMulti),
            3 => Ok(Self::Promisc),
            _ => Err(val),
        }
    }
}

/// A negotiated mailbox API version.
///
/// The wire encoding does not sort by version (2.0 sits between 1.0
/// and 1.1), so compare with the feature predicates below rather than
/// by value.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum MbxApiVersion {
    V1_0,
    V2_0,
    V1_1,
    V1_2,
    V1_3,
    /// No version negotiated since the last reset.
    #[default]
    Unknown,
}

impl MbxApiVersion {
    pub fn to_wire(self) -> u32 {
        match self {
            Self::V1_0 => 0,
            Self::V2_0 => 1,
            Self::V1_1 => 2,
            Self::V1_2 => 3,
            Self::V1_3 => 4,
            Self::Unknown => 5,
        }
    }

    /// The versions a PF will agree to when a VF asks for them.
    pub fn from_negotiation(val: u32) -> Option<Self> {
        match val {
            0 => Some(Self::V1_0),
            2 => Some(Self::V1_1),
            3 => Some(Self::V1_2),
            4 => Some(Self::V1_3),
            _ => None,
        }
    }

    /// Versions able to report their queue layout (`GET_QUEUES`).
    pub fn has_queue_query(self) -> bool {
        matches!(self, Self::V2_0 | Self::V1_1 | Self::V1_2 | Self::V1_3)
    }

    /// Versions that understand jumbo frames on the VF side.
    pub fn has_jumbo(self) -> bool {
        matches!(self, Self::V1_1 | Self::V1_2 | Self::V1_3)
    }

    /// Versions able to query RSS state, link state and xcast mode.
    pub fn has_v1_2_ops(self) -> bool {
        matches!(self, Self::V1_2 | Self::V1_3)
    }

    /// Versions able to request promiscuous xcast mode.
    pub fn has_promisc(self) -> bool {
        matches!(self, Self::V1_3)
    }
}

impl Display for MbxApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::V1_0 => "1.0",
            Self::V2_0 => "2.0",
            Self::V1_1 => "1.1",
            Self::V1_2 => "1.2",
            Self::V1_3 => "1.3",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A read-only projection of a VF's administrative configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VfConfigSnapshot {
    pub vf: VfIndex,
    pub mac: MacAddr,
    pub vlan: u16,
    pub qos: u8,
    /// Maximum transmit rate in Mbps, zero when unlimited.
    pub max_tx_rate: u32,
    pub link_state: LinkState,
    pub spoofchk: bool,
    pub trusted: bool,
    pub rss_query_en: bool,
}
