// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use super::API_VERSION;
use super::mac::MacAddr;
use super::vf::LinkState;
use super::vf::VfConfigSnapshot;
use super::vf::VfIndex;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Debug;
use libc::c_int;
use serde::Deserialize;
use serde::Serialize;

/// The administrative commands understood by the engine.
///
/// These are the documented entry points through which an
/// orchestration layer configures SR-IOV; the VFs themselves speak
/// only the mailbox protocol.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(C)]
pub enum SriovCmd {
    ConfigureSriov = 1,  // set the number of VFs, zero disables
    SetVfMac = 10,       // pin (or clear) a VF's MAC address
    SetVfVlan = 11,      // set (or clear) a VF's port VLAN and QoS
    SetVfTrust = 12,     // mark a VF trusted or untrusted
    SetVfSpoofchk = 13,  // toggle MAC/VLAN anti-spoofing for a VF
    SetVfLinkState = 14, // force a VF's link state
    SetVfTxRate = 15,    // cap a VF's transmit bandwidth
    SetVfRssQuery = 16,  // allow a VF to query RSS state
    GetVfConfig = 20,    // dump one VF's configuration
    ListVfs = 21,        // dump all VF configurations
    DumpStats = 30,      // dump mailbox and MDD counters
}

impl TryFrom<c_int> for SriovCmd {
    type Error = ();

    fn try_from(num: c_int) -> Result<Self, Self::Error> {
        match num {
            1 => Ok(Self::ConfigureSriov),
            10 => Ok(Self::SetVfMac),
            11 => Ok(Self::SetVfVlan),
            12 => Ok(Self::SetVfTrust),
            13 => Ok(Self::SetVfSpoofchk),
            14 => Ok(Self::SetVfLinkState),
            15 => Ok(Self::SetVfTxRate),
            16 => Ok(Self::SetVfRssQuery),
            20 => Ok(Self::GetVfConfig),
            21 => Ok(Self::ListVfs),
            30 => Ok(Self::DumpStats),
            _ => Err(()),
        }
    }
}

/// A command as it crosses the administrative boundary.
///
/// The request body is the postcard encoding of the command's request
/// type, or empty for commands that take none.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SriovCmdEnvelope {
    pub api_version: u64,
    pub cmd: SriovCmd,
    pub req: Vec<u8>,
}

impl SriovCmdEnvelope {
    /// Build an envelope for `cmd` carrying `req`.
    pub fn new<R: Serialize>(cmd: SriovCmd, req: &R) -> Result<Self, ApiError> {
        let req = postcard::to_allocvec(req)
            .map_err(|e| ApiError::SerCmdReq(format!("{e}")))?;
        Ok(Self { api_version: API_VERSION, cmd, req })
    }

    /// Build an envelope for a command without a request body.
    pub fn bare(cmd: SriovCmd) -> Self {
        Self { api_version: API_VERSION, cmd, req: Vec::new() }
    }

    /// Is this the expected API version?
    pub fn check_version(&self) -> bool {
        self.api_version == API_VERSION
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ApiError {
    BadApiVersion {
        user: u64,
        engine: u64,
    },
    Busy(String),
    DeserCmdReq(String),
    DeserCmdResp(String),
    InvalidAddress(MacAddr),
    InvalidConfig(String),

    /// The command expects a request body but none was given.
    NoRequestBody,

    NoSuchVf(VfIndex),
    NotSupported(String),
    PermissionDenied(String),
    ProtocolError(String),
    ResourceExhausted(String),
    SerCmdReq(String),
    SerCmdResp(String),
}

impl ApiError {
    /// Convert to an errno value.
    pub fn to_errno(&self) -> c_int {
        use libc::*;

        match self {
            Self::BadApiVersion { .. } => EPROTO,
            Self::Busy(_) => EBUSY,
            Self::DeserCmdReq(_) => ENOMSG,
            Self::DeserCmdResp(_) => ENOMSG,
            Self::InvalidAddress(_) => EINVAL,
            Self::InvalidConfig(_) => EINVAL,
            Self::NoRequestBody => EINVAL,
            Self::NoSuchVf(_) => EINVAL,
            Self::NotSupported(_) => EOPNOTSUPP,
            Self::PermissionDenied(_) => EPERM,
            Self::ProtocolError(_) => EPROTO,
            Self::ResourceExhausted(_) => ENOSPC,
            Self::SerCmdReq(_) => ENOMSG,
            Self::SerCmdResp(_) => ENOMSG,
        }
    }
}

/// A marker trait indicating a success response type that is returned
/// from a command and may be passed across the API boundary.
pub trait CmdOk: Debug + Serialize {}

impl CmdOk for () {}

/// Indicates no meaningful response value on success.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct NoResp {
    pub unused: u64,
}

impl CmdOk for NoResp {}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConfigureSriovReq {
    /// The number of VFs wanted. Zero tears SR-IOV down.
    pub num_vfs: u16,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConfigureSriovResp {
    /// The number of VFs now enabled.
    pub num_vfs: u16,
}

impl CmdOk for ConfigureSriovResp {}

#[derive(Debug, Deserialize, Serialize)]
pub struct SetVfMacReq {
    pub vf: VfIndex,
    /// The address to pin, or all-zeros to unpin.
    pub mac: MacAddr,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SetVfVlanReq {
    pub vf: VfIndex,
    /// The port VLAN. Zero with zero `qos` removes the port VLAN.
    pub vlan: u16,
    pub qos: u8,
    /// The tag protocol. Only 802.1Q (0x8100) is accepted.
    pub proto: u16,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SetVfTrustReq {
    pub vf: VfIndex,
    pub trusted: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SetVfSpoofchkReq {
    pub vf: VfIndex,
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SetVfLinkStateReq {
    pub vf: VfIndex,
    pub state: LinkState,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SetVfTxRateReq {
    pub vf: VfIndex,
    /// Maximum transmit rate in Mbps; zero removes the cap.
    pub max_tx_rate: u32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SetVfRssQueryReq {
    pub vf: VfIndex,
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GetVfConfigReq {
    pub vf: VfIndex,
}

impl CmdOk for VfConfigSnapshot {}

#[derive(Debug, Deserialize, Serialize)]
pub struct ListVfsResp {
    pub vfs: Vec<VfConfigSnapshot>,
}

impl CmdOk for ListVfsResp {}

/// Counters kept by the mailbox engine.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SriovStatsSnap {
    /// Messages read from VF mailboxes.
    pub msgs_rx: u64,
    /// Replies written with the FAILURE tag.
    pub msgs_failed: u64,
    /// Messages dropped because they were already tagged as answered.
    pub msgs_replayed: u64,
    /// Messages rejected because the VF was not clear to send.
    pub msgs_not_cts: u64,
    /// Messages carrying an opcode the engine does not know.
    pub msgs_unknown: u64,
    /// Reset handshakes completed.
    pub vf_resets: u64,
    /// Function level resets observed.
    pub vf_flrs: u64,
    /// VFs flagged by malicious driver detection.
    pub mdd_events: u64,
}

impl CmdOk for SriovStatsSnap {}
