// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The SR-IOV engine.
//!
//! All code under this namespace is guarded by the `engine` feature flag.

/// Log through a PF's provider.
///
/// This borrows only the `log` field, so it may be used while a VF
/// record is borrowed mutably out of the same PF.
macro_rules! pf_log {
    ($pf:expr, $lvl:ident, $($arg:tt)*) => {
        $pf.log.log(
            $crate::provider::LogLevel::$lvl,
            &::alloc::format!($($arg)*),
        )
    };
}

pub mod backend;
pub mod bitmap;
pub mod cfg;
pub mod ioctl;
pub mod lifecycle;
pub mod macvlan;
pub mod mailbox;
pub mod mbx;
pub mod mdd;
pub mod pf;
pub mod policy;
pub mod regs;
pub mod vf;
pub mod vlan;

use crate::api::ApiError;
use crate::api::MacAddr;
use crate::api::VfIndex;
use alloc::string::String;
use backend::BackendError;

pub use pf::Sriov;

/// The ways in which a request against the engine can fail.
///
/// A failure raised while handling a VF mailbox message never escapes
/// the engine: it becomes a FAILURE reply to that VF and a log line.
/// Administrative callers see these directly, or as an [`ApiError`]
/// once they cross the command boundary.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SriovError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid MAC address: {0}")]
    InvalidAddress(MacAddr),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("no such VF: {0}")]
    NoSuchVf(VfIndex),

    #[error("backend failure: {0}")]
    Backend(BackendError),
}

impl From<BackendError> for SriovError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::RarFull | BackendError::VlvfFull => {
                Self::ResourceExhausted(format!("{e}"))
            }
            _ => Self::Backend(e),
        }
    }
}

impl From<SriovError> for ApiError {
    fn from(e: SriovError) -> Self {
        match e {
            SriovError::InvalidConfig(s) => Self::InvalidConfig(s),
            SriovError::InvalidAddress(mac) => Self::InvalidAddress(mac),
            SriovError::PermissionDenied(s) => Self::PermissionDenied(s),
            SriovError::ResourceExhausted(s) => Self::ResourceExhausted(s),
            SriovError::ProtocolError(s) => Self::ProtocolError(s),
            SriovError::NotSupported(s) => Self::NotSupported(s),
            SriovError::Busy(s) => Self::Busy(s),
            SriovError::NoSuchVf(vf) => Self::NoSuchVf(vf),
            SriovError::Backend(e) => Self::InvalidConfig(format!("{e}")),
        }
    }
}

pub type Result<T> = core::result::Result<T, SriovError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn filter_table_exhaustion_is_resource_exhaustion() {
        let e = SriovError::from(BackendError::RarFull);
        assert!(matches!(e, SriovError::ResourceExhausted(_)));

        let e = SriovError::from(BackendError::Mailbox("timeout"));
        assert_eq!(e, SriovError::Backend(BackendError::Mailbox("timeout")));
    }

    #[test]
    fn api_error_conversion() {
        let e: ApiError = SriovError::Busy("VFs assigned".into()).into();
        assert!(matches!(e, ApiError::Busy(_)));

        let e: ApiError = SriovError::NoSuchVf(VfIndex::new(9)).into();
        assert_eq!(e, ApiError::NoSuchVf(VfIndex::new(9)));
    }
}
