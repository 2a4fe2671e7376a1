// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The administrative command boundary.
//!
//! A host driver receives [`SriovCmdEnvelope`]s from its control
//! interface (an ioctl, a netlink socket, whatever the platform
//! offers) and hands them to [`handle_cmd`]. The reply carries the
//! errno to return and the postcard encoding of the command's
//! `Result`, which the caller decodes with [`decode_resp`].

use super::Sriov;
use super::backend::Backend;
use crate::api::API_VERSION;
use crate::api::ApiError;
use crate::api::CmdOk;
use crate::api::ConfigureSriovReq;
use crate::api::ConfigureSriovResp;
use crate::api::GetVfConfigReq;
use crate::api::ListVfsResp;
use crate::api::NoResp;
use crate::api::SetVfLinkStateReq;
use crate::api::SetVfMacReq;
use crate::api::SetVfRssQueryReq;
use crate::api::SetVfSpoofchkReq;
use crate::api::SetVfTrustReq;
use crate::api::SetVfTxRateReq;
use crate::api::SetVfVlanReq;
use crate::api::SriovCmd;
use crate::api::SriovCmdEnvelope;
use crate::api::SriovStatsSnap;
use crate::api::VfConfigSnapshot;
use alloc::vec::Vec;
use core::result;
use serde::de::DeserializeOwned;

/// What a command hands back across the boundary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CmdReply {
    /// Zero on success, otherwise the errno of the error.
    pub errno: i32,
    /// The serialized `Result<T, ApiError>`.
    pub resp: Vec<u8>,
}

/// A view of an incoming command.
struct CmdEnv<'a> {
    env: &'a SriovCmdEnvelope,
}

impl CmdEnv<'_> {
    /// Return the deserialized request body.
    fn copy_in_req<T: DeserializeOwned>(&self) -> result::Result<T, ApiError> {
        if self.env.req.is_empty() {
            return Err(ApiError::NoRequestBody);
        }

        postcard::from_bytes(&self.env.req)
            .map_err(|e| ApiError::DeserCmdReq(format!("{e}")))
    }
}

// Convert the handler's response to an errno and serialize it.
fn hdlr_resp<T>(resp: result::Result<T, ApiError>) -> CmdReply
where
    T: CmdOk,
{
    let errno = match &resp {
        Ok(_) => 0,
        Err(e) => e.to_errno(),
    };

    match postcard::to_allocvec(&resp) {
        Ok(resp) => CmdReply { errno, resp },

        // We failed to serialize the response. Try to tell the caller
        // why; if even that fails the errno alone has to do.
        Err(e) => {
            let err = ApiError::SerCmdResp(format!("{e}"));
            let errno = err.to_errno();
            let resp = postcard::to_allocvec(&Err::<(), _>(err))
                .unwrap_or_default();
            CmdReply { errno, resp }
        }
    }
}

/// Decode the response half of a [`CmdReply`].
pub fn decode_resp<T: DeserializeOwned>(
    reply: &CmdReply,
) -> result::Result<T, ApiError> {
    match postcard::from_bytes::<result::Result<T, ApiError>>(&reply.resp) {
        Ok(resp) => resp,
        Err(e) => Err(ApiError::DeserCmdResp(format!("{e}"))),
    }
}

fn configure_sriov_hdlr<B: Backend>(
    sriov: &mut Sriov<B>,
    env: &CmdEnv,
) -> result::Result<ConfigureSriovResp, ApiError> {
    let req: ConfigureSriovReq = env.copy_in_req()?;
    let num_vfs = sriov.configure_sriov(req.num_vfs)?;
    Ok(ConfigureSriovResp { num_vfs })
}

fn set_vf_mac_hdlr<B: Backend>(
    sriov: &mut Sriov<B>,
    env: &CmdEnv,
) -> result::Result<NoResp, ApiError> {
    let req: SetVfMacReq = env.copy_in_req()?;
    sriov.set_vf_mac_admin(req.vf, req.mac)?;
    Ok(NoResp::default())
}

fn set_vf_vlan_hdlr<B: Backend>(
    sriov: &mut Sriov<B>,
    env: &CmdEnv,
) -> result::Result<NoResp, ApiError> {
    let req: SetVfVlanReq = env.copy_in_req()?;
    sriov.set_vf_port_vlan(req.vf, req.vlan, req.qos, req.proto)?;
    Ok(NoResp::default())
}

fn set_vf_trust_hdlr<B: Backend>(
    sriov: &mut Sriov<B>,
    env: &CmdEnv,
) -> result::Result<NoResp, ApiError> {
    let req: SetVfTrustReq = env.copy_in_req()?;
    sriov.set_vf_trust(req.vf, req.trusted)?;
    Ok(NoResp::default())
}

fn set_vf_spoofchk_hdlr<B: Backend>(
    sriov: &mut Sriov<B>,
    env: &CmdEnv,
) -> result::Result<NoResp, ApiError> {
    let req: SetVfSpoofchkReq = env.copy_in_req()?;
    sriov.set_vf_spoofchk(req.vf, req.enabled)?;
    Ok(NoResp::default())
}

fn set_vf_link_state_hdlr<B: Backend>(
    sriov: &mut Sriov<B>,
    env: &CmdEnv,
) -> result::Result<NoResp, ApiError> {
    let req: SetVfLinkStateReq = env.copy_in_req()?;
    sriov.set_vf_link_state_admin(req.vf, req.state)?;
    Ok(NoResp::default())
}

fn set_vf_tx_rate_hdlr<B: Backend>(
    sriov: &mut Sriov<B>,
    env: &CmdEnv,
) -> result::Result<NoResp, ApiError> {
    let req: SetVfTxRateReq = env.copy_in_req()?;
    sriov.set_vf_tx_rate(req.vf, req.max_tx_rate)?;
    Ok(NoResp::default())
}

fn set_vf_rss_query_hdlr<B: Backend>(
    sriov: &mut Sriov<B>,
    env: &CmdEnv,
) -> result::Result<NoResp, ApiError> {
    let req: SetVfRssQueryReq = env.copy_in_req()?;
    sriov.set_vf_rss_query_en(req.vf, req.enabled)?;
    Ok(NoResp::default())
}

fn get_vf_config_hdlr<B: Backend>(
    sriov: &Sriov<B>,
    env: &CmdEnv,
) -> result::Result<VfConfigSnapshot, ApiError> {
    let req: GetVfConfigReq = env.copy_in_req()?;
    Ok(sriov.get_vf_config(req.vf)?)
}

fn list_vfs_hdlr<B: Backend>(
    sriov: &Sriov<B>,
) -> result::Result<ListVfsResp, ApiError> {
    Ok(ListVfsResp { vfs: sriov.list_vf_configs() })
}

fn dump_stats_hdlr<B: Backend>(
    sriov: &Sriov<B>,
) -> result::Result<SriovStatsSnap, ApiError> {
    Ok(sriov.stats())
}

/// This is the entry point for all administrative commands. It
/// verifies the API version and then multiplexes the command to its
/// appropriate handler.
pub fn handle_cmd<B: Backend>(
    sriov: &mut Sriov<B>,
    env: &SriovCmdEnvelope,
) -> CmdReply {
    if !env.check_version() {
        let badver = ApiError::BadApiVersion {
            user: env.api_version,
            engine: API_VERSION,
        };
        return hdlr_resp::<()>(Err(badver));
    }

    let env = CmdEnv { env };
    match env.env.cmd {
        SriovCmd::ConfigureSriov => {
            hdlr_resp(configure_sriov_hdlr(sriov, &env))
        }

        SriovCmd::SetVfMac => hdlr_resp(set_vf_mac_hdlr(sriov, &env)),

        SriovCmd::SetVfVlan => hdlr_resp(set_vf_vlan_hdlr(sriov, &env)),

        SriovCmd::SetVfTrust => hdlr_resp(set_vf_trust_hdlr(sriov, &env)),

        SriovCmd::SetVfSpoofchk => {
            hdlr_resp(set_vf_spoofchk_hdlr(sriov, &env))
        }

        SriovCmd::SetVfLinkState => {
            hdlr_resp(set_vf_link_state_hdlr(sriov, &env))
        }

        SriovCmd::SetVfTxRate => {
            hdlr_resp(set_vf_tx_rate_hdlr(sriov, &env))
        }

        SriovCmd::SetVfRssQuery => {
            hdlr_resp(set_vf_rss_query_hdlr(sriov, &env))
        }

        SriovCmd::GetVfConfig => {
            hdlr_resp(get_vf_config_hdlr(sriov, &env))
        }

        SriovCmd::ListVfs => hdlr_resp(list_vfs_hdlr(sriov)),

        SriovCmd::DumpStats => hdlr_resp(dump_stats_hdlr(sriov)),
    }
}
