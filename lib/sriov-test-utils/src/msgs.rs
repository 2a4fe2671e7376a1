// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Builders for the requests a VF driver sends.

use sriov::api::MacAddr;
use sriov::api::MbxApiVersion;
use sriov::api::XcastMode;
use sriov::engine::mbx::MbxMsg;
use sriov::engine::mbx::Opcode;

pub fn reset_req() -> MbxMsg {
    MbxMsg::request(Opcode::Reset, 0)
}

pub fn set_mac_req(mac: MacAddr) -> MbxMsg {
    let mut msg = MbxMsg::request(Opcode::SetMacAddr, 0);
    msg.set_mac(mac);
    msg
}

pub fn set_multicast_req(hashes: &[u16]) -> MbxMsg {
    let mut msg = MbxMsg::request(Opcode::SetMulticast, 0);
    msg.set_hashes(hashes);
    msg
}

pub fn set_vlan_req(vid: u16, add: bool) -> MbxMsg {
    let mut msg = MbxMsg::request(Opcode::SetVlan, u8::from(add));
    msg.set_word(1, u32::from(vid));
    msg
}

pub fn set_lpe_req(max_frame: u32) -> MbxMsg {
    let mut msg = MbxMsg::request(Opcode::SetLpe, 0);
    msg.set_word(1, max_frame);
    msg
}

/// Index 0 drops every MAC-VLAN the VF holds; 1 drops them and adds
/// `mac`; higher indices add.
pub fn set_macvlan_req(idx: u8, mac: MacAddr) -> MbxMsg {
    let mut msg = MbxMsg::request(Opcode::SetMacvlan, idx);
    msg.set_mac(mac);
    msg
}

pub fn api_negotiate_req(api: MbxApiVersion) -> MbxMsg {
    api_negotiate_raw(api.to_wire())
}

pub fn api_negotiate_raw(wire: u32) -> MbxMsg {
    let mut msg = MbxMsg::request(Opcode::ApiNegotiate, 0);
    msg.set_word(1, wire);
    msg
}

pub fn get_queues_req() -> MbxMsg {
    MbxMsg::request(Opcode::GetQueues, 0)
}

pub fn get_reta_req() -> MbxMsg {
    MbxMsg::request(Opcode::GetReta, 0)
}

pub fn get_rss_key_req() -> MbxMsg {
    MbxMsg::request(Opcode::GetRssKey, 0)
}

pub fn xcast_req(mode: XcastMode) -> MbxMsg {
    let mut msg = MbxMsg::request(Opcode::UpdateXcastMode, 0);
    msg.set_word(1, mode as u32);
    msg
}

pub fn get_link_state_req() -> MbxMsg {
    MbxMsg::request(Opcode::GetLinkState, 0)
}
