// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Mailbox protocol tests.
//!
//! Each test plays one or more VF drivers against a PF running on the
//! simulated device, exchanging messages the way a real VF would and
//! checking both the replies and the switch state left behind.

use common::*;
use sriov_test_utils::assert_reply;
use sriov_test_utils as common;

const PERMADDR_MSG_LEN: usize = 4;

#[test]
fn nothing_but_reset_before_cts() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v0 = vf(0);

    let reply = h.exchange(v0, set_mac_req(vf_mac(1)));
    assert_eq!(reply, [Opcode::SetMacAddr as u32 | MsgType::FAILURE.bits()]);
    assert!(!h.hw().has_mac_filter(vf_mac(1), 0));
    assert_eq!(h.sriov.stats().msgs_not_cts, 1);

    // The VF has no pinned address: the reset succeeds but the VF is
    // told to pick its own.
    let reply = h.reset(v0);
    assert_eq!(reply.len(), PERMADDR_MSG_LEN);
    assert_eq!(reply[0], Opcode::Reset as u32 | MsgType::FAILURE.bits());
    assert_eq!(reply[3], h.sriov.device_cfg().mc_filter_type);

    let rec = h.sriov.vf(v0).unwrap();
    assert_eq!(rec.state(), VfState::Ready);
    assert!(rec.clear_to_send());

    let reply = h.exchange(v0, set_mac_req(vf_mac(1)));
    assert_reply!(reply, SUCCESS);
    assert!(h.hw().has_mac_filter(vf_mac(1), 0));
    assert_eq!(h.sriov.vf(v0).unwrap().mac(), vf_mac(1));
}

#[test]
fn reset_hands_out_pinned_mac() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v1 = vf(1);
    h.sriov.set_vf_mac_admin(v1, vf_mac(0x11)).unwrap();

    let reply = h.reset(v1);
    assert_eq!(reply.len(), PERMADDR_MSG_LEN);
    assert_eq!(reply[0], Opcode::Reset as u32 | MsgType::SUCCESS.bits());
    assert_eq!(MbxMsg::from_words(&reply).mac(), vf_mac(0x11));
    assert!(h.hw().has_mac_filter(vf_mac(0x11), 1));
}

#[test]
fn reset_is_idempotent() {
    let mut h = sriov_setup(MacType::X540, 2);
    let v0 = vf(0);
    h.sriov.set_vf_mac_admin(v0, vf_mac(0x20)).unwrap();

    let first = h.reset(v0);
    let second = h.reset(v0);
    assert_eq!(first, second);

    let filters = h
        .hw()
        .rar_entries()
        .filter(|(_, e)| e.addr == vf_mac(0x20))
        .count();
    assert_eq!(filters, 1);
    assert!(h.hw().vlan_has_pool(0, 0));
    assert_eq!(h.sriov.vf(v0).unwrap().state(), VfState::Ready);
    assert_eq!(h.sriov.stats().vf_resets, 2);

    // The transmit and receive enables for the VF are on.
    assert_ne!(h.hw().reg(regs::vfte(0)) & v0.bit(), 0);
    assert_ne!(h.hw().reg(regs::vfre(0)) & v0.bit(), 0);
}

#[test]
fn flr_revokes_cts() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v2 = vf(2);
    h.sriov.set_vf_mac_admin(v2, vf_mac(0x22)).unwrap();
    h.bring_up(v2, MbxApiVersion::V1_2);
    let reply = h.exchange(v2, set_multicast_req(&[0x123]));
    assert_reply!(reply, SUCCESS);

    h.flr(v2);
    let rec = h.sriov.vf(v2).unwrap();
    assert_eq!(rec.state(), VfState::Resetting);
    assert!(!rec.clear_to_send());
    assert_eq!(rec.api_version(), MbxApiVersion::Unknown);
    assert!(rec.mc_hashes().is_empty());
    assert_eq!(h.sriov.stats().vf_flrs, 1);

    // The pinned MAC survives in the record but its filter is gone
    // until the VF resets.
    assert_eq!(rec.mac(), vf_mac(0x22));
    assert!(!h.hw().has_mac_filter(vf_mac(0x22), 2));

    let reply = h.exchange(v2, get_link_state_req());
    assert_eq!(reply.len(), 1);
    assert_ne!(reply[0] & MsgType::FAILURE.bits(), 0);

    h.reset(v2);
    assert!(h.hw().has_mac_filter(vf_mac(0x22), 2));
}

#[test]
fn api_negotiation() {
    let mut h = sriov_setup(MacType::X550, 2);
    let v0 = vf(0);
    h.reset(v0);

    let reply = h.exchange(v0, api_negotiate_raw(99));
    assert_reply!(reply, FAILURE);
    assert_eq!(
        h.sriov.vf(v0).unwrap().api_version(),
        MbxApiVersion::Unknown
    );
    assert!(h.log.contains(LogLevel::Note, "invalid api version 99"));

    // 2.0 is never agreed to on request.
    let reply = h.exchange(v0, api_negotiate_req(MbxApiVersion::V2_0));
    assert_reply!(reply, FAILURE);

    let reply = h.exchange(v0, api_negotiate_req(MbxApiVersion::V1_3));
    assert_reply!(reply, SUCCESS);
    assert_eq!(h.sriov.vf(v0).unwrap().api_version(), MbxApiVersion::V1_3);
}

#[test]
fn queue_layout() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v0 = vf(0);
    let v1 = vf(1);

    // API 1.0 predates the query.
    h.bring_up(v0, MbxApiVersion::V1_0);
    let reply = h.exchange(v0, get_queues_req());
    assert_reply!(reply, FAILURE);

    h.bring_up(v0, MbxApiVersion::V1_1);
    let reply = h.exchange(v0, get_queues_req());
    assert_reply!(reply, SUCCESS);
    assert_eq!(reply[1], 4);
    assert_eq!(reply[2], 4);
    assert_eq!(reply[3], 0);
    assert_eq!(reply[4], 0);

    // A port VLAN means the VF must strip tags.
    h.sriov.set_vf_port_vlan(v1, 10, 0, 0x8100).unwrap();
    h.bring_up(v1, MbxApiVersion::V1_1);
    let reply = h.exchange(v1, get_queues_req());
    assert_reply!(reply, SUCCESS);
    assert_eq!(reply[3], 1);
}

#[test]
fn unknown_opcode() {
    let mut h = sriov_setup(MacType::X550, 2);
    let v1 = vf(1);
    h.bring_up(v1, MbxApiVersion::V1_2);

    let reply = h.exchange(v1, MbxMsg::new(0x55));
    assert_reply!(reply, FAILURE);
    assert_eq!(h.sriov.stats().msgs_unknown, 1);
    assert!(h.log.contains(LogLevel::Error, "unhandled msg 00000055"));

    // A reset with its info byte set is no reset.
    let reply = h.exchange(v1, MbxMsg::request(Opcode::Reset, 3));
    assert_reply!(reply, FAILURE);
    assert_eq!(h.sriov.stats().vf_resets, 1);
}

#[test]
fn replays_are_dropped() {
    let mut h = sriov_setup(MacType::X550, 2);
    let v0 = vf(0);
    h.bring_up(v0, MbxApiVersion::V1_1);
    let before = h.hw().replies(v0).len();

    let mut stale = set_mac_req(vf_mac(5));
    stale.tag(MsgType::SUCCESS);
    h.hw_mut().send(v0, stale);
    h.sriov.msg_task();

    assert_eq!(h.hw().replies(v0).len(), before);
    assert_eq!(h.sriov.stats().msgs_replayed, 1);
    assert!(!h.hw().has_mac_filter(vf_mac(5), 0));
}

#[test]
fn ack_without_cts_is_refused() {
    let mut h = sriov_setup(MacType::X550, 2);
    let v0 = vf(0);

    h.hw_mut().raise_ack(v0);
    h.sriov.msg_task();
    assert_eq!(h.hw().last_reply(v0), Some(&[MsgType::FAILURE.bits()][..]));

    h.reset(v0);
    let before = h.hw().replies(v0).len();
    h.hw_mut().raise_ack(v0);
    h.sriov.msg_task();
    assert_eq!(h.hw().replies(v0).len(), before);
}

#[test]
fn jumbo_frames_on_82599() {
    let mut h = sriov_setup(MacType::Mac82599, 4);
    let v1 = vf(1);
    h.bring_up(v1, MbxApiVersion::V1_0);
    assert_ne!(h.hw().reg(regs::vfre(0)) & v1.bit(), 0);

    // A legacy VF cannot take jumbo frames: its receive path is shut.
    let reply = h.exchange(v1, set_lpe_req(9000));
    assert_reply!(reply, FAILURE);
    assert_eq!(h.hw().reg(regs::vfre(0)) & v1.bit(), 0);

    // Standard frames bring it back.
    let reply = h.exchange(v1, set_lpe_req(1518));
    assert_reply!(reply, SUCCESS);
    assert_ne!(h.hw().reg(regs::vfre(0)) & v1.bit(), 0);
}

#[test]
fn jumbo_frames_on_x550() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v0 = vf(0);
    h.bring_up(v0, MbxApiVersion::V1_1);

    let reply = h.exchange(v0, set_lpe_req(9000));
    assert_reply!(reply, SUCCESS);
    let maxfrs = h.hw().reg(regs::MAXFRS);
    assert_eq!(maxfrs >> regs::MHADD_MFS_SHIFT, 9000);

    // Nothing past the hardware limit.
    let reply = h.exchange(v0, set_lpe_req(regs::MAX_JUMBO_FRAME_SIZE + 1));
    assert_reply!(reply, FAILURE);
    assert_eq!(h.hw().reg(regs::MAXFRS), maxfrs);
}

#[test]
fn multicast_hashes_fill_the_mta() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v3 = vf(3);
    h.bring_up(v3, MbxApiVersion::V1_1);

    let hashes = [0x000, 0x021, 0xFFF];
    let reply = h.exchange(v3, set_multicast_req(&hashes));
    assert_reply!(reply, SUCCESS);

    for hash in hashes {
        let (reg, bit) = regs::mta_slot(hash);
        assert_ne!(h.hw().reg(regs::mta(reg)) & bit, 0, "hash {hash:#x}");
    }
    let vmolr = h.hw().reg(regs::vmolr(3));
    assert_ne!(vmolr & regs::Vmolr::ROMPE.bits(), 0);

    // Registering nothing clears the VF's share of the table.
    let reply = h.exchange(v3, set_multicast_req(&[]));
    assert_reply!(reply, SUCCESS);
    let (reg, bit) = regs::mta_slot(0x021);
    assert_eq!(h.hw().reg(regs::mta(reg)) & bit, 0);
    let vmolr = h.hw().reg(regs::vmolr(3));
    assert_eq!(vmolr & regs::Vmolr::ROMPE.bits(), 0);
}

#[test]
fn pf_hashes_survive_vf_changes() {
    let mut h = sriov_setup(MacType::X550, 2);
    let v0 = vf(0);
    h.sriov.pf_set_mc_list(&[0x400]);
    h.bring_up(v0, MbxApiVersion::V1_1);

    h.exchange(v0, set_multicast_req(&[0x401]));
    h.exchange(v0, set_multicast_req(&[]));

    let (reg, bit) = regs::mta_slot(0x400);
    assert_ne!(h.hw().reg(regs::mta(reg)) & bit, 0);
}

#[test]
fn rss_query_on_82599() {
    let mut h = sriov_setup(MacType::Mac82599, 2);
    let v0 = vf(0);
    let tbl: Vec<u8> = (0..128).map(|i| (i % 4) as u8).collect();
    let mut key = [0u8; 40];
    key[0] = 0x6D;
    key[39] = 0x5A;
    h.sriov.pf_set_rss(tbl, key);
    h.bring_up(v0, MbxApiVersion::V1_2);

    // Not allowed until the administrator says so.
    let reply = h.exchange(v0, get_reta_req());
    assert_reply!(reply, FAILURE);

    h.sriov.set_vf_rss_query_en(v0, true).unwrap();
    let reply = h.exchange(v0, get_reta_req());
    assert_reply!(reply, SUCCESS);
    assert!(reply[1..=8].iter().all(|w| *w == 0xE4E4_E4E4));

    let reply = h.exchange(v0, get_rss_key_req());
    assert_reply!(reply, SUCCESS);
    let msg = MbxMsg::from_words(&reply);
    assert_eq!(msg.payload_bytes()[..40], key);
}

#[test]
fn rss_query_unsupported_on_x550() {
    let mut h = sriov_setup(MacType::X550, 2);
    assert!(matches!(
        h.sriov.set_vf_rss_query_en(vf(0), true),
        Err(SriovError::NotSupported(_))
    ));

    h.bring_up(vf(0), MbxApiVersion::V1_2);
    let reply = h.exchange(vf(0), get_rss_key_req());
    assert_reply!(reply, FAILURE);
}

#[test]
fn xcast_modes() {
    let mut h = sriov_setup(MacType::X550, 2);
    let v0 = vf(0);

    // Needs API 1.2.
    h.bring_up(v0, MbxApiVersion::V1_1);
    let reply = h.exchange(v0, xcast_req(XcastMode::AllMulti));
    assert_reply!(reply, FAILURE);

    // An untrusted VF gets multicast at most.
    h.bring_up(v0, MbxApiVersion::V1_2);
    let reply = h.exchange(v0, xcast_req(XcastMode::AllMulti));
    assert_reply!(reply, SUCCESS);
    assert_eq!(reply[1], XcastMode::Multi as u32);
    assert_eq!(h.sriov.vf(v0).unwrap().xcast_mode(), XcastMode::Multi);

    // Promiscuous needs API 1.3.
    let reply = h.exchange(v0, xcast_req(XcastMode::Promisc));
    assert_reply!(reply, FAILURE);

    h.sriov.set_vf_trust(v0, true).unwrap();
    h.bring_up(v0, MbxApiVersion::V1_3);

    // ... and a promiscuous PF.
    let reply = h.exchange(v0, xcast_req(XcastMode::Promisc));
    assert_reply!(reply, FAILURE);

    h.sriov.pf_set_promisc(true);
    let reply = h.exchange(v0, xcast_req(XcastMode::Promisc));
    assert_reply!(reply, SUCCESS);
    assert_eq!(reply[1], XcastMode::Promisc as u32);
    let vmolr = regs::Vmolr::from_bits_retain(h.hw().reg(regs::vmolr(0)));
    assert!(vmolr.contains(regs::Vmolr::UPE | regs::Vmolr::MPE));
}

#[test]
fn link_state_query() {
    let mut h = sriov_setup(MacType::X550, 2);
    let v1 = vf(1);
    h.bring_up(v1, MbxApiVersion::V1_2);

    let reply = h.exchange(v1, get_link_state_req());
    assert_reply!(reply, SUCCESS);
    assert_eq!(reply[1], 1);

    h.sriov.set_vf_link_state_admin(v1, LinkState::Disable).unwrap();
    assert_eq!(
        h.hw().last_reply(v1),
        Some(&[PF_CONTROL_MSG][..]),
        "VF should be pinged without CTS"
    );
    assert_eq!(h.hw().reg(regs::vfte(0)) & v1.bit(), 0);

    h.bring_up(v1, MbxApiVersion::V1_2);
    let reply = h.exchange(v1, get_link_state_req());
    assert_reply!(reply, SUCCESS);
    assert_eq!(reply[1], 0);
    assert_eq!(h.hw().reg(regs::vfre(0)) & v1.bit(), 0);
}

#[test]
fn mdd_event_restarts_vf() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v2 = vf(2);
    h.bring_up(v2, MbxApiVersion::V1_2);

    h.hw_mut().inject_mdd(v2);
    h.sriov.msg_task();

    assert_eq!(h.sriov.stats().mdd_events, 1);
    assert!(!h.sriov.vf(v2).unwrap().clear_to_send());
    assert_eq!(h.hw().mdd_restored(), [v2]);
    assert_eq!(
        h.hw().last_reply(v2),
        Some(&[PF_CONTROL_MSG | MsgType::CTS.bits()][..])
    );
    assert!(h.log.contains(LogLevel::Warn, "malicious event on VF 2"));

    // Until it resets the VF is refused.
    let reply = h.exchange(v2, get_link_state_req());
    assert_eq!(reply.len(), 1);

    h.bring_up(v2, MbxApiVersion::V1_2);
    assert!(h.sriov.vf(v2).unwrap().clear_to_send());
}

#[test]
fn mdd_ignored_before_x550() {
    let mut h = sriov_setup(MacType::X540, 2);
    h.bring_up(vf(0), MbxApiVersion::V1_2);
    h.hw_mut().inject_mdd(vf(0));
    h.sriov.msg_task();

    assert_eq!(h.sriov.stats().mdd_events, 0);
    assert!(h.sriov.vf(vf(0)).unwrap().clear_to_send());
}
