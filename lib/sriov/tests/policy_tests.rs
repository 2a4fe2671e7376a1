// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Switch policy tests: VLAN membership, address pinning, MAC-VLANs,
//! rate limits and anti-spoofing, as seen from the switch tables of
//! the simulated device.

use common::*;
use sriov_test_utils as common;
use sriov_test_utils::assert_reply;

// The PF's pool with four VFs.
const PF_POOL: u32 = 4;

#[test]
fn vf_joins_and_leaves_vlan() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v0 = vf(0);
    h.bring_up(v0, MbxApiVersion::V1_1);
    let in_use = h.hw().vlvf_in_use();

    let reply = h.exchange(v0, set_vlan_req(100, true));
    assert_reply!(reply, SUCCESS);
    assert!(h.hw().vfta_has(100));
    assert!(h.hw().vlan_has_pool(100, 0));
    assert_eq!(h.hw().vlvf_in_use(), in_use + 1);

    let reply = h.exchange(v0, set_vlan_req(100, false));
    assert_reply!(reply, SUCCESS);
    assert!(!h.hw().vfta_has(100));
    assert_eq!(h.hw().vlvf_in_use(), in_use);

    // Leaving VLAN 0 is quietly ignored.
    let reply = h.exchange(v0, set_vlan_req(0, false));
    assert_reply!(reply, SUCCESS);
    assert!(h.hw().vlan_has_pool(0, 0));
}

#[test]
fn shared_vlan_outlives_one_member() {
    let mut h = sriov_setup(MacType::X550, 4);
    let (v0, v1) = (vf(0), vf(1));
    h.bring_up(v0, MbxApiVersion::V1_1);
    h.bring_up(v1, MbxApiVersion::V1_1);

    h.exchange(v0, set_vlan_req(150, true));
    h.exchange(v1, set_vlan_req(150, true));

    h.flr(v0);
    assert!(h.hw().vfta_has(150));
    assert!(!h.hw().vlan_has_pool(150, 0));
    assert!(h.hw().vlan_has_pool(150, 1));
}

#[test]
fn flr_drops_vf_only_vlan() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v3 = vf(3);
    h.bring_up(v3, MbxApiVersion::V1_1);
    h.exchange(v3, set_vlan_req(200, true));
    assert!(h.hw().vfta_has(200));

    h.flr(v3);
    assert!(!h.hw().vfta_has(200));
    assert!(!h.hw().vlan_has_pool(200, 3));
}

#[test]
fn flr_keeps_pf_vlan() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v1 = vf(1);
    h.sriov.pf_add_vlan(300).unwrap();
    h.bring_up(v1, MbxApiVersion::V1_1);

    let reply = h.exchange(v1, set_vlan_req(300, true));
    assert_reply!(reply, SUCCESS);
    assert!(h.hw().vlan_has_pool(300, 1));
    assert!(h.hw().vlan_has_pool(300, PF_POOL));

    // The pool entry goes, but the PF still accepts the VLAN.
    h.flr(v1);
    assert!(h.hw().vfta_has(300));
    assert!(!h.hw().vlan_has_pool(300, 1));
}

#[test]
fn promisc_pf_shadows_vf_vlans() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v2 = vf(2);
    h.sriov.pf_set_promisc(true);
    h.bring_up(v2, MbxApiVersion::V1_1);

    h.exchange(v2, set_vlan_req(500, true));
    assert!(h.hw().vlan_has_pool(500, 2));
    assert!(h.hw().vlan_has_pool(500, PF_POOL));

    h.exchange(v2, set_vlan_req(500, false));
    assert!(!h.hw().vfta_has(500));
    assert!(!h.hw().vlan_has_pool(500, PF_POOL));
}

#[test]
fn promisc_shadow_leaves_admin_vlans_alone() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v2 = vf(2);
    h.sriov.pf_set_promisc(true);
    h.sriov.pf_add_vlan(600).unwrap();
    h.bring_up(v2, MbxApiVersion::V1_1);

    h.exchange(v2, set_vlan_req(600, true));
    h.exchange(v2, set_vlan_req(600, false));
    assert!(h.hw().vfta_has(600));
}

#[test]
fn port_vlan() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v1 = vf(1);

    h.sriov.set_vf_port_vlan(v1, 42, 3, 0x8100).unwrap();
    let vmvir = 42 | (3 << regs::VLAN_PRIO_SHIFT) | regs::VMVIR_VLANA_DEFAULT;
    assert_eq!(h.hw().reg(regs::vmvir(1)), vmvir);
    assert!(h.hw().vlan_has_pool(42, 1));
    assert!(!h.hw().vlan_has_pool(0, 1));
    assert_eq!(h.sriov.vf(v1).unwrap().port_vlan(), (42, 3));

    // The VF may not pick its own VLANs any more.
    h.bring_up(v1, MbxApiVersion::V1_1);
    let reply = h.exchange(v1, set_vlan_req(7, true));
    assert_reply!(reply, FAILURE);
    assert!(!h.hw().vfta_has(7));

    // The port VLAN survives the reset.
    assert_eq!(h.hw().reg(regs::vmvir(1)), vmvir);
    assert!(h.hw().vlan_has_pool(42, 1));

    h.sriov.set_vf_port_vlan(v1, 0, 0, 0x8100).unwrap();
    assert_eq!(h.hw().reg(regs::vmvir(1)), 0);
    assert!(h.hw().vlan_has_pool(0, 1));
    assert!(!h.hw().vfta_has(42));
    let vmolr = regs::Vmolr::from_bits_retain(h.hw().reg(regs::vmolr(1)));
    assert!(vmolr.contains(regs::Vmolr::AUPE));
}

#[test]
fn port_vlan_bad_requests() {
    let mut h = sriov_setup(MacType::X550, 2);
    assert!(matches!(
        h.sriov.set_vf_port_vlan(vf(0), 42, 0, 0x88a8),
        Err(SriovError::NotSupported(_))
    ));
    assert!(matches!(
        h.sriov.set_vf_port_vlan(vf(0), 4096, 0, 0x8100),
        Err(SriovError::InvalidConfig(_))
    ));

    // 4095 is reserved and never reaches VMVIR.
    assert!(matches!(
        h.sriov.set_vf_port_vlan(vf(0), 4095, 0, 0x8100),
        Err(SriovError::InvalidConfig(_))
    ));
    assert_eq!(h.hw().reg(regs::vmvir(0)), 0);
    assert_eq!(h.sriov.vf(vf(0)).unwrap().port_vlan(), (0, 0));
    h.sriov.set_vf_port_vlan(vf(0), 4094, 0, 0x8100).unwrap();
    assert!(matches!(
        h.sriov.set_vf_port_vlan(vf(0), 10, 8, 0x8100),
        Err(SriovError::InvalidConfig(_))
    ));
    assert!(matches!(
        h.sriov.set_vf_port_vlan(vf(5), 10, 0, 0x8100),
        Err(SriovError::NoSuchVf(_))
    ));
}

#[test]
fn port_vlan_keeps_vlan0_when_revoke_fails() {
    let mut h = sriov_setup(MacType::X550, 2);
    let v0 = vf(0);
    h.bring_up(v0, MbxApiVersion::V1_1);

    h.hw_mut().fail_next_vlan_del(BackendError::InvalidParam);
    h.sriov.set_vf_port_vlan(v0, 10, 0, 0x8100).unwrap();
    assert!(h.hw().vlan_has_pool(10, 0));
    assert!(h.hw().vlan_has_pool(0, 0));
    assert!(h.log.contains(LogLevel::Warn, "VF 0: leaving VLAN 0 failed"));
}

#[test]
fn failed_filter_removal_is_logged() {
    let mut h = sriov_setup(MacType::X550, 2);
    let v0 = vf(0);
    h.sriov.set_vf_mac_admin(v0, vf_mac(0x40)).unwrap();

    // An FLR already dropped the filter; the reset that follows finds
    // nothing to remove and says nothing about it.
    h.bring_up(v0, MbxApiVersion::V1_1);
    h.flr(v0);
    h.reset(v0);
    assert!(!h.log.contains(LogLevel::Warn, "removing MAC"));

    h.hw_mut().fail_next_mac_del(BackendError::InvalidParam);
    h.sriov.set_vf_mac_admin(v0, vf_mac(0x41)).unwrap();
    assert!(h.log.contains(LogLevel::Warn, "removing MAC"));
    assert!(h.hw().has_mac_filter(vf_mac(0x40), 0));
    assert!(h.hw().has_mac_filter(vf_mac(0x41), 0));
}

#[test]
fn pinned_mac_binds_untrusted_vf() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v0 = vf(0);
    h.sriov.set_vf_mac_admin(v0, vf_mac(0x30)).unwrap();
    h.bring_up(v0, MbxApiVersion::V1_1);

    let reply = h.exchange(v0, set_mac_req(vf_mac(0x31)));
    assert_reply!(reply, FAILURE);
    assert!(h.hw().has_mac_filter(vf_mac(0x30), 0));
    assert!(!h.hw().has_mac_filter(vf_mac(0x31), 0));
    assert!(h.log.contains(LogLevel::Warn, "administratively set MAC"));

    // Asking for the address it already has is fine.
    let reply = h.exchange(v0, set_mac_req(vf_mac(0x30)));
    assert_reply!(reply, SUCCESS);

    // So is anything once trusted.
    h.sriov.set_vf_trust(v0, true).unwrap();
    h.bring_up(v0, MbxApiVersion::V1_1);
    let reply = h.exchange(v0, set_mac_req(vf_mac(0x31)));
    assert_reply!(reply, SUCCESS);
    assert!(!h.hw().has_mac_filter(vf_mac(0x30), 0));
    assert!(h.hw().has_mac_filter(vf_mac(0x31), 0));
}

#[test]
fn vf_mac_must_be_unicast() {
    let mut h = sriov_setup(MacType::X550, 2);
    let v0 = vf(0);
    h.bring_up(v0, MbxApiVersion::V1_1);

    let mcast = MacAddr::from([0x01, 0x00, 0x5E, 0x00, 0x00, 0x01]);
    let reply = h.exchange(v0, set_mac_req(mcast));
    assert_reply!(reply, FAILURE);
    assert_eq!(h.sriov.vf(v0).unwrap().mac(), MacAddr::ZERO);

    assert_eq!(
        h.sriov.set_vf_mac_admin(v0, mcast),
        Err(SriovError::InvalidAddress(mcast))
    );
}

#[test]
fn unpin_mac() {
    let mut h = sriov_setup(MacType::X540, 2);
    let v1 = vf(1);
    h.sriov.set_vf_mac_admin(v1, vf_mac(0x40)).unwrap();
    assert!(h.sriov.vf(v1).unwrap().pf_set_mac());

    h.sriov.set_vf_mac_admin(v1, MacAddr::ZERO).unwrap();
    let rec = h.sriov.vf(v1).unwrap();
    assert!(!rec.pf_set_mac());
    assert_eq!(rec.mac(), MacAddr::ZERO);
    assert!(!h.hw().has_mac_filter(vf_mac(0x40), 1));

    // The VF now picks its own address.
    h.bring_up(v1, MbxApiVersion::V1_1);
    let reply = h.exchange(v1, set_mac_req(vf_mac(0x41)));
    assert_reply!(reply, SUCCESS);
}

#[test]
fn macvlan_pool_exhaustion() {
    let mut cfg = DeviceCfg::new(MacType::X550);
    // Room for two MAC-VLANs with four VFs.
    cfg.num_rar_entries = 22;
    let pf = pf_state(&cfg);
    let mut h = sriov_setup_with(cfg, pf, 4);
    assert_eq!(h.sriov.macvlans_free(), 2);

    let (v0, v1) = (vf(0), vf(1));
    h.bring_up(v0, MbxApiVersion::V1_1);
    h.bring_up(v1, MbxApiVersion::V1_1);

    assert_reply!(h.exchange(v0, set_macvlan_req(1, vf_mac(0x50))), SUCCESS);
    assert_reply!(h.exchange(v0, set_macvlan_req(2, vf_mac(0x51))), SUCCESS);
    assert_eq!(h.sriov.macvlans_free(), 0);

    let reply = h.exchange(v1, set_macvlan_req(1, vf_mac(0x52)));
    assert_reply!(reply, FAILURE);
    assert!(!h.hw().has_mac_filter(vf_mac(0x52), 1));
    assert!(h.log.contains(LogLevel::Warn, "no space for it"));

    // Index one starts the list over.
    assert_reply!(h.exchange(v0, set_macvlan_req(1, vf_mac(0x53))), SUCCESS);
    assert!(!h.hw().has_mac_filter(vf_mac(0x50), 0));
    assert!(h.hw().has_mac_filter(vf_mac(0x53), 0));
    assert_eq!(h.sriov.macvlans_free(), 1);

    // A reset gives everything back.
    h.reset(v0);
    assert_eq!(h.sriov.macvlans_free(), 2);
    assert!(!h.hw().has_mac_filter(vf_mac(0x53), 0));
}

#[test]
fn macvlan_denied_with_pinned_mac() {
    let mut h = sriov_setup(MacType::X550, 2);
    let v0 = vf(0);
    h.sriov.set_vf_mac_admin(v0, vf_mac(0x60)).unwrap();
    h.bring_up(v0, MbxApiVersion::V1_1);

    let reply = h.exchange(v0, set_macvlan_req(1, vf_mac(0x61)));
    assert_reply!(reply, FAILURE);

    // Clearing the list is always allowed.
    let reply = h.exchange(v0, set_macvlan_req(0, MacAddr::ZERO));
    assert_reply!(reply, SUCCESS);
}

#[test]
fn macvlan_lifts_anti_spoofing() {
    let mut h = sriov_setup(MacType::X550, 2);
    let v1 = vf(1);
    h.sriov.set_vf_spoofchk(v1, true).unwrap();
    h.bring_up(v1, MbxApiVersion::V1_1);

    let reply = h.exchange(v1, set_macvlan_req(1, vf_mac(0x70)));
    assert_reply!(reply, SUCCESS);
    let spoof = h.hw().anti_spoof(v1);
    assert!(!spoof.mac);
    assert!(!spoof.vlan);
}

#[test]
fn spoofchk() {
    let mut h = sriov_setup(MacType::X550, 2);
    let v0 = vf(0);

    h.sriov.set_vf_spoofchk(v0, true).unwrap();
    assert_eq!(
        h.hw().anti_spoof(v0),
        AntiSpoof { mac: true, vlan: true, ethertype: true }
    );
    let lldp = h.hw().reg(regs::etqf(regs::ETQF_FILTER_LLDP));
    assert_eq!(lldp & 0xFFFF, regs::ETH_P_LLDP);
    assert_ne!(lldp & regs::ETQF_TX_ANTISPOOF, 0);

    h.sriov.set_vf_spoofchk(v0, false).unwrap();
    assert_eq!(h.hw().anti_spoof(v0), AntiSpoof::default());
    assert!(!h.sriov.vf(v0).unwrap().spoofchk());
}

#[test]
fn spoofchk_without_ethertype_filters() {
    let mut h = sriov_setup(MacType::X540, 2);
    h.sriov.set_vf_spoofchk(vf(1), true).unwrap();
    let spoof = h.hw().anti_spoof(vf(1));
    assert!(spoof.mac && spoof.vlan);
    assert!(!spoof.ethertype);
}

#[test]
fn tx_rate_limit() {
    let mut h = sriov_setup(MacType::X550, 4);
    let v1 = vf(1);

    h.sriov.set_vf_tx_rate(v1, 2000).unwrap();
    assert_eq!(h.hw().reg_writes(regs::RTTDQSEL), [4, 5, 6, 7]);
    assert_eq!(h.hw().reg_writes(regs::RTTBCNRC), [0x8001_4000; 4]);
    assert_eq!(h.sriov.vf(v1).unwrap().tx_rate(), 2000);

    // Out of range in both directions.
    assert!(matches!(
        h.sriov.set_vf_tx_rate(v1, 10),
        Err(SriovError::InvalidConfig(_))
    ));
    assert!(matches!(
        h.sriov.set_vf_tx_rate(v1, 10_001),
        Err(SriovError::InvalidConfig(_))
    ));

    // A speed change drops every limit.
    h.sriov.pf_link_update(true, LinkSpeed::Gb1);
    assert_eq!(h.sriov.vf(v1).unwrap().tx_rate(), 0);
    assert_eq!(h.hw().reg_writes(regs::RTTBCNRC).last(), Some(&0));
    assert!(h.log.contains(LogLevel::Note, "link speed has been changed"));
}

#[test]
fn tx_rate_needs_10gb() {
    let cfg = DeviceCfg::new(MacType::X550);
    let mut pf = pf_state(&cfg);
    pf.link_speed = LinkSpeed::Gb1;
    let mut h = sriov_setup_with(cfg, pf, 2);

    assert!(matches!(
        h.sriov.set_vf_tx_rate(vf(0), 500),
        Err(SriovError::InvalidConfig(_))
    ));
    assert!(h.hw().reg_writes(regs::RTTBCNRC).is_empty());
}

#[test]
fn dcb_locks_vlans() {
    let cfg = DeviceCfg::new(MacType::X550);
    let mut pf = pf_state(&cfg);
    pf.num_tcs = 4;
    pf.prio_tc_map = [0, 0, 1, 1, 2, 2, 3, 3];
    pf.default_up = 5;
    let mut h = sriov_setup_with(cfg, pf, 8);
    let v0 = vf(0);
    h.bring_up(v0, MbxApiVersion::V1_1);

    let reply = h.exchange(v0, set_vlan_req(10, true));
    assert_reply!(reply, FAILURE);

    let reply = h.exchange(v0, get_queues_req());
    assert_reply!(reply, SUCCESS);
    assert_eq!(reply[3], 4);
    assert_eq!(reply[4], 2);
}
