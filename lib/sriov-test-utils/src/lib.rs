// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub mod msgs;

// Let's make our lives easier and pub use a bunch of stuff.
pub use msgs::*;
pub use sriov::api::LinkState;
pub use sriov::api::MacAddr;
pub use sriov::api::MbxApiVersion;
pub use sriov::api::VfIndex;
pub use sriov::api::XcastMode;
pub use sriov::engine::Sriov;
pub use sriov::engine::SriovError;
pub use sriov::engine::backend::BackendError;
pub use sriov::engine::backend::FilterOps;
pub use sriov::engine::backend::MailboxOps;
pub use sriov::engine::backend::PciOps;
pub use sriov::engine::backend::RegisterOps;
pub use sriov::engine::cfg::DeviceCfg;
pub use sriov::engine::cfg::LinkSpeed;
pub use sriov::engine::cfg::MacType;
pub use sriov::engine::cfg::PfState;
pub use sriov::engine::mbx::MbxMsg;
pub use sriov::engine::mbx::MsgType;
pub use sriov::engine::mbx::Opcode;
pub use sriov::engine::mbx::PF_CONTROL_MSG;
pub use sriov::engine::regs;
pub use sriov::engine::vf::VfState;
pub use sriov::provider::LogLevel;
pub use sriov::provider::Providers;
pub use sriov::provider::RingLog;
pub use sriov::sim::AntiSpoof;
pub use sriov::sim::SimBackend;

/// Assert that a mailbox reply carries exactly the `SUCCESS` or
/// `FAILURE` status, along with `CTS`.
#[macro_export]
macro_rules! assert_reply {
    ($reply:expr, $status:ident) => {
        let hdr = $reply[0];
        let flags = $crate::MsgType::from_bits_truncate(hdr);
        assert_eq!(
            flags,
            $crate::MsgType::$status | $crate::MsgType::CTS,
            "unexpected reply header {:#010x}",
            hdr
        );
    };
}

/// A PF with SR-IOV up on a simulated device, plus the log it writes
/// to.
pub struct PfHarness {
    pub sriov: Sriov<SimBackend>,
    pub log: RingLog,
}

pub fn vf(idx: u16) -> VfIndex {
    VfIndex::new(idx)
}

/// A locally administered unicast address ending in `last`.
pub fn vf_mac(last: u8) -> MacAddr {
    MacAddr::from([0x02, 0x08, 0x20, 0x00, 0x00, last])
}

/// A PF with a 10Gb link up.
pub fn pf_state(cfg: &DeviceCfg) -> PfState {
    let mut pf = PfState::new(cfg);
    pf.link_up = true;
    pf.link_speed = LinkSpeed::Gb10;
    pf
}

/// Bring up `num_vfs` VFs on a `mac_type` device.
pub fn sriov_setup(mac_type: MacType, num_vfs: u16) -> PfHarness {
    let cfg = DeviceCfg::new(mac_type);
    let pf = pf_state(&cfg);
    sriov_setup_with(cfg, pf, num_vfs)
}

/// Bring up `num_vfs` VFs with the given device and PF state. Zero
/// leaves SR-IOV off.
pub fn sriov_setup_with(
    cfg: DeviceCfg,
    pf: PfState,
    num_vfs: u16,
) -> PfHarness {
    let hw = SimBackend::new(&cfg);
    let log = RingLog::new();
    let providers = Providers { log: Box::new(log.clone()) };
    let mut sriov = Sriov::new(hw, cfg, pf, providers);
    if num_vfs > 0 {
        sriov.configure_sriov(num_vfs).expect("enable SR-IOV");
    }
    PfHarness { sriov, log }
}

impl PfHarness {
    pub fn hw(&self) -> &SimBackend {
        self.sriov.backend()
    }

    pub fn hw_mut(&mut self) -> &mut SimBackend {
        self.sriov.backend_mut()
    }

    /// Send `msg` from `vf`, service the mailboxes, and return the
    /// PF's reply.
    pub fn exchange(&mut self, vf: VfIndex, msg: MbxMsg) -> Vec<u32> {
        let before = self.hw().replies(vf).len();
        self.hw_mut().send(vf, msg);
        self.sriov.msg_task();
        let replies = self.hw().replies(vf);
        assert_eq!(replies.len(), before + 1, "expected one reply from PF");
        replies[before].clone()
    }

    /// Run the reset handshake for `vf` and return the reply.
    pub fn reset(&mut self, vf: VfIndex) -> Vec<u32> {
        self.exchange(vf, reset_req())
    }

    /// Reset `vf` and negotiate `api`, leaving it clear to send.
    pub fn bring_up(&mut self, vf: VfIndex, api: MbxApiVersion) {
        self.reset(vf);
        let reply = self.exchange(vf, api_negotiate_req(api));
        assert_reply!(reply, SUCCESS);
    }

    /// Signal a function level reset of `vf` and service it.
    pub fn flr(&mut self, vf: VfIndex) {
        self.hw_mut().raise_reset(vf);
        self.sriov.msg_task();
    }
}
