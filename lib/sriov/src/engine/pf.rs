// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The Physical Function.
//!
//! A [`Sriov`] is the engine's whole world: the device backend, the
//! PF's own state, and (while SR-IOV is up) the VF table and the
//! MAC-VLAN pool. Its methods are spread across the modules of the
//! engine by concern: [`super::lifecycle`], [`super::mailbox`],
//! [`super::policy`], [`super::vlan`], and [`super::mdd`].
//!
//! A `Sriov` is not internally synchronized. The host serializes all
//! calls into it, typically by holding it behind a single lock that
//! both the mailbox service task and the administrative path take.

use super::Result;
use super::SriovError;
use super::backend::Backend;
use super::cfg::Capabilities;
use super::cfg::DeviceCfg;
use super::cfg::LinkSpeed;
use super::cfg::MacType;
use super::cfg::PfState;
use super::macvlan::MacVlanPool;
use super::mbx::MbxMsg;
use super::mbx::MsgType;
use super::mbx::PF_CONTROL_MSG;
use super::regs;
use super::vf::VfRecord;
use super::vf::VfTable;
use crate::api::SriovStatsSnap;
use crate::api::VfIndex;
use crate::provider::LogProvider;
use crate::provider::Providers;
use alloc::boxed::Box;
use alloc::vec::Vec;

bitflags::bitflags! {
    /// Operating mode of the PF.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct PfFlags: u32 {
        const SRIOV_ENABLED = 1 << 0;
        const VMDQ_ENABLED = 1 << 1;
        /// VF to VF traffic is switched internally.
        const SRIOV_L2SWITCH_ENABLE = 1 << 2;
        /// Broadcast and multicast are replicated to every pool.
        const SRIOV_REPLICATION_ENABLE = 1 << 3;
        const MDD_ENABLED = 1 << 4;
        const RSC_CAPABLE = 1 << 5;
        /// Receive side coalescing. Incompatible with SR-IOV.
        const RSC_ENABLED = 1 << 6;
    }
}

/// How the PF's queues are split into pools.
///
/// VF pools come first; the PF's pool sits at `offset`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct VmdqLayout {
    pub offset: u16,
    pub limit: u16,
    pub queues_per_pool: u32,
}

impl VmdqLayout {
    /// The number of pools in use, VFs and PF together.
    pub fn pools(&self) -> u32 {
        u32::from(self.offset) + u32::from(self.limit)
    }
}

/// The traffic class layout promised to the VFs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DcbLayout {
    pub pg_tcs: u8,
    pub pfc_tcs: u8,
    pub vt_mode: bool,
}

/// Look up a VF record through the table field alone, leaving the
/// rest of the PF free to borrow.
pub(crate) fn vf_rec(
    vfs: &Option<VfTable>,
    vf: VfIndex,
) -> Result<&VfRecord> {
    vfs.as_ref().ok_or(SriovError::NoSuchVf(vf))?.get(vf)
}

pub(crate) fn vf_rec_mut(
    vfs: &mut Option<VfTable>,
    vf: VfIndex,
) -> Result<&mut VfRecord> {
    vfs.as_mut().ok_or(SriovError::NoSuchVf(vf))?.get_mut(vf)
}

/// The SR-IOV control plane of one PF.
pub struct Sriov<B: Backend> {
    pub(crate) hw: B,
    pub(crate) cfg: DeviceCfg,
    pub(crate) caps: Capabilities,
    pub(crate) pf: PfState,
    pub(crate) flags: PfFlags,
    pub(crate) vfs: Option<VfTable>,
    pub(crate) macvlans: Option<MacVlanPool>,
    pub(crate) vmdq: VmdqLayout,
    pub(crate) dcb: DcbLayout,
    /// The link speed VF rate limits were last computed against.
    pub(crate) vf_rate_link_speed: u32,
    pub(crate) stats: SriovStatsSnap,
    pub(crate) log: Box<dyn LogProvider>,
}

impl<B: Backend> Sriov<B> {
    pub fn new(
        hw: B,
        cfg: DeviceCfg,
        pf: PfState,
        providers: Providers,
    ) -> Self {
        let caps = cfg.capabilities();
        let mut flags = PfFlags::empty();
        if cfg.mac_type >= MacType::Mac82599 {
            flags |= PfFlags::RSC_CAPABLE | PfFlags::RSC_ENABLED;
        }
        if cfg.mdd && caps.contains(Capabilities::MDD) {
            flags |= PfFlags::MDD_ENABLED;
        }

        Self {
            hw,
            cfg,
            caps,
            pf,
            flags,
            vfs: None,
            macvlans: None,
            vmdq: VmdqLayout::default(),
            dcb: DcbLayout::default(),
            vf_rate_link_speed: 0,
            stats: SriovStatsSnap::default(),
            log: providers.log,
        }
    }

    pub fn backend(&self) -> &B {
        &self.hw
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.hw
    }

    pub fn device_cfg(&self) -> &DeviceCfg {
        &self.cfg
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn pf_state(&self) -> &PfState {
        &self.pf
    }

    pub fn flags(&self) -> PfFlags {
        self.flags
    }

    pub fn vmdq(&self) -> VmdqLayout {
        self.vmdq
    }

    pub fn dcb(&self) -> DcbLayout {
        self.dcb
    }

    /// The number of enabled VFs. Zero means SR-IOV is off.
    pub fn num_vfs(&self) -> usize {
        self.vfs.as_ref().map_or(0, VfTable::len)
    }

    pub fn vf(&self, vf: VfIndex) -> Result<&VfRecord> {
        vf_rec(&self.vfs, vf)
    }

    pub fn vf_table(&self) -> Option<&VfTable> {
        self.vfs.as_ref()
    }

    /// Free slots left in the MAC-VLAN pool.
    pub fn macvlans_free(&self) -> usize {
        self.macvlans.as_ref().map_or(0, MacVlanPool::num_free)
    }

    pub fn stats(&self) -> SriovStatsSnap {
        self.stats
    }

    /// The pool the PF's own traffic uses.
    pub(crate) fn pf_pool(&self) -> u32 {
        u32::from(self.vmdq.offset)
    }

    /// Tell `vf` that PF state has changed. The VF learns whether it
    /// is still clear to send from the CTS bit.
    pub fn ping_vf(&mut self, vf: VfIndex) -> Result<()> {
        let rec = vf_rec(&self.vfs, vf)?;
        let mut hdr = PF_CONTROL_MSG;
        if rec.clear_to_send {
            hdr |= MsgType::CTS.bits();
        }

        self.hw.mbx_write(vf, &MbxMsg::new(hdr), 1)?;
        Ok(())
    }

    pub fn ping_all_vfs(&mut self) {
        let Some(table) = self.vfs.as_ref() else {
            return;
        };

        for vf in table.indices() {
            if let Err(e) = self.ping_vf(vf) {
                pf_log!(self, Warn, "VF {vf}: ping failed: {e}");
            }
        }
    }

    // ================================================================
    // Events from the host's network stack.
    //
    // The PF's own configuration belongs to the host. These hooks keep
    // the engine's copy current and apply whatever VF-visible
    // consequences follow.
    // ================================================================

    /// The PF's link changed.
    pub fn pf_link_update(&mut self, up: bool, speed: LinkSpeed) {
        self.pf.link_up = up;
        self.pf.link_speed = speed;
        self.check_vf_rate_limit();
        self.ping_all_vfs();
    }

    /// The PF was brought administratively up or down.
    pub fn pf_set_down(&mut self, down: bool) {
        self.pf.down = down;
        self.set_all_vfs();
    }

    pub fn pf_set_promisc(&mut self, promisc: bool) {
        self.pf.promisc = promisc;
        let mut fctrl = self.hw.read_reg(regs::FCTRL);
        if promisc {
            fctrl |= regs::FCTRL_UPE;
        } else {
            fctrl &= !regs::FCTRL_UPE;
        }
        self.hw.write_reg(regs::FCTRL, fctrl);
    }

    /// The PF overflowed (or no longer overflows) its VLAN filters.
    pub fn pf_set_vlan_promisc(&mut self, on: bool) {
        self.pf.vlan_promisc = on;
    }

    /// The administrator configured `vid` on the PF.
    pub fn pf_add_vlan(&mut self, vid: u16) -> Result<()> {
        let pool = self.pf_pool();
        self.hw.set_vfta(vid, pool, true)?;
        self.pf.active_vlans.insert(vid);
        Ok(())
    }

    pub fn pf_del_vlan(&mut self, vid: u16) -> Result<()> {
        let pool = self.pf_pool();
        self.pf.active_vlans.remove(&vid);
        self.hw.set_vfta(vid, pool, false)?;
        Ok(())
    }

    /// Replace the PF's own multicast list and resync the shared
    /// multicast table.
    pub fn pf_set_mc_list(&mut self, hashes: &[u16]) {
        self.pf.mc_hashes = hashes.to_vec();
        self.write_mc_addr_list();
    }

    pub fn pf_set_mtu(&mut self, mtu: u32) {
        self.pf.mtu = mtu;
        let want = self.pf.max_frame() + regs::ETH_FCS_LEN;
        let mut maxfrs = self.hw.read_reg(regs::MAXFRS);
        if want > (maxfrs & regs::MHADD_MFS_MASK) >> regs::MHADD_MFS_SHIFT {
            maxfrs &= !regs::MHADD_MFS_MASK;
            maxfrs |= want << regs::MHADD_MFS_SHIFT;
            self.hw.write_reg(regs::MAXFRS, maxfrs);
        }
    }

    /// The PF's traffic class layout changed.
    pub fn pf_set_tcs(&mut self, num_tcs: u8, prio_tc_map: [u8; 8], up: u8) {
        self.pf.num_tcs = num_tcs;
        self.pf.prio_tc_map = prio_tc_map;
        self.pf.default_up = up;
    }

    pub fn pf_set_rss(&mut self, indir_tbl: Vec<u8>, key: [u8; 40]) {
        self.pf.rss_indir_tbl = indir_tbl;
        self.pf.rss_key = key;
    }
}
