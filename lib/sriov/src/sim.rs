// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A simulated device for testing the engine.
//!
//! [`SimBackend`] keeps a flat register file and models the parts of
//! the device whose behavior the engine relies on: the receive
//! address table, the VLAN filter and pool filter tables (kept in the
//! register file so that the engine's direct register walks see the
//! same state), the per-VF mailboxes, the PCI SR-IOV capability, and
//! malicious driver detection.
//!
//! The test side of each mailbox plays the VF: [`SimBackend::send`]
//! queues a request and [`SimBackend::replies`] shows what the PF
//! wrote back.

use crate::api::MacAddr;
use crate::api::VfIndex;
use crate::engine::backend::BackendError;
use crate::engine::backend::FilterOps;
use crate::engine::backend::MailboxOps;
use crate::engine::backend::MddOps;
use crate::engine::backend::PciOps;
use crate::engine::backend::RegisterOps;
use crate::engine::backend::VfDevHandle;
use crate::engine::bitmap::VfBitmap;
use crate::engine::cfg::DeviceCfg;
use crate::engine::mbx::MBX_SIZE;
use crate::engine::mbx::MbxMsg;
use crate::engine::regs;
use alloc::collections::BTreeMap;
use alloc::collections::BTreeSet;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

/// The PF's own address, which holds RAR entry 0.
pub const SIM_PF_MAC: MacAddr =
    MacAddr::from_const([0xA8, 0x40, 0x25, 0xFF, 0x00, 0x01]);

/// One filter in the receive address table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RarEntry {
    pub addr: MacAddr,
    pub pool: u32,
}

#[derive(Debug, Default)]
struct SimMailbox {
    /// Requests from the VF, oldest first.
    inbox: VecDeque<MbxMsg>,
    /// Everything the PF wrote, truncated to the length written.
    outbox: Vec<Vec<u32>>,
    rst_pending: bool,
    ack_pending: bool,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AntiSpoof {
    pub mac: bool,
    pub vlan: bool,
    pub ethertype: bool,
}

pub struct SimBackend {
    regs: BTreeMap<u32, u32>,
    /// Every write to each register, in order.
    writes: BTreeMap<u32, Vec<u32>>,
    rar: Vec<Option<RarEntry>>,
    mac_table_syncs: u32,
    anti_spoof: BTreeMap<VfIndex, AntiSpoof>,
    mailboxes: BTreeMap<VfIndex, SimMailbox>,
    num_vf: u16,
    assigned: bool,
    enable_fail: Option<String>,
    mac_del_fail: Option<BackendError>,
    vlan_del_fail: Option<BackendError>,
    next_dev_id: u32,
    outstanding_devs: BTreeSet<u32>,
    reinits: u32,
    mdd_pending: VfBitmap,
    mdd_restored: Vec<VfIndex>,
    mdd_disabled: bool,
}

impl SimBackend {
    pub fn new(cfg: &DeviceCfg) -> Self {
        let mut rar = vec![None; cfg.num_rar_entries as usize];
        if let Some(slot) = rar.first_mut() {
            *slot = Some(RarEntry { addr: SIM_PF_MAC, pool: 0 });
        }

        let mut sim = Self {
            regs: BTreeMap::new(),
            writes: BTreeMap::new(),
            rar,
            mac_table_syncs: 0,
            anti_spoof: BTreeMap::new(),
            mailboxes: BTreeMap::new(),
            num_vf: 0,
            assigned: false,
            enable_fail: None,
            mac_del_fail: None,
            vlan_del_fail: None,
            next_dev_id: 1,
            outstanding_devs: BTreeSet::new(),
            reinits: 0,
            mdd_pending: VfBitmap::default(),
            mdd_restored: Vec::new(),
            mdd_disabled: false,
        };

        // The frame size the PF comes up with.
        let frame = regs::ETH_FRAME_LEN + regs::ETH_FCS_LEN;
        sim.regs.insert(regs::MAXFRS, frame << regs::MHADD_MFS_SHIFT);
        sim
    }

    /// Pretend the PCI layer already has `num_vfs` VFs, as after a
    /// reload of the PF driver.
    pub fn with_pre_existing_vfs(mut self, num_vfs: u16) -> Self {
        self.num_vf = num_vfs;
        self
    }

    // ================================================================
    // Registers
    // ================================================================

    pub fn reg(&self, addr: u32) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    /// Set a register without recording it as an engine write.
    pub fn set_reg(&mut self, addr: u32, val: u32) {
        self.regs.insert(addr, val);
    }

    /// Every value the engine wrote to `addr`, oldest first.
    pub fn reg_writes(&self, addr: u32) -> &[u32] {
        self.writes.get(&addr).map(Vec::as_slice).unwrap_or(&[])
    }

    // ================================================================
    // Filter tables
    // ================================================================

    /// Make the next MAC filter removal fail with `err`.
    pub fn fail_next_mac_del(&mut self, err: BackendError) {
        self.mac_del_fail = Some(err);
    }

    /// Make the next pool removal from a VLAN fail with `err`.
    pub fn fail_next_vlan_del(&mut self, err: BackendError) {
        self.vlan_del_fail = Some(err);
    }

    pub fn rar_entries(
        &self,
    ) -> impl Iterator<Item = (usize, RarEntry)> + '_ {
        self.rar.iter().enumerate().filter_map(|(i, e)| e.map(|e| (i, e)))
    }

    pub fn has_mac_filter(&self, addr: MacAddr, pool: u32) -> bool {
        self.rar_entries().any(|(_, e)| e.addr == addr && e.pool == pool)
    }

    pub fn mac_table_syncs(&self) -> u32 {
        self.mac_table_syncs
    }

    /// Is `pool` a member of VLAN `vid` through a pool filter entry?
    pub fn vlan_has_pool(&self, vid: u16, pool: u32) -> bool {
        let Some(idx) = self.find_vlvf_entry(vid) else {
            return false;
        };
        if self.reg(regs::vlvf(idx)) & regs::VLVF_VIEN == 0 {
            return false;
        }
        let word = self.reg(regs::vlvfb(idx * 2 + pool / 32));
        word & (1 << (pool % 32)) != 0
    }

    /// Is VLAN `vid` accepted by the VLAN filter table at all?
    pub fn vfta_has(&self, vid: u16) -> bool {
        let vid = u32::from(vid);
        self.reg(regs::vfta(vid / 32)) & (1 << (vid % 32)) != 0
    }

    /// Pool filter entries in use.
    pub fn vlvf_in_use(&self) -> usize {
        (0..regs::VLVF_ENTRIES)
            .filter(|i| self.reg(regs::vlvf(*i)) & regs::VLVF_VIEN != 0)
            .count()
    }

    pub fn anti_spoof(&self, vf: VfIndex) -> AntiSpoof {
        self.anti_spoof.get(&vf).copied().unwrap_or_default()
    }

    /// The slot for `vid`: its current entry, or else the highest
    /// empty one. VLAN 0 always uses entry 0.
    fn find_vlvf_slot(&self, vid: u16) -> Result<u32, BackendError> {
        if vid == 0 {
            return Ok(0);
        }

        let want = regs::VLVF_VIEN | u32::from(vid);
        let mut first_empty = None;
        for idx in (1..regs::VLVF_ENTRIES).rev() {
            let vlvf = self.reg(regs::vlvf(idx));
            if vlvf == want {
                return Ok(idx);
            }
            if first_empty.is_none() && vlvf == 0 {
                first_empty = Some(idx);
            }
        }

        first_empty.ok_or(BackendError::VlvfFull)
    }

    // ================================================================
    // Mailbox: the VF side
    // ================================================================

    /// Queue `msg` as a request from `vf`.
    pub fn send(&mut self, vf: VfIndex, msg: MbxMsg) {
        self.mailboxes.entry(vf).or_default().inbox.push_back(msg);
    }

    /// Signal a function level reset of `vf`.
    pub fn raise_reset(&mut self, vf: VfIndex) {
        self.mailboxes.entry(vf).or_default().rst_pending = true;
    }

    /// Signal that `vf` read a PF message.
    pub fn raise_ack(&mut self, vf: VfIndex) {
        self.mailboxes.entry(vf).or_default().ack_pending = true;
    }

    /// Everything the PF wrote to `vf`, oldest first.
    pub fn replies(&self, vf: VfIndex) -> &[Vec<u32>] {
        self.mailboxes
            .get(&vf)
            .map(|m| m.outbox.as_slice())
            .unwrap_or(&[])
    }

    pub fn last_reply(&self, vf: VfIndex) -> Option<&[u32]> {
        self.replies(vf).last().map(Vec::as_slice)
    }

    pub fn clear_replies(&mut self, vf: VfIndex) {
        if let Some(mbx) = self.mailboxes.get_mut(&vf) {
            mbx.outbox.clear();
        }
    }

    // ================================================================
    // PCI
    // ================================================================

    pub fn set_vfs_assigned(&mut self, assigned: bool) {
        self.assigned = assigned;
    }

    /// Make the next SR-IOV enable fail with `msg`.
    pub fn fail_next_enable(&mut self, msg: &str) {
        self.enable_fail = Some(String::from(msg));
    }

    /// VF device references handed out and not yet returned.
    pub fn outstanding_devs(&self) -> usize {
        self.outstanding_devs.len()
    }

    pub fn reinits(&self) -> u32 {
        self.reinits
    }

    // ================================================================
    // MDD
    // ================================================================

    pub fn inject_mdd(&mut self, vf: VfIndex) {
        self.mdd_pending.set(vf);
    }

    pub fn mdd_restored(&self) -> &[VfIndex] {
        &self.mdd_restored
    }

    pub fn mdd_disabled(&self) -> bool {
        self.mdd_disabled
    }
}

impl RegisterOps for SimBackend {
    fn read_reg(&self, addr: u32) -> u32 {
        self.reg(addr)
    }

    fn write_reg(&mut self, addr: u32, val: u32) {
        self.regs.insert(addr, val);
        self.writes.entry(addr).or_default().push(val);
    }

    fn flush(&mut self) {}
}

impl FilterOps for SimBackend {
    fn add_mac_filter(
        &mut self,
        addr: MacAddr,
        pool: u32,
    ) -> Result<usize, BackendError> {
        if addr.is_zero() {
            return Err(BackendError::InvalidParam);
        }

        let (idx, slot) = self
            .rar
            .iter_mut()
            .enumerate()
            .find(|(_, e)| e.is_none())
            .ok_or(BackendError::RarFull)?;
        *slot = Some(RarEntry { addr, pool });
        Ok(idx)
    }

    fn del_mac_filter(
        &mut self,
        addr: MacAddr,
        pool: u32,
    ) -> Result<(), BackendError> {
        if let Some(err) = self.mac_del_fail.take() {
            return Err(err);
        }

        // Entry 0 is the PF's default filter and is never deleted.
        let slot = self
            .rar
            .iter_mut()
            .skip(1)
            .find(|e| matches!(e, Some(e) if e.addr == addr && e.pool == pool))
            .ok_or(BackendError::NoSuchFilter(addr))?;
        *slot = None;
        Ok(())
    }

    fn full_sync_mac_table(&mut self) {
        self.mac_table_syncs += 1;
    }

    fn set_vfta(
        &mut self,
        vid: u16,
        pool: u32,
        on: bool,
    ) -> Result<(), BackendError> {
        if vid > regs::VLAN_MAX_VID || pool >= 64 {
            return Err(BackendError::InvalidParam);
        }
        if !on {
            if let Some(err) = self.vlan_del_fail.take() {
                return Err(err);
            }
        }

        let vid32 = u32::from(vid);
        let vfta_addr = regs::vfta(vid32 / 32);
        let vfta_bit = 1u32 << (vid32 % 32);
        let mut vfta = self.reg(vfta_addr);
        let vfta_delta = if on { vfta_bit & !vfta } else { vfta_bit & vfta };
        vfta ^= vfta_delta;

        let idx = self.find_vlvf_slot(vid)?;
        let word = idx * 2 + pool / 32;
        let mut bits = self.reg(regs::vlvfb(word)) | (1 << (pool % 32));

        if !on {
            bits ^= 1 << (pool % 32);
            if bits == 0 && self.reg(regs::vlvfb(word ^ 1)) == 0 {
                // Clear the VFTA first, then release the entry.
                if vfta_delta != 0 {
                    self.write_reg(vfta_addr, vfta);
                }
                self.write_reg(regs::vlvf(idx), 0);
                self.write_reg(regs::vlvfb(word), 0);
                return Ok(());
            }

            // Other pools still want the VLAN: keep it in the VFTA.
            self.write_reg(regs::vlvf(idx), regs::VLVF_VIEN | vid32);
            self.write_reg(regs::vlvfb(word), bits);
            return Ok(());
        }

        self.write_reg(regs::vlvf(idx), regs::VLVF_VIEN | vid32);
        self.write_reg(regs::vlvfb(word), bits);
        if vfta_delta != 0 {
            self.write_reg(vfta_addr, vfta);
        }
        Ok(())
    }

    fn find_vlvf_entry(&self, vid: u16) -> Option<u32> {
        if vid == 0 {
            return Some(0);
        }

        (1..regs::VLVF_ENTRIES).rev().find(|idx| {
            self.reg(regs::vlvf(*idx)) & regs::VLVF_VLANID_MASK
                == u32::from(vid)
        })
    }

    fn set_mac_anti_spoofing(&mut self, enable: bool, vf: VfIndex) {
        self.anti_spoof.entry(vf).or_default().mac = enable;
    }

    fn set_vlan_anti_spoofing(&mut self, enable: bool, vf: VfIndex) {
        self.anti_spoof.entry(vf).or_default().vlan = enable;
    }

    fn set_ethertype_anti_spoofing(&mut self, enable: bool, vf: VfIndex) {
        self.anti_spoof.entry(vf).or_default().ethertype = enable;
    }
}

impl MailboxOps for SimBackend {
    fn mbx_read(&mut self, vf: VfIndex) -> Result<MbxMsg, BackendError> {
        self.mailboxes
            .get_mut(&vf)
            .and_then(|m| m.inbox.pop_front())
            .ok_or(BackendError::Mailbox("no message pending"))
    }

    fn mbx_write(
        &mut self,
        vf: VfIndex,
        msg: &MbxMsg,
        len: usize,
    ) -> Result<(), BackendError> {
        if len == 0 || len > MBX_SIZE {
            return Err(BackendError::InvalidParam);
        }

        let words = msg.words()[..len].to_vec();
        self.mailboxes.entry(vf).or_default().outbox.push(words);
        Ok(())
    }

    fn mbx_check_for_rst(&mut self, vf: VfIndex) -> bool {
        self.mailboxes
            .get_mut(&vf)
            .is_some_and(|m| core::mem::take(&mut m.rst_pending))
    }

    fn mbx_check_for_msg(&mut self, vf: VfIndex) -> bool {
        self.mailboxes.get(&vf).is_some_and(|m| !m.inbox.is_empty())
    }

    fn mbx_check_for_ack(&mut self, vf: VfIndex) -> bool {
        self.mailboxes
            .get_mut(&vf)
            .is_some_and(|m| core::mem::take(&mut m.ack_pending))
    }
}

impl PciOps for SimBackend {
    fn num_vf(&self) -> u16 {
        self.num_vf
    }

    fn enable_sriov(&mut self, num_vfs: u16) -> Result<(), BackendError> {
        if let Some(msg) = self.enable_fail.take() {
            return Err(BackendError::Pci(msg));
        }

        if self.num_vf != 0 {
            return Err(BackendError::Pci(format!(
                "{} VFs already enabled",
                self.num_vf
            )));
        }

        self.num_vf = num_vfs;
        Ok(())
    }

    fn disable_sriov(&mut self) {
        self.num_vf = 0;
    }

    fn vfs_assigned(&self) -> bool {
        self.assigned
    }

    fn get_vf_dev(&mut self, vf: VfIndex) -> Option<VfDevHandle> {
        if vf.get() >= usize::from(self.num_vf) {
            return None;
        }

        let id = self.next_dev_id;
        self.next_dev_id += 1;
        self.outstanding_devs.insert(id);
        Some(VfDevHandle::new(id))
    }

    fn put_vf_dev(&mut self, dev: VfDevHandle) {
        self.outstanding_devs.remove(&dev.id());
    }

    fn reinit(&mut self) {
        self.reinits += 1;
    }
}

impl MddOps for SimBackend {
    fn mdd_event(&mut self) -> VfBitmap {
        core::mem::take(&mut self.mdd_pending)
    }

    fn restore_mdd_vf(&mut self, vf: VfIndex) {
        self.mdd_restored.push(vf);
    }

    fn disable_mdd(&mut self) {
        self.mdd_disabled = true;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::cfg::MacType;

    fn sim() -> SimBackend {
        SimBackend::new(&DeviceCfg::new(MacType::X550))
    }

    #[test]
    fn vlan_entry_released_with_last_pool() {
        let mut hw = sim();
        hw.set_vfta(100, 3, true).unwrap();
        hw.set_vfta(100, 5, true).unwrap();
        assert!(hw.vfta_has(100));
        assert!(hw.vlan_has_pool(100, 3));
        assert_eq!(hw.find_vlvf_entry(100), Some(regs::VLVF_ENTRIES - 1));

        hw.set_vfta(100, 3, false).unwrap();
        assert!(hw.vfta_has(100));
        assert!(!hw.vlan_has_pool(100, 3));
        assert!(hw.vlan_has_pool(100, 5));

        hw.set_vfta(100, 5, false).unwrap();
        assert!(!hw.vfta_has(100));
        assert_eq!(hw.find_vlvf_entry(100), None);
        assert_eq!(hw.vlvf_in_use(), 0);
    }

    #[test]
    fn vlvf_exhaustion() {
        let mut hw = sim();
        for vid in 1..regs::VLVF_ENTRIES as u16 {
            hw.set_vfta(vid, 0, true).unwrap();
        }
        assert_eq!(hw.set_vfta(999, 0, true), Err(BackendError::VlvfFull));

        // VLAN 0 has its own entry.
        hw.set_vfta(0, 0, true).unwrap();
        assert!(hw.vlan_has_pool(0, 0));
    }

    #[test]
    fn rar_table() {
        let cfg = DeviceCfg {
            num_rar_entries: 3,
            ..DeviceCfg::new(MacType::X540)
        };
        let mut hw = SimBackend::new(&cfg);
        let a = MacAddr::from([2, 0, 0, 0, 0, 1]);
        let b = MacAddr::from([2, 0, 0, 0, 0, 2]);

        assert_eq!(hw.add_mac_filter(a, 0), Ok(1));
        assert_eq!(hw.add_mac_filter(b, 1), Ok(2));
        assert_eq!(hw.add_mac_filter(b, 2), Err(BackendError::RarFull));
        assert_eq!(
            hw.del_mac_filter(a, 1),
            Err(BackendError::NoSuchFilter(a))
        );
        hw.del_mac_filter(a, 0).unwrap();
        assert!(!hw.has_mac_filter(a, 0));
        assert!(hw.has_mac_filter(SIM_PF_MAC, 0));
    }
}
