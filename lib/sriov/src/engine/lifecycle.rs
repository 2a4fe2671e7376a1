// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Bringing SR-IOV up and down.
//!
//! The PF's queues are split into pools, one per VF plus one for the
//! PF after them. How many VFs fit depends on how many traffic
//! classes the PF carries:
//!
//! | PF TCs | max VFs |
//! |--------|---------|
//! | 1      | 63      |
//! | 2..=4  | 31      |
//! | 5..=8  | 15      |
//!
//! The 64th pool always stays with the PF.

use super::Result;
use super::SriovError;
use super::backend::Backend;
use super::cfg::MacType;
use super::macvlan::MacVlanPool;
use super::pf::PfFlags;
use super::pf::Sriov;
use super::pf::vf_rec_mut;
use super::regs;
use super::vf::VfTable;

/// The most VFs ever enabled, whatever the hardware reports.
pub const MAX_VFS_DRV_LIMIT: u16 = 63;
pub const MAX_VFS_1TC: u16 = 63;
pub const MAX_VFS_4TC: u16 = 31;
pub const MAX_VFS_8TC: u16 = 15;

/// Traffic classes available to the VFs when few enough are enabled.
pub const DCB_MAX_TRAFFIC_CLASS: u8 = 8;

impl<B: Backend> Sriov<B> {
    /// Set the number of enabled VFs, tearing SR-IOV down with zero.
    /// Returns the number of VFs now enabled.
    ///
    /// Changing the count of an active configuration is a full disable
    /// followed by an enable. If the old VFs cannot be torn down
    /// because they are assigned to guests, nothing changes.
    pub fn configure_sriov(&mut self, num_vfs: u16) -> Result<u16> {
        if num_vfs == 0 {
            self.pci_sriov_disable()?;
            Ok(0)
        } else {
            self.pci_sriov_enable(num_vfs)
        }
    }

    /// The most VFs the PF's current traffic class layout leaves room
    /// for.
    pub fn max_vfs_for_tcs(&self) -> u16 {
        match self.pf.num_tcs {
            tcs if tcs > 4 => MAX_VFS_8TC,
            tcs if tcs > 1 => MAX_VFS_4TC,
            _ => MAX_VFS_1TC,
        }
    }

    fn check_vf_limit(&self, num_vfs: u16) -> Result<()> {
        let limit = self.max_vfs_for_tcs().min(MAX_VFS_DRV_LIMIT);
        if num_vfs > limit {
            let tcs = self.pf.num_tcs;
            pf_log!(
                self,
                Error,
                "the device is configured with {tcs} TCs; creating more \
                than {limit} VFs is not allowed"
            );
            return Err(SriovError::InvalidConfig(format!(
                "{num_vfs} VFs exceeds the limit of {limit} with {tcs} TCs"
            )));
        }

        Ok(())
    }

    fn pci_sriov_enable(&mut self, num_vfs: u16) -> Result<u16> {
        if !self.cfg.sriov_capable {
            pf_log!(self, Warn, "SR-IOV not supported on this device");
            return Err(SriovError::NotSupported("SR-IOV".into()));
        }

        if self.num_vfs() == usize::from(num_vfs) {
            return Err(SriovError::InvalidConfig(format!(
                "{num_vfs} VFs already enabled"
            )));
        }

        let pre_existing = self.hw.num_vf();
        if pre_existing == num_vfs {
            return Ok(num_vfs);
        }

        self.check_vf_limit(num_vfs)?;

        if pre_existing != 0 || self.num_vfs() != 0 {
            if self.hw.vfs_assigned() {
                return Err(SriovError::Busy(
                    "VFs are assigned to guests".into(),
                ));
            }

            self.disable()?;
            if self.hw.num_vf() != 0 {
                self.hw.disable_sriov();
            }
        }

        if let Err(e) = self.enable(num_vfs) {
            pf_log!(self, Error, "unable to set up VF data storage: {e}");
            if let Err(e) = self.disable() {
                pf_log!(self, Error, "unwinding SR-IOV enable failed: {e}");
            }
            return Err(e);
        }

        // Reset before enabling SR-IOV to avoid mailbox issues.
        self.hw.reinit();

        if let Err(e) = self.hw.enable_sriov(num_vfs) {
            pf_log!(self, Warn, "failed to enable PCI SR-IOV: {e}");
            if let Err(e) = self.disable() {
                pf_log!(self, Error, "unwinding SR-IOV enable failed: {e}");
            }
            return Err(e.into());
        }

        self.get_vfs();
        Ok(num_vfs)
    }

    fn pci_sriov_disable(&mut self) -> Result<()> {
        if self.num_vfs() == 0 && self.hw.num_vf() == 0 {
            return Err(SriovError::InvalidConfig(
                "SR-IOV is not enabled".into(),
            ));
        }

        let before = self.flags;
        self.disable()?;

        // Only reinit if the mode actually changed.
        if before != self.flags {
            self.hw.reinit();
        }

        Ok(())
    }

    /// Bring SR-IOV up at attach time with the configured VF count.
    ///
    /// VFs that already exist (because the PF driver was reloaded
    /// under them) win over the configured count.
    pub fn enable_from_cfg(&mut self) -> Result<u16> {
        let pre_existing = self.hw.num_vf();
        if pre_existing == 0 && self.cfg.max_vfs == 0 {
            return Ok(0);
        }

        let num_vfs = if pre_existing != 0 {
            pf_log!(
                self,
                Warn,
                "virtual functions already enabled for this device; \
                please reload all VF drivers to avoid spoofed packet errors"
            );
            pre_existing
        } else {
            let n = self.cfg.max_vfs.min(MAX_VFS_DRV_LIMIT);
            if let Err(e) = self.hw.enable_sriov(n) {
                pf_log!(self, Error, "failed to enable PCI SR-IOV: {e}");
                return Err(e.into());
            }
            n
        };

        if let Err(e) = self.enable(num_vfs) {
            pf_log!(
                self,
                Error,
                "unable to set up VF data storage; SR-IOV disabled"
            );
            if let Err(e) = self.disable() {
                pf_log!(self, Error, "unwinding SR-IOV enable failed: {e}");
            }
            return Err(e);
        }

        self.get_vfs();
        Ok(num_vfs)
    }

    /// Allocate the VF table and carve the switch up for `num_vfs`
    /// VFs.
    ///
    /// This does not touch the PCI capability. On failure the caller
    /// must unwind with [`Sriov::disable`].
    pub fn enable(&mut self, num_vfs: u16) -> Result<()> {
        if num_vfs == 0 {
            return Err(SriovError::InvalidConfig("zero VFs".into()));
        }
        self.check_vf_limit(num_vfs)?;

        // Nothing is touched until the table exists.
        let table = VfTable::new(num_vfs)?;

        self.flags |= PfFlags::SRIOV_ENABLED | PfFlags::VMDQ_ENABLED;
        if self.vmdq.limit == 0 {
            self.vmdq.limit = 1;
        }

        // Switch VF to VF traffic internally (VEB).
        self.hw.write_reg(regs::PFDTXGSWC, regs::PFDTXGSWC_VT_LBEN);

        self.vfs = Some(table);
        self.macvlans =
            MacVlanPool::new(self.cfg.num_rar_entries, num_vfs);
        self.vmdq.offset = num_vfs;
        self.vmdq.queues_per_pool =
            if self.vmdq.pools() > 32 { 2 } else { 4 };

        self.flags |= PfFlags::SRIOV_L2SWITCH_ENABLE
            | PfFlags::SRIOV_REPLICATION_ENABLE;

        let tcs = if self.cfg.mac_type == MacType::Mac82599 && num_vfs < 16 {
            DCB_MAX_TRAFFIC_CLASS
        } else if num_vfs < 32 {
            4
        } else {
            1
        };
        self.dcb.pg_tcs = tcs;
        self.dcb.pfc_tcs = tcs;
        self.dcb.vt_mode = true;

        self.flags.remove(PfFlags::RSC_CAPABLE | PfFlags::RSC_ENABLED);

        self.configure_virtualization();

        pf_log!(self, Note, "SR-IOV enabled with {num_vfs} VFs");
        if self.cfg.mac_type < MacType::X550 {
            pf_log!(self, Note, "configure port vlans to keep your VFs secure");
        }

        Ok(())
    }

    /// Put the device in virtualization mode for the current pool
    /// layout, with the PF as the default pool.
    fn configure_virtualization(&mut self) {
        let pools = self.vmdq.pools();
        let (vt_mode, gpie_mode) = if pools > 32 {
            (regs::GCR_EXT_VT_MODE_64, regs::GPIE_VTMODE_64)
        } else if pools > 16 {
            (regs::GCR_EXT_VT_MODE_32, regs::GPIE_VTMODE_32)
        } else {
            (regs::GCR_EXT_VT_MODE_16, regs::GPIE_VTMODE_16)
        };

        self.hw.write_reg(regs::GCR_EXT, regs::GCR_EXT_MSIX_EN | vt_mode);

        let gpie = self.hw.read_reg(regs::GPIE) & !regs::GPIE_VTMODE_MASK;
        self.hw.write_reg(regs::GPIE, gpie | gpie_mode);

        let mut vt_ctl = self.hw.read_reg(regs::VT_CTL);
        vt_ctl &= !regs::VT_CTL_POOL_MASK;
        vt_ctl |= (self.pf_pool() << regs::VT_CTL_POOL_SHIFT)
            & regs::VT_CTL_POOL_MASK;
        vt_ctl |= regs::VT_CTL_VT_ENABLE | regs::VT_CTL_REPLEN;
        self.hw.write_reg(regs::VT_CTL, vt_ctl);
        self.hw.flush();
    }

    /// Take a reference to the PCI device of every VF.
    fn get_vfs(&mut self) {
        let Some(table) = self.vfs.as_ref() else {
            return;
        };

        for vf in table.indices() {
            let Some(dev) = self.hw.get_vf_dev(vf) else {
                continue;
            };

            match vf_rec_mut(&mut self.vfs, vf) {
                Ok(rec) => rec.vfdev = Some(dev),
                Err(_) => self.hw.put_vf_dev(dev),
            }
        }
    }

    /// Tear SR-IOV down.
    ///
    /// The VF table goes first, so nothing can reach a VF record once
    /// teardown has begun. If the VFs are assigned to guests the
    /// hardware is left in SR-IOV mode (with its VFs idle) and
    /// [`SriovError::Busy`] is returned.
    pub fn disable(&mut self) -> Result<()> {
        if let Some(mut table) = self.vfs.take() {
            for (_, rec) in table.iter_mut() {
                if let Some(dev) = rec.vfdev.take() {
                    self.hw.put_vf_dev(dev);
                }
            }
        }
        self.macvlans = None;

        if !self.flags.contains(PfFlags::SRIOV_ENABLED) {
            return Ok(());
        }

        if self.flags.contains(PfFlags::MDD_ENABLED) {
            self.hw.disable_mdd();
        }

        if self.hw.vfs_assigned() {
            pf_log!(
                self,
                Warn,
                "unloading driver while VFs are assigned; VFs will not be \
                deallocated"
            );
            return Err(SriovError::Busy("VFs are assigned to guests".into()));
        }

        self.hw.disable_sriov();

        // Turn off IOV mode and give the default pool back to pool 0.
        self.hw.write_reg(regs::GCR_EXT, 0);
        let gpie = self.hw.read_reg(regs::GPIE) & !regs::GPIE_VTMODE_MASK;
        self.hw.write_reg(regs::GPIE, gpie);
        let vt_ctl = self.hw.read_reg(regs::VT_CTL) & !regs::VT_CTL_POOL_MASK;
        self.hw.write_reg(regs::VT_CTL, vt_ctl);
        self.hw.flush();

        if self.vmdq.limit == 1 {
            self.flags.remove(PfFlags::VMDQ_ENABLED);
        }
        self.flags.remove(PfFlags::SRIOV_ENABLED);
        self.vmdq.offset = 0;

        Ok(())
    }
}
