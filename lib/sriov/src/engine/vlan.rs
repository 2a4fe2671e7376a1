// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! VLAN membership of the VF pools.
//!
//! VLAN filtering is shared by every pool on the switch. The VLAN
//! filter table (VFTA) says whether a VLAN is accepted at all; a VLAN
//! pool filter entry (VLVF) plus its two bitmap words (VLVFB) say
//! which pools receive it. The PF is a pool like any other here, and
//! the hard part is keeping the PF's own membership right while VFs
//! come and go.

use super::Result;
use super::SriovError;
use super::backend::Backend;
use super::cfg::MacType;
use super::pf::Sriov;
use super::pf::vf_rec;
use super::pf::vf_rec_mut;
use super::regs;
use super::regs::Vmolr;
use crate::api::VfIndex;

/// 802.1Q, the only tag protocol a port VLAN may use.
pub const ETH_P_8021Q: u16 = 0x8100;

impl<B: Backend> Sriov<B> {
    /// Add or remove `pool` as a member of VLAN `vid`.
    ///
    /// When the PF itself is listening on `vid`, its membership is
    /// made certain before the VF's is added, so a full VLVF table
    /// can never cost the PF a VLAN it already had.
    pub(crate) fn set_vf_vlan(
        &mut self,
        add: bool,
        vid: u16,
        pool: u32,
    ) -> Result<()> {
        let pf_pool = self.pf_pool();
        let pf_active = self.pf.active_vlans.contains(&vid);

        if add && pf_active {
            self.hw.set_vfta(vid, pf_pool, true)?;
        }

        let res = self.hw.set_vfta(vid, pool, add);
        if add && res.is_ok() {
            return Ok(());
        }

        // Either the add failed or a pool left the VLAN. In both cases
        // the PF may now be holding an entry nobody else needs.
        if pf_active || self.pf.vlan_promisc {
            self.update_pf_promisc_vlvf(vid);
        }

        Ok(res?)
    }

    /// Release the VLVF entry for `vid` if the PF is its only member,
    /// letting the VLAN fall through to the default pool.
    fn update_pf_promisc_vlvf(&mut self, vid: u16) {
        // Entry 0 belongs to VLAN 0 and is never released.
        let idx = match self.hw.find_vlvf_entry(vid) {
            Some(idx) if idx > 0 => idx,
            _ => return,
        };

        let pf_pool = self.pf_pool();
        let word = idx * 2 + pf_pool / 32;
        let others =
            !(1u32 << (pf_pool % 32)) & self.hw.read_reg(regs::vlvfb(word));

        if others == 0 && self.hw.read_reg(regs::vlvfb(word ^ 1)) == 0 {
            if !self.pf.vlan_promisc {
                self.hw.write_reg(regs::vlvfb(word), 0);
            }
            self.hw.write_reg(regs::vlvf(idx), 0);
        }
    }

    /// Remove `vf` from every VLAN it belongs to.
    ///
    /// An entry that still serves another VF keeps its VLAN; an entry
    /// that only the PF still uses is released but the PF keeps the
    /// VLAN through the VFTA; an entry nobody uses any more also
    /// loses its VFTA bit.
    pub(crate) fn clear_vf_vlans(&mut self, vf: VfIndex) {
        let pf_pool = self.pf_pool();
        let pool_mask = !(1u32 << (pf_pool % 32));
        let pf_word = (pf_pool / 32) as usize;
        let vf_mask = vf.bit();

        for i in (0..regs::VLVF_ENTRIES).rev() {
            let word = i * 2 + vf.reg_offset();
            let mut vlvfb = self.hw.read_reg(regs::vlvfb(word));
            if vlvfb & vf_mask == 0 {
                continue;
            }
            vlvfb ^= vf_mask;

            let mut bits = [0u32; 2];
            bits[(word % 2) as usize] = vlvfb;
            bits[((word ^ 1) % 2) as usize] =
                self.hw.read_reg(regs::vlvfb(word ^ 1));

            // Another VF is still a member: just drop ourselves.
            if bits[pf_word ^ 1] != 0 || bits[pf_word] & pool_mask != 0 {
                self.hw.write_reg(regs::vlvfb(word), vlvfb);
                continue;
            }

            // Nobody but possibly the PF is left. Without the PF the
            // VLAN itself goes away.
            if bits[pf_word] == 0 {
                let vlvf = self.hw.read_reg(regs::vlvf(i));
                if vlvf == 0 {
                    self.hw.write_reg(regs::vlvfb(word), vlvfb);
                    continue;
                }

                let vid = vlvf & regs::VLVF_VLANID_MASK;
                let mask = 1u32 << (vid % 32);
                let vfta = self.hw.read_reg(regs::vfta(vid / 32));
                if vfta & mask != 0 {
                    self.hw.write_reg(regs::vfta(vid / 32), vfta ^ mask);
                }
            }

            self.hw.write_reg(regs::vlvf(i), 0);
            if !self.pf.vlan_promisc {
                vlvfb = 0;
            }
            self.hw.write_reg(regs::vlvfb(word), vlvfb);
        }
    }

    /// A VF asked to join or leave VLAN `vid`.
    pub(crate) fn set_vlan_msg(
        &mut self,
        vf: VfIndex,
        vid: u16,
        add: bool,
    ) -> Result<()> {
        let rec = vf_rec(&self.vfs, vf)?;
        if rec.pf_vlan != 0 || self.pf.num_tcs > 0 {
            pf_log!(
                self,
                Warn,
                "VF {vf} attempted to override administratively set VLAN \
                configuration; reload the VF driver to resume operations"
            );
            return Err(SriovError::PermissionDenied(
                "VLAN is administratively set".into(),
            ));
        }

        // VLAN 0 carries untagged traffic and may not be dropped.
        if vid == 0 && !add {
            return Ok(());
        }

        self.set_vf_vlan(add, vid, vf.pool())?;

        // A promiscuous PF shadows the VLANs its VFs use so that it
        // still sees that traffic. It only ever undoes what it did
        // itself: a VLAN the administrator put on the PF stays.
        let pf_pool = self.pf_pool();
        if !self.pf.promisc || self.pf.active_vlans.contains(&vid) {
            return Ok(());
        }

        if add {
            return self.set_vf_vlan(true, vid, pf_pool);
        }

        let Some(idx) = self.hw.find_vlvf_entry(vid) else {
            return Ok(());
        };
        let vlvf = self.hw.read_reg(regs::vlvf(idx));
        if vlvf & regs::VLVF_VLANID_MASK != u32::from(vid) {
            return Ok(());
        }

        let pf_word = idx * 2 + pf_pool / 32;
        let pf_bit = 1u32 << (pf_pool % 32);
        let own = self.hw.read_reg(regs::vlvfb(pf_word));
        let other = self.hw.read_reg(regs::vlvfb(pf_word ^ 1));
        if own & pf_bit != 0 && own & !pf_bit == 0 && other == 0 {
            self.set_vf_vlan(false, vid, pf_pool)?;
        }

        Ok(())
    }

    pub(crate) fn set_vmvir(&mut self, vid: u16, qos: u8, vf: VfIndex) {
        let val = u32::from(vid)
            | (u32::from(qos) << regs::VLAN_PRIO_SHIFT)
            | regs::VMVIR_VLANA_DEFAULT;
        self.hw.write_reg(regs::vmvir(vf.pool()), val);
    }

    pub(crate) fn clear_vmvir(&mut self, vf: VfIndex) {
        self.hw.write_reg(regs::vmvir(vf.pool()), 0);
    }

    /// Reset the offload register of `vf`, accepting broadcast and,
    /// when `aupe`, untagged frames.
    pub(crate) fn set_vmolr(&mut self, vf: VfIndex, aupe: bool) {
        let addr = regs::vmolr(vf.pool());
        let mut vmolr = Vmolr::from_bits_retain(self.hw.read_reg(addr));
        vmolr |= Vmolr::BAM;
        vmolr.set(Vmolr::AUPE, aupe);
        self.hw.write_reg(addr, vmolr.bits());
    }

    /// Program the queue drop enable register for every queue of
    /// `vf`.
    pub(crate) fn write_qde(&mut self, vf: VfIndex, qde: u32) {
        let qpp = self.vmdq.queues_per_pool;
        let first = vf.pool() * qpp;
        for q in first..first + qpp {
            self.hw.flush();
            let reg = regs::QDE_WRITE | qde | (q << regs::QDE_IDX_SHIFT);
            self.hw.write_reg(regs::QDE, reg);
        }
    }

    fn enable_port_vlan(
        &mut self,
        vf: VfIndex,
        vlan: u16,
        qos: u8,
    ) -> Result<()> {
        self.set_vf_vlan(true, vlan, vf.pool())?;
        // Revoke tagless access through VLAN 0.
        if let Err(e) = self.set_vf_vlan(false, 0, vf.pool()) {
            pf_log!(self, Warn, "VF {vf}: leaving VLAN 0 failed: {e}");
        }
        self.set_vmvir(vlan, qos, vf);
        self.set_vmolr(vf, false);
        if self.cfg.mac_type >= MacType::X550 {
            self.write_qde(vf, regs::QDE_ENABLE | regs::QDE_HIDE_VLAN);
        }

        let rec = vf_rec_mut(&mut self.vfs, vf)?;
        rec.pf_vlan = vlan;
        rec.pf_qos = qos;
        pf_log!(self, Note, "setting VLAN {vlan}, QoS {qos:#x} on VF {vf}");
        if self.pf.down {
            pf_log!(
                self,
                Warn,
                "the VF VLAN has been set, but the PF device is not up; \
                bring the PF device up before attempting to use the VF"
            );
        }

        Ok(())
    }

    fn disable_port_vlan(&mut self, vf: VfIndex) -> Result<()> {
        let old = vf_rec(&self.vfs, vf)?.pf_vlan;
        let res = self.set_vf_vlan(false, old, vf.pool());
        // Restore tagless access through VLAN 0.
        if let Err(e) = self.set_vf_vlan(true, 0, vf.pool()) {
            pf_log!(self, Warn, "VF {vf}: rejoining VLAN 0 failed: {e}");
        }
        self.clear_vmvir(vf);
        self.set_vmolr(vf, true);
        if self.cfg.mac_type >= MacType::X550 {
            self.write_qde(vf, regs::QDE_ENABLE);
        }

        let rec = vf_rec_mut(&mut self.vfs, vf)?;
        rec.pf_vlan = 0;
        rec.pf_qos = 0;
        res
    }

    /// Set (or with zero `vlan` and `qos`, clear) the port VLAN of
    /// `vf`. Frames from the VF are tagged by the switch and the VF
    /// may no longer choose its own VLANs.
    pub fn set_vf_port_vlan(
        &mut self,
        vf: VfIndex,
        vlan: u16,
        qos: u8,
        proto: u16,
    ) -> Result<()> {
        vf_rec(&self.vfs, vf)?;
        if vlan >= regs::VLAN_MAX_VID || qos > 7 {
            return Err(SriovError::InvalidConfig(format!(
                "VLAN {vlan} QoS {qos} out of range"
            )));
        }
        if proto != ETH_P_8021Q {
            return Err(SriovError::NotSupported(format!(
                "VLAN protocol {proto:#06x}"
            )));
        }

        if vlan != 0 || qos != 0 {
            if vf_rec(&self.vfs, vf)?.pf_vlan != 0 {
                self.disable_port_vlan(vf)?;
            }
            self.enable_port_vlan(vf, vlan, qos)
        } else {
            self.disable_port_vlan(vf)
        }
    }
}
