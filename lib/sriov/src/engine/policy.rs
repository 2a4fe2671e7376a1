// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Per-VF policy.
//!
//! Each operation here comes in one of two flavors. VF-originated
//! requests arrive through the mailbox, are never trusted, and are
//! checked against whatever the administrator has pinned. Host
//! administrative requests (the `set_vf_*` methods) are authoritative
//! and pin the state they set.

use super::Result;
use super::SriovError;
use super::backend::Backend;
use super::backend::BackendError;
use super::cfg::Capabilities;
use super::cfg::MacType;
use super::pf::Sriov;
use super::pf::vf_rec;
use super::pf::vf_rec_mut;
use super::regs;
use super::regs::Vmolr;
use super::vf::MAX_VF_MC_ENTRIES;
use crate::api::LinkState;
use crate::api::MacAddr;
use crate::api::MbxApiVersion;
use crate::api::VfConfigSnapshot;
use crate::api::VfIndex;
use crate::api::XcastMode;
use alloc::vec::Vec;

impl<B: Backend> Sriov<B> {
    /// Move `vf`'s primary filter to `mac`.
    ///
    /// On failure the VF is left with no address at all rather than a
    /// stale one.
    pub(crate) fn set_vf_mac(
        &mut self,
        vf: VfIndex,
        mac: MacAddr,
    ) -> Result<()> {
        let old = vf_rec(&self.vfs, vf)?.mac;
        if !old.is_zero() {
            self.del_vf_mac_filter(vf, old);
        }

        let res = self.hw.add_mac_filter(mac, vf.pool());
        let rec = vf_rec_mut(&mut self.vfs, vf)?;
        match res {
            Ok(_) => {
                rec.mac = mac;
                Ok(())
            }

            Err(e) => {
                rec.mac = MacAddr::ZERO;
                Err(e.into())
            }
        }
    }

    /// A VF asked for `mac` as its primary address.
    pub(crate) fn set_mac_msg(
        &mut self,
        vf: VfIndex,
        mac: MacAddr,
    ) -> Result<()> {
        if !mac.is_valid_unicast() {
            pf_log!(self, Warn, "VF {vf} attempted to set invalid MAC {mac}");
            return Err(SriovError::InvalidAddress(mac));
        }

        let rec = vf_rec(&self.vfs, vf)?;
        if rec.pf_set_mac && !rec.trusted && rec.mac != mac {
            pf_log!(
                self,
                Warn,
                "VF {vf} attempted to set a new MAC address but it already \
                has an administratively set MAC address {}",
                rec.mac
            );
            pf_log!(
                self,
                Warn,
                "check the VF driver and if it is not using the correct MAC \
                address you may need to reload the VF driver"
            );
            return Err(SriovError::PermissionDenied(
                "MAC address is administratively set".into(),
            ));
        }

        self.set_vf_mac(vf, mac)
    }

    /// Pin `mac` on `vf`, or with the zero address, unpin it.
    pub fn set_vf_mac_admin(
        &mut self,
        vf: VfIndex,
        mac: MacAddr,
    ) -> Result<()> {
        vf_rec(&self.vfs, vf)?;

        if mac.is_valid_unicast() {
            pf_log!(self, Note, "setting MAC {mac} on VF {vf}");
            pf_log!(
                self,
                Note,
                "reload the VF driver to make this change effective"
            );
            if let Err(e) = self.set_vf_mac(vf, mac) {
                pf_log!(
                    self,
                    Warn,
                    "the VF MAC address was NOT set due to invalid or \
                    duplicate MAC address"
                );
                return Err(e);
            }

            vf_rec_mut(&mut self.vfs, vf)?.pf_set_mac = true;
            if self.pf.down {
                pf_log!(
                    self,
                    Warn,
                    "the VF MAC address has been set, but the PF device is \
                    not up; bring the PF device up before attempting to use \
                    the VF"
                );
            }
            return Ok(());
        }

        if !mac.is_zero() {
            return Err(SriovError::InvalidAddress(mac));
        }

        let old = vf_rec(&self.vfs, vf)?.mac;
        if old.is_zero() {
            return Ok(());
        }

        pf_log!(self, Note, "removing MAC on VF {vf}");
        if let Err(e) = self.hw.del_mac_filter(old, vf.pool()) {
            pf_log!(self, Warn, "could NOT remove the VF MAC address");
            return Err(e.into());
        }

        let rec = vf_rec_mut(&mut self.vfs, vf)?;
        rec.pf_set_mac = false;
        rec.mac = MacAddr::ZERO;
        Ok(())
    }

    /// Drop every MAC-VLAN filter `vf` holds.
    pub(crate) fn clear_vf_macvlans(&mut self, vf: VfIndex) {
        let Some(pool) = self.macvlans.as_mut() else {
            return;
        };

        for mac in pool.release_vf(vf) {
            self.del_vf_mac_filter(vf, mac);
        }
    }

    /// Drop the filter steering `mac` to `vf`. A filter that is already
    /// gone is not an error.
    pub(crate) fn del_vf_mac_filter(&mut self, vf: VfIndex, mac: MacAddr) {
        match self.hw.del_mac_filter(mac, vf.pool()) {
            Ok(()) | Err(BackendError::NoSuchFilter(_)) => {}
            Err(e) => {
                pf_log!(self, Warn, "VF {vf}: removing MAC {mac} failed: {e}")
            }
        }
    }

    /// A VF asked for a secondary unicast filter.
    ///
    /// The VF sends its whole list, numbered from one. Index one
    /// starts a fresh list, so the VF's old filters are dropped first;
    /// index zero only drops them.
    pub(crate) fn set_macvlan_msg(
        &mut self,
        vf: VfIndex,
        index: u32,
        mac: MacAddr,
    ) -> Result<()> {
        let rec = vf_rec(&self.vfs, vf)?;
        if rec.pf_set_mac && !rec.trusted && index > 0 {
            pf_log!(
                self,
                Warn,
                "VF {vf} requested MACVLAN filter but is administratively \
                denied"
            );
            return Err(SriovError::PermissionDenied(
                "MAC address is administratively set".into(),
            ));
        }

        if index > 0 {
            if !mac.is_valid_unicast() {
                pf_log!(
                    self,
                    Warn,
                    "VF {vf} attempted to set invalid MAC {mac}"
                );
                return Err(SriovError::InvalidAddress(mac));
            }

            // A VF with several addresses would trip the MAC and VLAN
            // anti-spoof checks on its own traffic.
            if rec.spoofchk_enabled {
                self.hw.set_mac_anti_spoofing(false, vf);
                self.hw.set_vlan_anti_spoofing(false, vf);
            }
        }

        if index <= 1 {
            self.clear_vf_macvlans(vf);
        }
        if index == 0 {
            return Ok(());
        }

        let res = self.add_vf_macvlan(vf, mac);
        if let Err(SriovError::ResourceExhausted(_)) = res {
            pf_log!(
                self,
                Warn,
                "VF {vf} has requested a MACVLAN filter but there is no \
                space for it"
            );
        }
        res
    }

    fn add_vf_macvlan(&mut self, vf: VfIndex, mac: MacAddr) -> Result<()> {
        let exhausted = || {
            SriovError::ResourceExhausted("no free MAC-VLAN slot".into())
        };

        // The filter goes in before the slot is claimed, so a full
        // receive address table leaves the pool untouched.
        let free = self.macvlans.as_ref().map_or(0, |p| p.num_free());
        if free == 0 {
            return Err(exhausted());
        }

        self.hw.add_mac_filter(mac, vf.pool())?;
        self.macvlans
            .as_mut()
            .and_then(|p| p.alloc(vf, mac))
            .ok_or_else(exhausted)?;
        Ok(())
    }

    /// A VF registered its multicast hashes, replacing any previous
    /// set. Hashes beyond [`MAX_VF_MC_ENTRIES`] are dropped.
    pub(crate) fn set_multicast_msg<I>(
        &mut self,
        vf: VfIndex,
        hashes: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = u16>,
    {
        let rec = vf_rec_mut(&mut self.vfs, vf)?;
        rec.mc_hashes.clear();
        for h in hashes.into_iter().take(MAX_VF_MC_ENTRIES) {
            // Capacity is guaranteed by the take() above.
            let _ = rec.mc_hashes.push(h);
        }

        let addr = regs::vmolr(vf.pool());
        let vmolr = self.hw.read_reg(addr) | Vmolr::ROMPE.bits();
        self.hw.write_reg(addr, vmolr);
        self.write_mc_addr_list();
        Ok(())
    }

    /// Rebuild the shared multicast table from the PF's hashes and
    /// every VF's, then refresh each VF's multicast receive enable.
    pub(crate) fn write_mc_addr_list(&mut self) {
        let mut mta = [0u32; regs::MTA_ENTRIES as usize];
        let mut set = |h: u16| {
            let (reg, bit) = regs::mta_slot(h);
            mta[reg as usize] |= bit;
        };

        self.pf.mc_hashes.iter().copied().for_each(&mut set);

        let mut rompe = Vec::new();
        if let Some(table) = self.vfs.as_ref() {
            for (vf, rec) in table.iter() {
                rec.mc_hashes.iter().copied().for_each(&mut set);
                rompe.push((vf, !rec.mc_hashes.is_empty()));
            }
        }

        for (i, val) in mta.iter().enumerate() {
            self.hw.write_reg(regs::mta(i as u32), *val);
        }

        for (vf, on) in rompe {
            let addr = regs::vmolr(vf.pool());
            let mut vmolr = Vmolr::from_bits_retain(self.hw.read_reg(addr));
            vmolr.set(Vmolr::ROMPE, on);
            self.hw.write_reg(addr, vmolr.bits());
        }

        // Restore any VF MAC-VLANs along with the table.
        self.hw.full_sync_mac_table();
    }

    /// A VF asked for frames up to `max_frame` bytes.
    pub(crate) fn set_vf_lpe(
        &mut self,
        vf: VfIndex,
        max_frame: u32,
    ) -> Result<()> {
        if max_frame > regs::MAX_JUMBO_FRAME_SIZE {
            pf_log!(self, Error, "VF {vf} max_frame {max_frame} out of range");
            return Err(SriovError::InvalidConfig(format!(
                "max frame {max_frame} out of range"
            )));
        }

        // A part with a single frame size register for PF and VFs
        // cannot let a legacy VF receive while anyone uses jumbo
        // frames: it would be handed frames it cannot hold.
        if self.caps.contains(Capabilities::LEGACY_LPE) {
            let api = vf_rec(&self.vfs, vf)?.api;
            let pf_max_frame = self.pf.max_frame();
            let pf_jumbo = pf_max_frame > regs::ETH_FRAME_LEN;

            let ok = if api.has_jumbo() && pf_jumbo {
                true
            } else {
                !pf_jumbo
                    && max_frame <= regs::ETH_FRAME_LEN + regs::ETH_FCS_LEN
            };

            let addr = regs::vfre(vf.reg_offset());
            let mut vfre = self.hw.read_reg(addr);
            if ok {
                vfre |= vf.bit();
            } else {
                vfre &= !vf.bit();
            }
            self.hw.write_reg(addr, vfre);

            if !ok {
                pf_log!(
                    self,
                    Error,
                    "VF {vf} max_frame {max_frame} out of range"
                );
                return Err(SriovError::InvalidConfig(format!(
                    "max frame {max_frame} unsupported for API {api} with \
                    PF frame size {pf_max_frame}"
                )));
            }
        }

        let mut max_frs = self.hw.read_reg(regs::MAXFRS);
        let cur = (max_frs & regs::MHADD_MFS_MASK) >> regs::MHADD_MFS_SHIFT;
        if cur < max_frame {
            max_frs = max_frame << regs::MHADD_MFS_SHIFT;
            self.hw.write_reg(regs::MAXFRS, max_frs);
        }

        pf_log!(self, Note, "VF {vf} requests change max MTU to {max_frame}");
        Ok(())
    }

    /// A VF asked for a receive filtering mode. Returns the mode
    /// actually granted, which is what the VF is told.
    pub(crate) fn update_xcast_mode(
        &mut self,
        vf: VfIndex,
        requested: u32,
    ) -> Result<XcastMode> {
        let rec = vf_rec(&self.vfs, vf)?;
        match rec.api {
            MbxApiVersion::V1_2 if requested == XcastMode::Promisc as u32 => {
                return Err(SriovError::ProtocolError(
                    "promiscuous mode needs mailbox API 1.3".into(),
                ));
            }
            MbxApiVersion::V1_2 | MbxApiVersion::V1_3 => (),
            api => {
                return Err(SriovError::ProtocolError(format!(
                    "xcast mode unsupported by mailbox API {api}"
                )));
            }
        }

        // Anything wider than multicast is for trusted VFs only. An
        // untrusted VF is quietly given the most it may have.
        let mut requested = requested;
        if requested > XcastMode::Multi as u32 && !rec.trusted {
            requested = XcastMode::Multi as u32;
        }

        let mode = XcastMode::try_from(requested).map_err(|m| {
            SriovError::ProtocolError(format!("unknown xcast mode {m}"))
        })?;
        if rec.xcast_mode == mode {
            return Ok(mode);
        }

        let all = Vmolr::BAM
            | Vmolr::ROMPE
            | Vmolr::MPE
            | Vmolr::UPE
            | Vmolr::VPE;
        let (disable, enable) = match mode {
            XcastMode::None => (all, Vmolr::empty()),
            XcastMode::Multi => (
                Vmolr::MPE | Vmolr::UPE | Vmolr::VPE,
                Vmolr::BAM | Vmolr::ROMPE,
            ),
            XcastMode::AllMulti => (
                Vmolr::UPE | Vmolr::VPE,
                Vmolr::BAM | Vmolr::ROMPE | Vmolr::MPE,
            ),
            XcastMode::Promisc => {
                if !self.caps.contains(Capabilities::XCAST_PROMISC) {
                    return Err(SriovError::NotSupported(
                        "VF promiscuous mode".into(),
                    ));
                }

                if self.hw.read_reg(regs::FCTRL) & regs::FCTRL_UPE == 0 {
                    pf_log!(
                        self,
                        Warn,
                        "enabling VF promisc requires PF in promisc"
                    );
                    return Err(SriovError::PermissionDenied(
                        "PF is not promiscuous".into(),
                    ));
                }
                (Vmolr::empty(), all)
            }
        };

        let addr = regs::vmolr(vf.pool());
        let mut vmolr = Vmolr::from_bits_retain(self.hw.read_reg(addr));
        vmolr.remove(disable);
        vmolr.insert(enable);
        self.hw.write_reg(addr, vmolr.bits());

        vf_rec_mut(&mut self.vfs, vf)?.xcast_mode = mode;
        Ok(mode)
    }

    /// Cap the transmit rate of `vf` at `max_tx_rate` Mbps, or lift
    /// the cap with zero.
    ///
    /// Rate limiting is only calibrated for a 10Gb link; the limit is
    /// dropped again if the link speed later changes.
    pub fn set_vf_tx_rate(
        &mut self,
        vf: VfIndex,
        max_tx_rate: u32,
    ) -> Result<()> {
        vf_rec(&self.vfs, vf)?;

        if !self.pf.link_up {
            return Err(SriovError::InvalidConfig("PF link is down".into()));
        }

        let link_speed = self.pf.link_speed.mbps();
        if link_speed != 10_000 {
            return Err(SriovError::InvalidConfig(format!(
                "rate limiting needs a 10Gb link, have {link_speed} Mbps"
            )));
        }

        if max_tx_rate != 0 && (max_tx_rate <= 10 || max_tx_rate > link_speed)
        {
            return Err(SriovError::InvalidConfig(format!(
                "rate {max_tx_rate} outside 11..={link_speed} Mbps"
            )));
        }

        self.vf_rate_link_speed = link_speed;
        vf_rec_mut(&mut self.vfs, vf)?.tx_rate = max_tx_rate;
        self.set_vf_rate_limit(vf);
        Ok(())
    }

    /// Program the rate scheduler for every transmit queue of `vf`.
    pub(crate) fn set_vf_rate_limit(&mut self, vf: VfIndex) {
        let Ok(rec) = vf_rec(&self.vfs, vf) else {
            return;
        };

        let mut bcnrc = 0;
        if rec.tx_rate != 0 {
            // The rate factor is link speed over rate, in fixed point
            // with 14 fractional bits.
            bcnrc = (self.vf_rate_link_speed << regs::RTTBCNRC_RF_INT_SHIFT)
                / rec.tx_rate;
            bcnrc &= regs::RTTBCNRC_RF_INT_MASK | regs::RTTBCNRC_RF_DEC_MASK;
            bcnrc |= regs::RTTBCNRC_RS_ENA;
        }

        // The compensation window depends on the largest frame the
        // part supports.
        match self.cfg.mac_type {
            MacType::Mac82599 => {
                self.hw.write_reg(regs::RTTBCNRM, regs::RTTBCNRM_MMW_82599)
            }
            MacType::X540 => {
                self.hw.write_reg(regs::RTTBCNRM, regs::RTTBCNRM_MMW_X540)
            }
            _ => (),
        }

        let qpp = self.vmdq.queues_per_pool;
        for q in 0..qpp {
            self.hw.write_reg(regs::RTTDQSEL, vf.pool() * qpp + q);
            self.hw.write_reg(regs::RTTBCNRC, bcnrc);
        }
    }

    /// Re-apply all VF rate limits after a PF link change. If the link
    /// speed moved away from the one the limits were set against, the
    /// limits are cleared.
    pub fn check_vf_rate_limit(&mut self) {
        if self.vf_rate_link_speed == 0 {
            return;
        }

        let actual = self.pf.link_speed.mbps();
        let reset = actual != self.vf_rate_link_speed;
        if reset {
            self.vf_rate_link_speed = 0;
            pf_log!(
                self,
                Note,
                "link speed has been changed; VF transmit rate is disabled"
            );
        }

        let Some(table) = self.vfs.as_mut() else {
            return;
        };
        if reset {
            for (_, rec) in table.iter_mut() {
                rec.tx_rate = 0;
            }
        }

        for vf in table.indices() {
            self.set_vf_rate_limit(vf);
        }
    }

    /// Turn MAC, VLAN and (where supported) ethertype anti-spoofing on
    /// or off for `vf`.
    pub fn set_vf_spoofchk(
        &mut self,
        vf: VfIndex,
        enabled: bool,
    ) -> Result<()> {
        vf_rec_mut(&mut self.vfs, vf)?.spoofchk_enabled = enabled;
        self.hw.set_mac_anti_spoofing(enabled, vf);
        self.hw.set_vlan_anti_spoofing(enabled, vf);

        if self.caps.contains(Capabilities::ETHERTYPE_ANTISPOOF) {
            let base = regs::ETQF_FILTER_EN | regs::ETQF_TX_ANTISPOOF;
            self.hw.write_reg(
                regs::etqf(regs::ETQF_FILTER_LLDP),
                base | regs::ETH_P_LLDP,
            );
            self.hw.write_reg(
                regs::etqf(regs::ETQF_FILTER_FC),
                base | regs::ETH_P_PAUSE,
            );
            self.hw.set_ethertype_anti_spoofing(enabled, vf);
        }

        Ok(())
    }

    /// Mark `vf` trusted or untrusted. A change forces the VF through
    /// a reset so that it renegotiates with its new privileges.
    pub fn set_vf_trust(&mut self, vf: VfIndex, trusted: bool) -> Result<()> {
        let rec = vf_rec_mut(&mut self.vfs, vf)?;
        if rec.trusted == trusted {
            return Ok(());
        }

        rec.trusted = trusted;
        rec.clear_to_send = false;
        self.ping_vf(vf)?;
        let not = if trusted { "" } else { "not " };
        pf_log!(self, Note, "VF {vf} is {not}trusted");
        Ok(())
    }

    /// Force the link state of `vf`.
    ///
    /// Forcing the link up is not supported by this hardware and is
    /// accepted as a no-op.
    pub fn set_vf_link_state_admin(
        &mut self,
        vf: VfIndex,
        state: LinkState,
    ) -> Result<()> {
        if let Err(e) = vf_rec(&self.vfs, vf) {
            pf_log!(self, Error, "set VF link: invalid VF identifier {vf}");
            return Err(e);
        }

        match state {
            LinkState::Enable => {
                pf_log!(
                    self,
                    Note,
                    "set VF {vf} link state {state} - not supported"
                );
                Ok(())
            }

            LinkState::Disable | LinkState::Auto => {
                pf_log!(self, Note, "set VF {vf} link state {state}");
                self.set_vf_link_state(vf, state)
            }
        }
    }

    /// Apply `state` to `vf` and restart it.
    pub(crate) fn set_vf_link_state(
        &mut self,
        vf: VfIndex,
        state: LinkState,
    ) -> Result<()> {
        let down = self.pf.down;
        let rec = vf_rec_mut(&mut self.vfs, vf)?;
        rec.link_state = state;
        rec.link_enable = match state {
            LinkState::Auto => !down,
            LinkState::Enable => true,
            LinkState::Disable => false,
        };

        self.set_vf_rx_tx(vf)?;
        vf_rec_mut(&mut self.vfs, vf)?.clear_to_send = false;
        self.ping_vf(vf)
    }

    /// Re-apply each VF's link state, typically after the PF went up
    /// or down.
    pub fn set_all_vfs(&mut self) {
        let Some(table) = self.vfs.as_ref() else {
            return;
        };

        let states: Vec<(VfIndex, LinkState)> =
            table.iter().map(|(vf, r)| (vf, r.link_state)).collect();
        for (vf, state) in states {
            if let Err(e) = self.set_vf_link_state(vf, state) {
                pf_log!(self, Warn, "VF {vf}: link state update failed: {e}");
            }
        }
    }

    /// Enable or disable transmit and receive for `vf` to match its
    /// link.
    pub(crate) fn set_vf_rx_tx(&mut self, vf: VfIndex) -> Result<()> {
        let enable = vf_rec(&self.vfs, vf)?.link_enable;
        let off = vf.reg_offset();
        let cur_tx = self.hw.read_reg(regs::vfte(off));
        let cur_rx = self.hw.read_reg(regs::vfre(off));

        let (req_tx, mut req_rx) = if enable {
            (cur_tx | vf.bit(), cur_rx | vf.bit())
        } else {
            (cur_tx & !vf.bit(), cur_rx & !vf.bit())
        };

        // See set_vf_lpe(): no VF receives while the PF uses jumbo
        // frames on a part with a shared frame size.
        if self.caps.contains(Capabilities::LEGACY_LPE)
            && self.pf.max_frame() > regs::ETH_FRAME_LEN
        {
            req_rx = cur_rx & !vf.bit();
        }

        if cur_tx != req_tx {
            self.hw.write_reg(regs::vfte(off), req_tx);
        }
        if cur_rx != req_rx {
            self.hw.write_reg(regs::vfre(off), req_rx);
        }
        Ok(())
    }

    /// Allow or forbid `vf` to read the RSS redirection table and key,
    /// which it shares with the PF on parts that support the query.
    pub fn set_vf_rss_query_en(
        &mut self,
        vf: VfIndex,
        enabled: bool,
    ) -> Result<()> {
        if !self.caps.contains(Capabilities::RSS_QUERY) {
            return Err(SriovError::NotSupported("VF RSS query".into()));
        }

        vf_rec_mut(&mut self.vfs, vf)?.rss_query_enabled = enabled;
        Ok(())
    }

    pub fn get_vf_config(&self, vf: VfIndex) -> Result<VfConfigSnapshot> {
        Ok(vf_rec(&self.vfs, vf)?.snapshot(vf))
    }

    pub fn list_vf_configs(&self) -> Vec<VfConfigSnapshot> {
        self.vfs
            .as_ref()
            .map(|t| t.iter().map(|(vf, r)| r.snapshot(vf)).collect())
            .unwrap_or_default()
    }
}
