// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Per-VF state.

use super::Result;
use super::SriovError;
use super::backend::VfDevHandle;
use crate::api::LinkState;
use crate::api::MacAddr;
use crate::api::MbxApiVersion;
use crate::api::VfConfigSnapshot;
use crate::api::VfIndex;
use crate::api::XcastMode;
use alloc::vec::Vec;

/// The most multicast hashes a VF may register.
pub const MAX_VF_MC_ENTRIES: usize = 30;

/// Where a VF is in its reset handshake.
///
/// ```text
///            enable            VFLR              RESET msg
/// (none) ----------> Uninit ---------> Resetting ----------> Ready
///                      |                                       ^
///                      +------------- RESET msg ---------------+
/// ```
///
/// Only a `Ready` VF can be clear to send, but a `Ready` VF may have
/// its clearance revoked (by MDD or a trust change) until it resets.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum VfState {
    #[default]
    Uninitialized,
    Resetting,
    Ready,
}

/// Everything the engine remembers about one VF.
#[derive(Debug)]
pub struct VfRecord {
    pub(crate) mac: MacAddr,
    /// The MAC was pinned by the administrator.
    pub(crate) pf_set_mac: bool,
    pub(crate) trusted: bool,
    /// The administrator's port VLAN, zero for none.
    pub(crate) pf_vlan: u16,
    pub(crate) pf_qos: u8,
    pub(crate) mc_hashes: heapless::Vec<u16, MAX_VF_MC_ENTRIES>,
    pub(crate) xcast_mode: XcastMode,
    pub(crate) api: MbxApiVersion,
    pub(crate) clear_to_send: bool,
    pub(crate) state: VfState,
    pub(crate) spoofchk_enabled: bool,
    pub(crate) rss_query_enabled: bool,
    /// The VF's link is up as far as its own queries are concerned.
    pub(crate) link_enable: bool,
    pub(crate) link_state: LinkState,
    /// Transmit cap in Mbps, zero for none.
    pub(crate) tx_rate: u32,
    pub(crate) vfdev: Option<VfDevHandle>,
}

impl Default for VfRecord {
    fn default() -> Self {
        Self {
            mac: MacAddr::ZERO,
            pf_set_mac: false,
            trusted: false,
            pf_vlan: 0,
            pf_qos: 0,
            mc_hashes: heapless::Vec::new(),
            xcast_mode: XcastMode::None,
            api: MbxApiVersion::Unknown,
            clear_to_send: false,
            state: VfState::Uninitialized,
            spoofchk_enabled: true,
            rss_query_enabled: false,
            link_enable: true,
            link_state: LinkState::Auto,
            tx_rate: 0,
            vfdev: None,
        }
    }
}

impl VfRecord {
    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn pf_set_mac(&self) -> bool {
        self.pf_set_mac
    }

    pub fn trusted(&self) -> bool {
        self.trusted
    }

    pub fn port_vlan(&self) -> (u16, u8) {
        (self.pf_vlan, self.pf_qos)
    }

    pub fn mc_hashes(&self) -> &[u16] {
        &self.mc_hashes
    }

    pub fn xcast_mode(&self) -> XcastMode {
        self.xcast_mode
    }

    pub fn api_version(&self) -> MbxApiVersion {
        self.api
    }

    pub fn clear_to_send(&self) -> bool {
        self.clear_to_send
    }

    pub fn state(&self) -> VfState {
        self.state
    }

    pub fn spoofchk(&self) -> bool {
        self.spoofchk_enabled
    }

    pub fn rss_query(&self) -> bool {
        self.rss_query_enabled
    }

    pub fn link_enabled(&self) -> bool {
        self.link_enable
    }

    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    pub fn tx_rate(&self) -> u32 {
        self.tx_rate
    }

    pub fn has_dev(&self) -> bool {
        self.vfdev.is_some()
    }

    pub fn snapshot(&self, vf: VfIndex) -> VfConfigSnapshot {
        VfConfigSnapshot {
            vf,
            mac: self.mac,
            vlan: self.pf_vlan,
            qos: self.pf_qos,
            max_tx_rate: self.tx_rate,
            link_state: self.link_state,
            spoofchk: self.spoofchk_enabled,
            trusted: self.trusted,
            rss_query_en: self.rss_query_enabled,
        }
    }
}

/// The records of all enabled VFs, indexed by VF.
///
/// Every lookup is bounds checked against the enabled count; an index
/// the table does not cover is [`SriovError::NoSuchVf`].
#[derive(Debug)]
pub struct VfTable {
    records: Vec<VfRecord>,
}

impl VfTable {
    pub fn new(num_vfs: u16) -> Result<Self> {
        let n = usize::from(num_vfs);
        let mut records = Vec::new();
        records.try_reserve_exact(n).map_err(|_| {
            SriovError::ResourceExhausted(format!(
                "unable to allocate memory for {n} VF records"
            ))
        })?;
        records.resize_with(n, VfRecord::default);
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, vf: VfIndex) -> Result<&VfRecord> {
        self.records.get(vf.get()).ok_or(SriovError::NoSuchVf(vf))
    }

    pub fn get_mut(&mut self, vf: VfIndex) -> Result<&mut VfRecord> {
        self.records.get_mut(vf.get()).ok_or(SriovError::NoSuchVf(vf))
    }

    pub fn indices(&self) -> impl Iterator<Item = VfIndex> + use<> {
        (0..self.records.len() as u16).map(VfIndex::new)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VfIndex, &VfRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| (VfIndex::new(i as u16), r))
    }

    pub fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = (VfIndex, &mut VfRecord)> {
        self.records
            .iter_mut()
            .enumerate()
            .map(|(i, r)| (VfIndex::new(i as u16), r))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_records() {
        let table = VfTable::new(4).unwrap();
        assert_eq!(table.len(), 4);
        for (_, rec) in table.iter() {
            assert!(rec.spoofchk());
            assert!(!rec.trusted());
            assert!(!rec.rss_query());
            assert!(rec.link_enabled());
            assert_eq!(rec.link_state(), LinkState::Auto);
            assert_eq!(rec.api_version(), MbxApiVersion::Unknown);
            assert_eq!(rec.state(), VfState::Uninitialized);
            assert!(!rec.clear_to_send());
        }
    }

    #[test]
    fn out_of_range_vf() {
        let mut table = VfTable::new(2).unwrap();
        assert!(table.get(VfIndex::new(1)).is_ok());
        assert_eq!(
            table.get(VfIndex::new(2)).unwrap_err(),
            SriovError::NoSuchVf(VfIndex::new(2))
        );
        assert!(table.get_mut(VfIndex::new(7)).is_err());
        assert_eq!(table.indices().count(), 2);
    }
}
