// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The register map of the 82599 family switch as far as the SR-IOV
//! engine touches it.
//!
//! Per-VF bitmap registers come in pairs: VF `n` lives in bit
//! `n % 32` of register `n / 32`. See [`VfIndex::reg_offset`] and
//! [`VfIndex::bit`].
//!
//! [`VfIndex::reg_offset`]: crate::api::VfIndex::reg_offset
//! [`VfIndex::bit`]: crate::api::VfIndex::bit

use crate::low_mask;

/// Receive enable, one bit per pool.
pub const fn vfre(i: u32) -> u32 {
    0x051E0 + 4 * i
}

/// Transmit enable, one bit per pool.
pub const fn vfte(i: u32) -> u32 {
    0x08110 + 4 * i
}

/// VM offload register, one per pool.
pub const fn vmolr(pool: u32) -> u32 {
    0x0F000 + 4 * pool
}

/// VM VLAN insert register, one per pool.
pub const fn vmvir(pool: u32) -> u32 {
    0x08000 + 4 * pool
}

/// VLAN pool filter: which VLAN an entry matches.
pub const fn vlvf(i: u32) -> u32 {
    0x0F100 + 4 * i
}

/// VLAN pool filter bitmap: two words per VLVF entry, one bit per
/// pool.
pub const fn vlvfb(i: u32) -> u32 {
    0x0F200 + 4 * i
}

/// VLAN filter table array, one bit per VLAN ID.
pub const fn vfta(i: u32) -> u32 {
    0x0A000 + 4 * i
}

/// Multicast table array.
pub const fn mta(i: u32) -> u32 {
    0x05200 + 4 * i
}

/// VM VLAN/ethertype anti-spoof: marks pools as trusted VLAN members.
pub const fn vmecm(i: u32) -> u32 {
    0x08790 + 4 * i
}

/// Ethertype queue filter.
pub const fn etqf(i: u32) -> u32 {
    0x05128 + 4 * i
}

/// Transmit descriptor control of a VF queue.
pub const fn pvftxdctl(q: u32) -> u32 {
    0x06028 + 0x40 * q
}

/// Transmit head write-back address, low word.
pub const fn pvftdwbal(q: u32) -> u32 {
    0x06038 + 0x40 * q
}

/// Transmit head write-back address, high word.
pub const fn pvftdwbah(q: u32) -> u32 {
    0x0603C + 0x40 * q
}

/// The PF's view of a VF's mailbox memory.
pub const fn pfmbmem(vf: u32) -> u32 {
    0x13000 + 64 * vf
}

pub const MAXFRS: u32 = 0x04268;
pub const MHADD_MFS_SHIFT: u32 = 16;
pub const MHADD_MFS_MASK: u32 = 0xFFFF_0000;

pub const RTTDQSEL: u32 = 0x04904;
pub const RTTBCNRC: u32 = 0x04984;
pub const RTTBCNRM: u32 = 0x04980;
pub const RTTBCNRC_RS_ENA: u32 = 0x8000_0000;
pub const RTTBCNRC_RF_INT_SHIFT: u32 = 14;
pub const RTTBCNRC_RF_DEC_MASK: u32 = low_mask(RTTBCNRC_RF_INT_SHIFT);
pub const RTTBCNRC_RF_INT_MASK: u32 =
    low_mask(10) << RTTBCNRC_RF_INT_SHIFT;

/// The MMW (max memory window) value written to RTTBCNRM for
/// 82599-class parts.
pub const RTTBCNRM_MMW_82599: u32 = 0x4;
/// Likewise for X540 and later.
pub const RTTBCNRM_MMW_X540: u32 = 0x14;

pub const FCTRL: u32 = 0x05080;
pub const FCTRL_MPE: u32 = 0x0000_0100;
pub const FCTRL_UPE: u32 = 0x0000_0200;

pub const GCR_EXT: u32 = 0x11050;
pub const GCR_EXT_VT_MODE_16: u32 = 0x0000_0001;
pub const GCR_EXT_VT_MODE_32: u32 = 0x0000_0002;
pub const GCR_EXT_VT_MODE_64: u32 = 0x0000_0003;
pub const GCR_EXT_MSIX_EN: u32 = 0x8000_0000;

pub const GPIE: u32 = 0x00898;
pub const GPIE_VTMODE_16: u32 = 0x0000_4000;
pub const GPIE_VTMODE_32: u32 = 0x0000_8000;
pub const GPIE_VTMODE_64: u32 = 0x0000_C000;
pub const GPIE_VTMODE_MASK: u32 = 0x0000_C000;

pub const VT_CTL: u32 = 0x051B0;
pub const VT_CTL_POOL_SHIFT: u32 = 7;
pub const VT_CTL_POOL_MASK: u32 = 0x3F << VT_CTL_POOL_SHIFT;
pub const VT_CTL_VT_ENABLE: u32 = 0x0000_0001;
pub const VT_CTL_REPLEN: u32 = 0x4000_0000;

pub const PFDTXGSWC: u32 = 0x08220;
pub const PFDTXGSWC_VT_LBEN: u32 = 0x1;

pub const QDE: u32 = 0x2F04;
pub const QDE_ENABLE: u32 = 0x0000_0001;
pub const QDE_HIDE_VLAN: u32 = 0x0000_0002;
pub const QDE_IDX_SHIFT: u32 = 8;
pub const QDE_WRITE: u32 = 0x0001_0000;

/// Last VM misbehavior cause: transmit and receive sides.
pub const LVMMC_TX: u32 = 0x08108;
pub const LVMMC_RX: u32 = 0x02FA8;

pub const TXDCTL_ENABLE: u32 = 0x0200_0000;

pub const VLVF_ENTRIES: u32 = 64;
pub const VLVF_VIEN: u32 = 0x8000_0000;
pub const VLVF_VLANID_MASK: u32 = 0x0000_0FFF;
pub const VFTA_ENTRIES: u32 = 128;
pub const MTA_ENTRIES: u32 = 128;

pub const VMVIR_VLANA_DEFAULT: u32 = 0x4000_0000;
pub const VLAN_PRIO_SHIFT: u32 = 13;
pub const VLAN_VID_MASK: u16 = 0x0FFF;
pub const VLAN_MAX_VID: u16 = 4095;

pub const ETQF_FILTER_EN: u32 = 0x8000_0000;
pub const ETQF_TX_ANTISPOOF: u32 = 0x2000_0000;
pub const ETQF_FILTER_LLDP: u32 = 5;
pub const ETQF_FILTER_FC: u32 = 7;
pub const ETH_P_LLDP: u32 = 0x88CC;
pub const ETH_P_PAUSE: u32 = 0x8808;

pub const ETH_HLEN: u32 = 14;
pub const ETH_FCS_LEN: u32 = 4;
pub const ETH_FRAME_LEN: u32 = 1514;
pub const MAX_JUMBO_FRAME_SIZE: u32 = 9728;
pub const FCOE_JUMBO_FRAME_SIZE: u32 = 3072;

/// Map a multicast hash to its MTA register and bit.
///
/// The hash is 12 bits wide: the upper seven select one of the 128
/// registers, the lower five the bit within it.
pub const fn mta_slot(hash: u16) -> (u32, u32) {
    let hash = hash as u32;
    ((hash >> 5) & 0x7F, 1 << (hash & 0x1F))
}

bitflags::bitflags! {
    /// The per-pool VM offload register.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Vmolr: u32 {
        /// Accept untagged packets.
        const AUPE = 0x0100_0000;
        /// Accept packets matched in the MTA.
        const ROMPE = 0x0200_0000;
        /// Accept packets matched in the unicast hash table.
        const ROPE = 0x0400_0000;
        /// Accept broadcast.
        const BAM = 0x0800_0000;
        /// Multicast promiscuous.
        const MPE = 0x1000_0000;
        /// Unicast promiscuous.
        const UPE = 0x0040_0000;
        /// VLAN promiscuous.
        const VPE = 0x0080_0000;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rate_factor_masks() {
        assert_eq!(RTTBCNRC_RF_DEC_MASK, 0x0000_3FFF);
        assert_eq!(RTTBCNRC_RF_INT_MASK, 0x03FF_C000);
        assert_eq!(VT_CTL_POOL_MASK, 0x1F80);
    }

    #[test]
    fn mta_hash_split() {
        assert_eq!(mta_slot(0x000), (0, 0x1));
        assert_eq!(mta_slot(0x021), (1, 0x2));
        assert_eq!(mta_slot(0xFFF), (0x7F, 0x8000_0000));
    }
}
