// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Device and PF configuration.

use super::regs::ETH_HLEN;
use super::regs::FCOE_JUMBO_FRAME_SIZE;
use alloc::collections::BTreeSet;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

/// The hardware generation of the PF.
///
/// Ordered oldest first, so `mac_type >= MacType::X540` reads as "X540
/// or newer".
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum MacType {
    Mac82598,
    Mac82599,
    X540,
    X550,
    X550EmX,
    X550EmA,
}

bitflags::bitflags! {
    /// Optional behaviors, derived from the hardware generation.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Capabilities: u32 {
        /// VFs may be allowed to read the RSS redirection table and key.
        const RSS_QUERY = 1 << 0;
        /// Malicious driver detection.
        const MDD = 1 << 1;
        /// Per-pool unicast promiscuous mode.
        const XCAST_PROMISC = 1 << 2;
        /// Ethertype anti-spoofing for LLDP and flow control frames.
        const ETHERTYPE_ANTISPOOF = 1 << 3;
        /// VF transmit queues must be restarted by the PF on reset.
        const VF_QUEUE_RESTART = 1 << 4;
        /// Jumbo frames are a per-VF receive enable decision; the
        /// frame size register is shared with the PF.
        const LEGACY_LPE = 1 << 5;
        /// The trust flag may grant a VF extra privileges.
        const TRUST = 1 << 6;
        /// VF link state may be overridden.
        const LINK_STATE = 1 << 7;
    }
}

impl Capabilities {
    pub fn for_mac(mac: MacType) -> Self {
        let common = Self::TRUST | Self::LINK_STATE;
        match mac {
            MacType::Mac82598 => Self::empty(),
            MacType::Mac82599 => common | Self::RSS_QUERY | Self::LEGACY_LPE,
            MacType::X540 => common | Self::RSS_QUERY | Self::XCAST_PROMISC,
            MacType::X550 | MacType::X550EmX | MacType::X550EmA => {
                common
                    | Self::MDD
                    | Self::XCAST_PROMISC
                    | Self::ETHERTYPE_ANTISPOOF
                    | Self::VF_QUEUE_RESTART
            }
        }
    }
}

/// Static facts about the device.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeviceCfg {
    pub mac_type: MacType,
    /// Entries in the receive address (MAC filter) table.
    pub num_rar_entries: u32,
    /// Does the PCI function expose an SR-IOV capability?
    pub sriov_capable: bool,
    /// VFs to bring up at attach, zero for none.
    pub max_vfs: u16,
    /// Arm malicious driver detection where the hardware has it.
    pub mdd: bool,
    /// Multicast hash filter type, reported to VFs on reset.
    pub mc_filter_type: u32,
    /// Entries in the RSS redirection table.
    pub rss_indir_entries: usize,
}

impl DeviceCfg {
    pub fn new(mac_type: MacType) -> Self {
        Self {
            mac_type,
            num_rar_entries: 128,
            sriov_capable: mac_type != MacType::Mac82598,
            max_vfs: 0,
            mdd: true,
            mc_filter_type: 0,
            rss_indir_entries: 128,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::for_mac(self.mac_type)
    }
}

/// The PF's own link speed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LinkSpeed {
    #[default]
    Unknown,
    Mb100,
    Gb1,
    Gb10,
}

impl LinkSpeed {
    pub fn mbps(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Mb100 => 100,
            Self::Gb1 => 1_000,
            Self::Gb10 => 10_000,
        }
    }
}

/// The PF's own network-facing state, as far as VF policy depends on
/// it.
///
/// The host's network stack owns this; the engine reads it and is
/// told about changes through the `pf_*` methods on
/// [`super::Sriov`].
#[derive(Clone, Debug)]
pub struct PfState {
    pub mtu: u32,
    /// The PF carries FCoE, which needs a larger frame than its MTU.
    pub fcoe: bool,
    /// Traffic classes configured on the PF, zero when DCB is off.
    pub num_tcs: u8,
    pub prio_tc_map: [u8; 8],
    /// The default 802.1p priority for untagged traffic.
    pub default_up: u8,
    /// The PF interface is in promiscuous mode.
    pub promisc: bool,
    /// The PF has overflowed its VLAN filters and accepts all VLANs.
    pub vlan_promisc: bool,
    /// VLANs configured on the PF by the administrator.
    pub active_vlans: BTreeSet<u16>,
    pub link_up: bool,
    pub link_speed: LinkSpeed,
    /// The PF is administratively down.
    pub down: bool,
    /// Multicast hashes the PF itself listens on.
    pub mc_hashes: Vec<u16>,
    pub rss_indir_tbl: Vec<u8>,
    pub rss_key: [u8; 40],
}

impl PfState {
    pub fn new(cfg: &DeviceCfg) -> Self {
        Self {
            mtu: 1500,
            fcoe: false,
            num_tcs: 0,
            prio_tc_map: [0; 8],
            default_up: 0,
            promisc: false,
            vlan_promisc: false,
            active_vlans: BTreeSet::new(),
            link_up: false,
            link_speed: LinkSpeed::Unknown,
            down: false,
            mc_hashes: Vec::new(),
            rss_indir_tbl: vec![0; cfg.rss_indir_entries],
            rss_key: [0; 40],
        }
    }

    /// The largest frame the PF itself expects to receive.
    pub fn max_frame(&self) -> u32 {
        let frame = self.mtu + ETH_HLEN;
        if self.fcoe { frame.max(FCOE_JUMBO_FRAME_SIZE) } else { frame }
    }
}
