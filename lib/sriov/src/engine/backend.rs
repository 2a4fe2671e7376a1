// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The seam between the engine and the device.
//!
//! Everything the engine does to hardware goes through these traits:
//! raw register access, the shared MAC and VLAN filter tables, the
//! per-VF mailboxes, the PCI SR-IOV capability, and malicious driver
//! detection. A driver implements them against the real device; the
//! tests implement them against [`crate::sim::SimBackend`].
//!
//! The mailbox is polled. The engine never blocks on a VF.

use super::bitmap::VfBitmap;
use super::mbx::MbxMsg;
use crate::api::MacAddr;
use crate::api::VfIndex;
use alloc::string::String;

/// A failure reported by the device layer.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("receive address table is full")]
    RarFull,

    #[error("no free VLAN pool filter entry")]
    VlvfFull,

    #[error("no filter for {0}")]
    NoSuchFilter(MacAddr),

    #[error("parameter out of range")]
    InvalidParam,

    #[error("mailbox: {0}")]
    Mailbox(&'static str),

    #[error("PCI: {0}")]
    Pci(String),
}

/// A counted reference to a VF's PCI device.
///
/// The engine takes one for each VF when SR-IOV comes up and gives it
/// back through [`PciOps::put_vf_dev`] on teardown. It is deliberately
/// neither `Clone` nor `Copy`: each handle is one reference.
#[derive(Debug, Eq, PartialEq)]
pub struct VfDevHandle(u32);

impl VfDevHandle {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

/// Raw register access.
pub trait RegisterOps {
    fn read_reg(&self, addr: u32) -> u32;
    fn write_reg(&mut self, addr: u32, val: u32);

    /// Wait for posted writes to land.
    fn flush(&mut self);
}

/// The switch's shared filter tables.
pub trait FilterOps {
    /// Steer frames for `addr` to `pool`. Returns the table slot used.
    fn add_mac_filter(
        &mut self,
        addr: MacAddr,
        pool: u32,
    ) -> Result<usize, BackendError>;

    fn del_mac_filter(
        &mut self,
        addr: MacAddr,
        pool: u32,
    ) -> Result<(), BackendError>;

    /// Push the software copy of the MAC filter table to hardware.
    fn full_sync_mac_table(&mut self);

    /// Add (or remove) `pool` as a member of VLAN `vid`.
    ///
    /// This maintains the VLAN filter table bit and the VLAN pool
    /// filter entry together. An entry that loses its last pool is
    /// released.
    fn set_vfta(
        &mut self,
        vid: u16,
        pool: u32,
        on: bool,
    ) -> Result<(), BackendError>;

    /// Find the VLAN pool filter entry for `vid`, if one exists.
    /// VLAN 0 always owns entry 0.
    fn find_vlvf_entry(&self, vid: u16) -> Option<u32>;

    fn set_mac_anti_spoofing(&mut self, enable: bool, vf: VfIndex);
    fn set_vlan_anti_spoofing(&mut self, enable: bool, vf: VfIndex);
    fn set_ethertype_anti_spoofing(&mut self, enable: bool, vf: VfIndex);
}

/// The per-VF mailboxes.
pub trait MailboxOps {
    /// Read the pending message from `vf`. This releases the mailbox
    /// back to the VF.
    fn mbx_read(&mut self, vf: VfIndex) -> Result<MbxMsg, BackendError>;

    /// Write the first `len` words of `msg` to `vf`.
    fn mbx_write(
        &mut self,
        vf: VfIndex,
        msg: &MbxMsg,
        len: usize,
    ) -> Result<(), BackendError>;

    /// Does `vf` have a function level reset pending? Clears the
    /// indication.
    fn mbx_check_for_rst(&mut self, vf: VfIndex) -> bool;

    /// Does `vf` have a message waiting?
    fn mbx_check_for_msg(&mut self, vf: VfIndex) -> bool;

    /// Has `vf` acknowledged a PF message? Clears the indication.
    fn mbx_check_for_ack(&mut self, vf: VfIndex) -> bool;
}

/// The PCI SR-IOV capability.
pub trait PciOps {
    /// The number of VFs the PCI layer currently has enabled.
    fn num_vf(&self) -> u16;

    fn enable_sriov(&mut self, num_vfs: u16) -> Result<(), BackendError>;
    fn disable_sriov(&mut self);

    /// Is any VF passed through to a guest?
    fn vfs_assigned(&self) -> bool;

    fn get_vf_dev(&mut self, vf: VfIndex) -> Option<VfDevHandle>;
    fn put_vf_dev(&mut self, dev: VfDevHandle);

    /// Reset and reprogram the PF so that a changed pool layout takes
    /// effect.
    fn reinit(&mut self);
}

/// Malicious driver detection.
pub trait MddOps {
    /// Collect and clear the set of VFs flagged since the last call.
    fn mdd_event(&mut self) -> VfBitmap;

    /// Re-arm detection for `vf` after it has been handled.
    fn restore_mdd_vf(&mut self, vf: VfIndex);

    fn disable_mdd(&mut self);
}

/// Everything the engine needs from a device.
pub trait Backend:
    RegisterOps + FilterOps + MailboxOps + PciOps + MddOps
{
}

impl<T> Backend for T where
    T: RegisterOps + FilterOps + MailboxOps + PciOps + MddOps
{
}
