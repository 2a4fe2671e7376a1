// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The pool of secondary unicast (MAC-VLAN) filters shared by all VFs.
//!
//! The receive address table is carved up when SR-IOV comes up: one
//! entry per VF, one for the PF, a reserve for the PF's own MAC-VLAN
//! interfaces, and whatever is left over becomes this pool. VFs claim
//! slots from it first come, first served.

use crate::api::MacAddr;
use crate::api::VfIndex;
use alloc::vec::Vec;

/// Receive address entries held back for the PF's own MAC-VLANs.
pub const MAX_PF_MACVLANS: u32 = 15;

#[derive(Clone, Copy, Debug)]
struct Slot {
    owner: Option<VfIndex>,
    mac: MacAddr,
}

/// A fixed arena of MAC-VLAN slots with a free list.
#[derive(Debug)]
pub struct MacVlanPool {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl MacVlanPool {
    /// The number of slots available for a device with
    /// `num_rar_entries` receive addresses and `num_vfs` VFs.
    pub fn capacity_for(num_rar_entries: u32, num_vfs: u16) -> usize {
        num_rar_entries
            .saturating_sub(MAX_PF_MACVLANS + 1 + u32::from(num_vfs))
            as usize
    }

    /// Returns `None` when there is no room for any slot.
    pub fn new(num_rar_entries: u32, num_vfs: u16) -> Option<Self> {
        let n = Self::capacity_for(num_rar_entries, num_vfs);
        if n == 0 {
            return None;
        }

        let mut slots = Vec::new();
        let mut free = Vec::new();
        slots.try_reserve_exact(n).ok()?;
        free.try_reserve_exact(n).ok()?;
        slots.resize(n, Slot { owner: None, mac: MacAddr::ZERO });
        // Hand out low slots first.
        free.extend((0..n).rev());
        Some(Self { slots, free })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn num_free(&self) -> usize {
        self.free.len()
    }

    /// Record `mac` as owned by `vf`. Returns `None` when the pool is
    /// exhausted.
    pub fn alloc(&mut self, vf: VfIndex, mac: MacAddr) -> Option<usize> {
        let idx = self.free.pop()?;
        self.slots[idx] = Slot { owner: Some(vf), mac };
        Some(idx)
    }

    /// Free every slot owned by `vf`, returning the addresses so their
    /// filters can be removed.
    pub fn release_vf(&mut self, vf: VfIndex) -> Vec<MacAddr> {
        let mut macs = Vec::new();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.owner == Some(vf) {
                macs.push(slot.mac);
                *slot = Slot { owner: None, mac: MacAddr::ZERO };
                self.free.push(idx);
            }
        }
        macs
    }

    pub fn owned_by(&self, vf: VfIndex) -> impl Iterator<Item = MacAddr> + '_ {
        self.slots
            .iter()
            .filter(move |s| s.owner == Some(vf))
            .map(|s| s.mac)
    }
}
