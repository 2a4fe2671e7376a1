// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Malicious driver detection.
//!
//! The device stops the queues of a VF whose driver hands it malformed
//! descriptors. The engine reports the event, re-arms detection for
//! that VF, and tells the VF to rebuild its queues.

use super::backend::Backend;
use super::cfg::Capabilities;
use super::mbx::MbxMsg;
use super::mbx::MsgType;
use super::mbx::PF_CONTROL_MSG;
use super::pf::Sriov;
use super::regs;

impl<B: Backend> Sriov<B> {
    /// Handle any pending malicious driver events. Returns true if
    /// there were any.
    pub fn check_mdd_event(&mut self) -> bool {
        if !self.caps.contains(Capabilities::MDD) {
            return false;
        }

        let flagged = self.hw.mdd_event();
        let mut any = false;

        for vf in flagged.iter() {
            let tx = self.hw.read_reg(regs::LVMMC_TX);
            let rx = self.hw.read_reg(regs::LVMMC_RX);
            pf_log!(
                self,
                Warn,
                "malicious event on VF {vf} tx:{tx:x} rx:{rx:x}"
            );
            self.stats.mdd_events += 1;
            any = true;

            let Some(rec) = self
                .vfs
                .as_mut()
                .and_then(|t| t.get_mut(vf).ok())
            else {
                continue;
            };

            rec.clear_to_send = false;
            self.hw.restore_mdd_vf(vf);

            // Get the VF to rebuild its queues. The ping carries CTS so
            // that the VF may send the reset it answers with.
            let ping = MbxMsg::new(PF_CONTROL_MSG | MsgType::CTS.bits());
            if let Err(e) = self.hw.mbx_write(vf, &ping, 1) {
                pf_log!(self, Warn, "VF {vf}: MDD restart ping failed: {e}");
            }
        }

        any
    }
}
