// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The mailbox protocol engine.
//!
//! The host calls [`Sriov::msg_task`] whenever the device signals
//! mailbox activity. Each pass handles, for every VF in order, a
//! pending function level reset, then a pending message, then a
//! pending acknowledgement.
//!
//! A VF may do nothing but reset until it is clear to send (CTS). It
//! earns CTS by completing the reset handshake and loses it whenever
//! the PF needs it to start over: on a function level reset, a
//! malicious driver event, or a change to its trust or link state.

use super::Result;
use super::SriovError;
use super::backend::Backend;
use super::cfg::Capabilities;
use super::mbx;
use super::mbx::MBX_SIZE;
use super::mbx::MbxMsg;
use super::mbx::MsgType;
use super::mbx::Opcode;
use super::pf::PfFlags;
use super::pf::Sriov;
use super::pf::vf_rec;
use super::pf::vf_rec_mut;
use super::regs;
use super::vf::VfState;
use crate::api::MacAddr;
use crate::api::MbxApiVersion;
use crate::api::VfIndex;

impl<B: Backend> Sriov<B> {
    /// Service every VF mailbox once.
    pub fn msg_task(&mut self) {
        if self.vfs.is_none() {
            return;
        }

        if self.flags.contains(PfFlags::MDD_ENABLED) {
            self.check_mdd_event();
        }

        let mut idx = 0;
        // Re-read the count each round: a handler may tear SR-IOV
        // down underneath us.
        while idx < self.num_vfs() {
            let vf = VfIndex::new(idx as u16);

            if self.hw.mbx_check_for_rst(vf) {
                self.vf_flr(vf);
            }

            if self.hw.mbx_check_for_msg(vf) {
                self.rcv_msg_from_vf(vf);
            }

            if self.hw.mbx_check_for_ack(vf) {
                self.rcv_ack_from_vf(vf);
            }

            idx += 1;
        }
    }

    /// A function level reset hit `vf`. Its filters are torn down and
    /// it must complete the reset handshake before it may send again.
    fn vf_flr(&mut self, vf: VfIndex) {
        self.stats.vf_flrs += 1;
        if let Ok(rec) = vf_rec_mut(&mut self.vfs, vf) {
            rec.clear_to_send = false;
            rec.state = VfState::Resetting;
        }

        if let Err(e) = self.vf_reset_event(vf) {
            pf_log!(self, Warn, "VF {vf}: reset cleanup failed: {e}");
        }
    }

    /// Return `vf` to its post-enable defaults, re-applying whatever
    /// the administrator pinned on it.
    pub(crate) fn vf_reset_event(&mut self, vf: VfIndex) -> Result<()> {
        let rec = vf_rec(&self.vfs, vf)?;
        let (pf_vlan, pf_qos) = (rec.pf_vlan, rec.pf_qos);
        let num_tcs = self.pf.num_tcs;

        self.clear_vf_vlans(vf);

        // Put back the port VLAN, or VLAN 0 for untagged traffic.
        self.set_vf_vlan(true, pf_vlan, vf.pool())?;

        self.set_vmolr(vf, pf_vlan == 0);

        if pf_vlan == 0 && pf_qos == 0 && num_tcs == 0 {
            self.clear_vmvir(vf);
        } else if pf_qos != 0 || num_tcs == 0 {
            self.set_vmvir(pf_vlan, pf_qos, vf);
        } else {
            let up = self.pf.default_up;
            self.set_vmvir(pf_vlan, up, vf);
        }

        vf_rec_mut(&mut self.vfs, vf)?.mc_hashes.clear();
        self.write_mc_addr_list();

        let mac = vf_rec(&self.vfs, vf)?.mac;
        if !mac.is_zero() {
            self.del_vf_mac_filter(vf, mac);
        }
        self.clear_vf_macvlans(vf);

        vf_rec_mut(&mut self.vfs, vf)?.api = MbxApiVersion::Unknown;

        if self.caps.contains(Capabilities::VF_QUEUE_RESTART) {
            self.restart_vf_queues(vf);
        }

        Ok(())
    }

    /// Kick the configured transmit queues of `vf` and wipe its
    /// mailbox memory, neither of which a function level reset clears
    /// on its own.
    fn restart_vf_queues(&mut self, vf: VfIndex) {
        let qpp = self.vmdq.queues_per_pool;
        for q in 0..qpp {
            let addr = regs::pvftxdctl(vf.pool() * qpp + q);
            let val = self.hw.read_reg(addr);
            if val != 0 {
                self.hw.write_reg(addr, val | regs::TXDCTL_ENABLE);
                self.hw.write_reg(addr, val & !regs::TXDCTL_ENABLE);
            }
        }

        for word in 0..MBX_SIZE as u32 {
            self.hw.write_reg(regs::pfmbmem(vf.pool()) + 4 * word, 0);
        }
        self.hw.flush();
    }

    /// The VF asked for a reset. This is the handshake that makes it
    /// clear to send.
    fn vf_reset_msg(&mut self, vf: VfIndex) {
        pf_log!(self, Note, "VF reset msg received from VF {vf}");

        let mut reply = MbxMsg::new(Opcode::Reset as u32);
        reply.set_word(3, self.cfg.mc_filter_type);

        match self.vf_reset_handshake(vf) {
            Ok(Some(mac)) => {
                reply.tag(MsgType::SUCCESS);
                reply.set_mac(mac);
            }

            Ok(None) => reply.tag(MsgType::FAILURE),

            Err(e) => {
                pf_log!(self, Warn, "VF {vf}: reset failed: {e}");
                self.stats.msgs_failed += 1;
                reply.tag(MsgType::FAILURE);
            }
        }

        if let Err(e) = self.hw.mbx_write(vf, &reply, mbx::PERMADDR_MSG_LEN)
        {
            pf_log!(self, Warn, "VF {vf}: reset reply failed: {e}");
        }
    }

    /// Bring `vf` to `Ready`. Returns the pinned MAC to hand the VF,
    /// if it has one; otherwise the VF picks its own.
    fn vf_reset_handshake(
        &mut self,
        vf: VfIndex,
    ) -> Result<Option<MacAddr>> {
        let rec = vf_rec_mut(&mut self.vfs, vf)?;
        rec.clear_to_send = false;
        rec.state = VfState::Resetting;

        self.vf_reset_event(vf)?;

        let mac = vf_rec(&self.vfs, vf)?.mac;
        if !mac.is_zero() {
            if let Err(e) = self.set_vf_mac(vf, mac) {
                pf_log!(self, Warn, "VF {vf}: restoring MAC {mac} failed: {e}");
            }
        }

        // Always drop when a VF queue is full. Hide the port VLAN from
        // the VF if it has one.
        let mut qde = regs::QDE_ENABLE;
        if vf_rec(&self.vfs, vf)?.pf_vlan != 0 {
            qde |= regs::QDE_HIDE_VLAN;
        }
        self.write_qde(vf, qde);

        self.set_vf_rx_tx(vf)?;

        let rec = vf_rec_mut(&mut self.vfs, vf)?;
        rec.clear_to_send = true;
        rec.state = VfState::Ready;
        let mac = rec.mac;
        let pinned = rec.pf_set_mac;

        let addr = regs::vmecm(vf.reg_offset());
        let vmecm = self.hw.read_reg(addr);
        self.hw.write_reg(addr, vmecm | vf.bit());

        // Head write-back addresses survive a function level reset.
        let qpp = self.vmdq.queues_per_pool;
        for q in 0..qpp {
            let idx = vf.pool() * qpp + q;
            self.hw.write_reg(regs::pvftdwbah(idx), 0);
            self.hw.write_reg(regs::pvftdwbal(idx), 0);
        }

        self.stats.vf_resets += 1;
        Ok((!mac.is_zero() && pinned).then_some(mac))
    }

    fn rcv_msg_from_vf(&mut self, vf: VfIndex) {
        let mut msg = match self.hw.mbx_read(vf) {
            Ok(msg) => msg,
            Err(e) => {
                pf_log!(
                    self,
                    Error,
                    "error receiving message from VF {vf}: {e}"
                );
                return;
            }
        };
        self.stats.msgs_rx += 1;

        // Already answered; a replay of something we handled.
        if msg.is_answered() {
            self.stats.msgs_replayed += 1;
            return;
        }

        // Flush the read acknowledgement before replying.
        self.hw.flush();

        if msg.header() == Opcode::Reset as u32 {
            self.vf_reset_msg(vf);
            return;
        }

        let cts = vf_rec(&self.vfs, vf).is_ok_and(|r| r.clear_to_send);
        if !cts {
            self.stats.msgs_not_cts += 1;
            self.stats.msgs_failed += 1;
            msg.tag(MsgType::FAILURE);
            if let Err(e) = self.hw.mbx_write(vf, &msg, 1) {
                pf_log!(self, Warn, "VF {vf}: reply failed: {e}");
            }
            return;
        }

        let flag = match self.handle_vf_msg(vf, &mut msg) {
            Ok(()) => MsgType::SUCCESS,
            Err(e) => {
                self.stats.msgs_failed += 1;
                pf_log!(
                    self,
                    Note,
                    "VF {vf}: message {:#010x} failed: {e}",
                    msg.header()
                );
                MsgType::FAILURE
            }
        };

        msg.tag(flag | MsgType::CTS);
        if let Err(e) = self.hw.mbx_write(vf, &msg, MBX_SIZE) {
            pf_log!(self, Warn, "VF {vf}: reply failed: {e}");
        }
    }

    /// Dispatch one request from a clear-to-send VF. Query handlers
    /// write their results into `msg`, which becomes the reply.
    fn handle_vf_msg(&mut self, vf: VfIndex, msg: &mut MbxMsg) -> Result<()> {
        let op = match msg.opcode() {
            Ok(op) => op,
            Err(raw) => {
                self.stats.msgs_unknown += 1;
                pf_log!(self, Error, "unhandled msg {:08x}", msg.header());
                return Err(SriovError::ProtocolError(format!(
                    "unknown opcode {raw:#x}"
                )));
            }
        };

        match op {
            Opcode::SetMacAddr => self.set_mac_msg(vf, msg.mac()),

            Opcode::SetMulticast => {
                let count = msg.info() as usize;
                self.set_multicast_msg(vf, msg.hashes(count))
            }

            Opcode::SetVlan => {
                let add = msg.info() != 0;
                let vid = (msg.word(1) & regs::VLVF_VLANID_MASK) as u16;
                self.set_vlan_msg(vf, vid, add)
            }

            Opcode::SetLpe => self.set_vf_lpe(vf, msg.word(1)),

            Opcode::SetMacvlan => {
                self.set_macvlan_msg(vf, msg.info(), msg.mac())
            }

            Opcode::ApiNegotiate => self.negotiate_vf_api(vf, msg.word(1)),

            Opcode::GetQueues => self.get_vf_queues(vf, msg),

            Opcode::GetReta => self.get_vf_reta(vf, msg),

            Opcode::GetRssKey => self.get_vf_rss_key(vf, msg),

            Opcode::UpdateXcastMode => {
                let mode = self.update_xcast_mode(vf, msg.word(1))?;
                msg.set_word(1, mode as u32);
                Ok(())
            }

            Opcode::GetLinkState => self.get_vf_link_state(vf, msg),

            // A reset carrying anything in its info byte is not a
            // reset.
            Opcode::Reset => Err(SriovError::ProtocolError(format!(
                "malformed reset {:#010x}",
                msg.header()
            ))),
        }
    }

    fn rcv_ack_from_vf(&mut self, vf: VfIndex) {
        // A VF that isn't clear to send shouldn't be reading either.
        let cts = vf_rec(&self.vfs, vf).is_ok_and(|r| r.clear_to_send);
        if !cts {
            let nack = MbxMsg::new(MsgType::FAILURE.bits());
            if let Err(e) = self.hw.mbx_write(vf, &nack, 1) {
                pf_log!(self, Warn, "VF {vf}: nack failed: {e}");
            }
        }
    }

    fn negotiate_vf_api(&mut self, vf: VfIndex, wire: u32) -> Result<()> {
        match MbxApiVersion::from_negotiation(wire) {
            Some(api) => {
                vf_rec_mut(&mut self.vfs, vf)?.api = api;
                Ok(())
            }

            None => {
                pf_log!(
                    self,
                    Note,
                    "VF {vf} requested invalid api version {wire}"
                );
                Err(SriovError::ProtocolError(format!(
                    "unsupported mailbox API {wire}"
                )))
            }
        }
    }

    fn get_vf_queues(&mut self, vf: VfIndex, msg: &mut MbxMsg) -> Result<()> {
        let rec = vf_rec(&self.vfs, vf)?;
        if !rec.api.has_queue_query() {
            return Err(SriovError::ProtocolError(format!(
                "queue query unsupported by mailbox API {}",
                rec.api
            )));
        }

        let qpp = self.vmdq.queues_per_pool;
        let num_tcs = self.pf.num_tcs;

        // Which TC the default user priority maps to.
        let default_tc = if num_tcs > 1 {
            let up = usize::from(self.pf.default_up & 0x7);
            u32::from(self.pf.prio_tc_map[up])
        } else {
            0
        };

        // Tell the VF whether it must strip VLAN tags.
        let trans_vlan = if num_tcs > 0 {
            u32::from(num_tcs)
        } else if rec.pf_vlan != 0 || rec.pf_qos != 0 {
            1
        } else {
            0
        };

        msg.set_word(mbx::VF_TX_QUEUES, qpp);
        msg.set_word(mbx::VF_RX_QUEUES, qpp);
        msg.set_word(mbx::VF_TRANS_VLAN, trans_vlan);
        msg.set_word(mbx::VF_DEF_QUEUE, default_tc);
        Ok(())
    }

    /// Check that `vf` may query RSS state at all.
    fn check_rss_query(&self, vf: VfIndex) -> Result<()> {
        if !self.caps.contains(Capabilities::RSS_QUERY) {
            return Err(SriovError::NotSupported("VF RSS query".into()));
        }

        let rec = vf_rec(&self.vfs, vf)?;
        if !rec.rss_query_enabled {
            return Err(SriovError::PermissionDenied(
                "RSS query not enabled for VF".into(),
            ));
        }

        if !rec.api.has_v1_2_ops() {
            return Err(SriovError::ProtocolError(format!(
                "RSS query unsupported by mailbox API {}",
                rec.api
            )));
        }

        Ok(())
    }

    /// Reply with the redirection table, two bits per entry, sixteen
    /// entries per word. VFs of these parts use at most four queues,
    /// so nothing is lost.
    fn get_vf_reta(&mut self, vf: VfIndex, msg: &mut MbxMsg) -> Result<()> {
        self.check_rss_query(vf)?;

        let reta = &self.pf.rss_indir_tbl;
        let words = reta.len() / 16;
        if words > MBX_SIZE - 1 {
            return Err(SriovError::NotSupported(format!(
                "redirection table of {} entries",
                reta.len()
            )));
        }

        for (i, chunk) in reta.chunks_exact(16).enumerate() {
            let packed = chunk
                .iter()
                .enumerate()
                .fold(0u32, |acc, (j, e)| {
                    acc | (u32::from(e & 0x3) << (2 * j))
                });
            msg.set_word(i + 1, packed);
        }

        Ok(())
    }

    fn get_vf_rss_key(&mut self, vf: VfIndex, msg: &mut MbxMsg) -> Result<()> {
        self.check_rss_query(vf)?;
        let key = self.pf.rss_key;
        msg.payload_bytes_mut()[..key.len()].copy_from_slice(&key);
        Ok(())
    }

    fn get_vf_link_state(
        &mut self,
        vf: VfIndex,
        msg: &mut MbxMsg,
    ) -> Result<()> {
        let rec = vf_rec(&self.vfs, vf)?;
        if !rec.api.has_v1_2_ops() {
            return Err(SriovError::ProtocolError(format!(
                "link state query unsupported by mailbox API {}",
                rec.api
            )));
        }

        msg.set_word(1, u32::from(rec.link_enable));
        Ok(())
    }
}
