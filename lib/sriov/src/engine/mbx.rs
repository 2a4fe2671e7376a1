// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The PF/VF mailbox wire format.
//!
//! A message is sixteen 32-bit words. The first word is the header:
//!
//! ```text
//! 31      30      29     28..24   23........16   15..............0
//! SUCCESS FAILURE CTS    (rsvd)   info           opcode
//! ```
//!
//! The remaining fifteen words are opcode-specific payload. MAC
//! addresses and multicast hashes are packed as bytes into the
//! payload in the byte order of the host, which both ends share.

use crate::api::MacAddr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Words in a mailbox message.
pub const MBX_SIZE: usize = 16;

/// Words in a reply to [`Opcode::Reset`].
pub const PERMADDR_MSG_LEN: usize = 4;

pub const MSGINFO_SHIFT: u32 = 16;
pub const MSGINFO_MASK: u32 = 0xFF << MSGINFO_SHIFT;
pub const OPCODE_MASK: u32 = 0xFFFF;

/// Header of a PF-originated control message (a "ping").
pub const PF_CONTROL_MSG: u32 = 0x0100;

/// Word indices of a [`Opcode::GetQueues`] reply.
pub const VF_TX_QUEUES: usize = 1;
pub const VF_RX_QUEUES: usize = 2;
pub const VF_TRANS_VLAN: usize = 3;
pub const VF_DEF_QUEUE: usize = 4;

bitflags::bitflags! {
    /// The status bits in a message header.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct MsgType: u32 {
        const SUCCESS = 0x8000_0000;
        const FAILURE = 0x4000_0000;
        /// The VF is clear to send.
        const CTS = 0x2000_0000;
    }
}

/// The requests a VF may send.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum Opcode {
    Reset = 0x01,
    SetMacAddr = 0x02,
    SetMulticast = 0x03,
    SetVlan = 0x04,
    SetLpe = 0x05,
    SetMacvlan = 0x06,
    ApiNegotiate = 0x08,
    GetQueues = 0x09,
    GetReta = 0x0a,
    GetRssKey = 0x0b,
    UpdateXcastMode = 0x0c,
    GetLinkState = 0x10,
}

impl TryFrom<u16> for Opcode {
    type Error = u16;

    fn try_from(val: u16) -> Result<Self, Self::Error> {
        match val {
            0x01 => Ok(Self::Reset),
            0x02 => Ok(Self::SetMacAddr),
            0x03 => Ok(Self::SetMulticast),
            0x04 => Ok(Self::SetVlan),
            0x05 => Ok(Self::SetLpe),
            0x06 => Ok(Self::SetMacvlan),
            0x08 => Ok(Self::ApiNegotiate),
            0x09 => Ok(Self::GetQueues),
            0x0a => Ok(Self::GetReta),
            0x0b => Ok(Self::GetRssKey),
            0x0c => Ok(Self::UpdateXcastMode),
            0x10 => Ok(Self::GetLinkState),
            _ => Err(val),
        }
    }
}

/// A single mailbox message, in either direction.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    FromBytes,
    Immutable,
    IntoBytes,
    KnownLayout,
    PartialEq,
)]
#[repr(C)]
pub struct MbxMsg {
    words: [u32; MBX_SIZE],
}

impl MbxMsg {
    /// A message carrying only a header.
    pub fn new(hdr: u32) -> Self {
        let mut words = [0u32; MBX_SIZE];
        words[0] = hdr;
        Self { words }
    }

    /// A request for `op` with `info` in the header's info byte.
    pub fn request(op: Opcode, info: u8) -> Self {
        Self::new(((info as u32) << MSGINFO_SHIFT) | op as u32)
    }

    /// Build a message from the leading words of `src`. Anything
    /// beyond [`MBX_SIZE`] words is ignored.
    pub fn from_words(src: &[u32]) -> Self {
        let mut msg = Self::default();
        let n = src.len().min(MBX_SIZE);
        msg.words[..n].copy_from_slice(&src[..n]);
        msg
    }

    pub fn words(&self) -> &[u32; MBX_SIZE] {
        &self.words
    }

    #[inline]
    pub fn header(&self) -> u32 {
        self.words[0]
    }

    pub fn set_header(&mut self, hdr: u32) {
        self.words[0] = hdr;
    }

    /// The raw opcode field.
    #[inline]
    pub fn opcode_raw(&self) -> u16 {
        (self.words[0] & OPCODE_MASK) as u16
    }

    pub fn opcode(&self) -> Result<Opcode, u16> {
        Opcode::try_from(self.opcode_raw())
    }

    /// The header's info byte. Its meaning depends on the opcode: an
    /// entry count, a list index, or an add/remove toggle.
    #[inline]
    pub fn info(&self) -> u32 {
        (self.words[0] & MSGINFO_MASK) >> MSGINFO_SHIFT
    }

    pub fn flags(&self) -> MsgType {
        MsgType::from_bits_truncate(self.words[0])
    }

    /// Has this message already been answered? A VF never sets the
    /// status bits itself, so a tagged message is a stale replay.
    pub fn is_answered(&self) -> bool {
        self.flags().intersects(MsgType::SUCCESS | MsgType::FAILURE)
    }

    /// Add `flags` to the header.
    pub fn tag(&mut self, flags: MsgType) {
        self.words[0] |= flags.bits();
    }

    /// Return the `i`th word, or zero when out of range.
    #[inline]
    pub fn word(&self, i: usize) -> u32 {
        self.words.get(i).copied().unwrap_or(0)
    }

    pub fn set_word(&mut self, i: usize, val: u32) {
        if let Some(w) = self.words.get_mut(i) {
            *w = val;
        }
    }

    /// The payload (everything after the header) as bytes.
    pub fn payload_bytes(&self) -> &[u8] {
        self.words[1..].as_bytes()
    }

    pub fn payload_bytes_mut(&mut self) -> &mut [u8] {
        self.words[1..].as_mut_bytes()
    }

    /// The MAC address at the start of the payload.
    pub fn mac(&self) -> MacAddr {
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&self.payload_bytes()[..6]);
        MacAddr::from(bytes)
    }

    pub fn set_mac(&mut self, mac: MacAddr) {
        self.payload_bytes_mut()[..6].copy_from_slice(&mac.bytes());
    }

    /// The first `count` 16-bit multicast hashes in the payload.
    ///
    /// The count is clamped to what the payload can carry.
    pub fn hashes(&self, count: usize) -> impl Iterator<Item = u16> + '_ {
        self.payload_bytes()
            .chunks_exact(2)
            .take(count)
            .map(|b| u16::from_ne_bytes([b[0], b[1]]))
    }

    /// Pack `hashes` into the payload and the count into the info
    /// byte. Returns how many hashes fit.
    pub fn set_hashes(&mut self, hashes: &[u16]) -> usize {
        let payload = self.payload_bytes_mut();
        let mut n = 0;
        for (dst, h) in payload.chunks_exact_mut(2).zip(hashes) {
            dst.copy_from_slice(&h.to_ne_bytes());
            n += 1;
        }
        self.words[0] = (self.words[0] & !MSGINFO_MASK)
            | (((n as u32) << MSGINFO_SHIFT) & MSGINFO_MASK);
        n
    }
}
