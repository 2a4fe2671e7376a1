// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use alloc::str::FromStr;
use alloc::string::String;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// An Ethernet station or group address, as programmed into the
/// receive address table.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const BROADCAST: Self = Self([0xFF; 6]);
    pub const ZERO: Self = Self([0; 6]);

    pub const fn from_const(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// The I/G bit of the first octet. Broadcast counts.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Whether a VF may claim this address as its own.
    pub fn is_valid_unicast(&self) -> bool {
        !(self.is_zero() || self.is_multicast())
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for b in bytes.iter_mut() {
            let part =
                parts.next().ok_or_else(|| format!("{s}: too few octets"))?;
            *b = u8::from_str_radix(part, 16)
                .map_err(|_| format!("{s}: bad octet {part:?}"))?;
        }

        match parts.next() {
            Some(_) => Err(format!("{s}: too many octets")),
            None => Ok(Self(bytes)),
        }
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn parse_and_classify() {
        let mac: MacAddr = "a8:40:25:00:00:01".parse().unwrap();
        assert_eq!(mac.bytes(), [0xA8, 0x40, 0x25, 0x00, 0x00, 0x01]);
        assert!(mac.is_valid_unicast());
        assert_eq!(mac.to_string(), "A8:40:25:00:00:01");

        assert!(MacAddr::BROADCAST.is_multicast());
        assert!(!MacAddr::BROADCAST.is_valid_unicast());
        assert!(!MacAddr::ZERO.is_valid_unicast());

        let mcast = MacAddr::from([0x01, 0x00, 0x5E, 0x00, 0x00, 0x01]);
        assert!(!mcast.is_valid_unicast());

        assert!("a8:40:25:00:01".parse::<MacAddr>().is_err());
        assert!("a8:40:25:00:01:zz".parse::<MacAddr>().is_err());
        assert!("a8:40:25:00:00:01:02".parse::<MacAddr>().is_err());
    }
}
