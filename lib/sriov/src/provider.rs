// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Providers let the engine run in different contexts by plugging in
//! the services it needs from its host. Today that is only logging:
//! a driver maps it to the kernel log, a test maps it to `println!`
//! or to an in-memory ring it can assert against.

use alloc::boxed::Box;
use core::fmt;
use core::fmt::Display;

/// The set of all host-specific providers required by a PF.
pub struct Providers {
    pub log: Box<dyn LogProvider>,
}

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
///
/// Messages are meant for the host administrator. A misbehaving VF
/// is reported at [`LogLevel::Warn`]; a failure of the PF itself at
/// [`LogLevel::Error`].
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

cfg_if! {
    if #[cfg(any(feature = "std", test))] {
        use std::string::String;
        use std::sync::Arc;
        use std::sync::Mutex;
        use std::vec::Vec;

        #[derive(Clone, Copy)]
        pub struct PrintlnLog;

        impl LogProvider for PrintlnLog {
            fn log(&self, level: LogLevel, msg: &str) {
                println!("{level} {msg}");
            }
        }

        /// A log provider which keeps every message so that a test can
        /// inspect what the engine reported.
        ///
        /// Clones share the same ring.
        #[derive(Clone, Default)]
        pub struct RingLog {
            ring: Arc<Mutex<Vec<(LogLevel, String)>>>,
        }

        impl RingLog {
            pub fn new() -> Self {
                Self::default()
            }

            /// Return a copy of all messages logged so far.
            pub fn entries(&self) -> Vec<(LogLevel, String)> {
                match self.ring.lock() {
                    Ok(ring) => ring.clone(),
                    Err(poisoned) => poisoned.into_inner().clone(),
                }
            }

            /// Does any message at `level` contain `needle`?
            pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
                self.entries()
                    .iter()
                    .any(|(l, m)| *l == level && m.contains(needle))
            }
        }

        impl LogProvider for RingLog {
            fn log(&self, level: LogLevel, msg: &str) {
                let mut ring = match self.ring.lock() {
                    Ok(ring) => ring,
                    Err(poisoned) => poisoned.into_inner(),
                };
                ring.push((level, String::from(msg)));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ring_log_shared_between_clones() {
        let log = RingLog::new();
        let other = log.clone();
        other.log(LogLevel::Warn, "VF 3 attempted to override MAC");
        log.log(LogLevel::Note, "enabling 4 VFs");

        assert_eq!(log.entries().len(), 2);
        assert!(log.contains(LogLevel::Warn, "override MAC"));
        assert!(!log.contains(LogLevel::Error, "override MAC"));
    }
}
