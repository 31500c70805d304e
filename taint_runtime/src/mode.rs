// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Runtime-wide taint mode.

use core::fmt;
use core::str::FromStr;

/// Controls which half of the taint machinery is active.
///
/// - Reads (`r`): recorded taint is observable through queries, and reading tainted data or calling
///   tainted functions contaminates the running thread.
/// - Writes (`w`): taint mutators take effect, and pushes, object construction and table writes
///   stamp the running thread's taint.
///
/// [`TaintMode::Disabled`] turns both off: every query reports secure and every mutator is a no-op.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum TaintMode {
    /// No taint is observed or recorded.
    Disabled,
    /// Observe and propagate on reads only.
    Read,
    /// Record on writes only.
    Write,
    /// Full tracking.
    #[default]
    ReadWrite,
}

impl TaintMode {
    /// All modes, in reflection order.
    pub const ALL: [Self; 4] = [Self::Disabled, Self::Read, Self::Write, Self::ReadWrite];

    /// Returns `true` if taint reads are enabled.
    #[must_use]
    pub const fn reads(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Returns `true` if taint writes are enabled.
    #[must_use]
    pub const fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    /// Short name used by the reflection library (`"disabled"`, `"r"`, `"w"`, `"rw"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Read => "r",
            Self::Write => "w",
            Self::ReadWrite => "rw",
        }
    }
}

impl fmt::Display for TaintMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown mode name.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UnknownTaintMode;

impl fmt::Display for UnknownTaintMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid option (expected 'disabled', 'r', 'w' or 'rw')")
    }
}

impl core::error::Error for UnknownTaintMode {}

impl FromStr for TaintMode {
    type Err = UnknownTaintMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or(UnknownTaintMode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_roundtrip() {
        for mode in TaintMode::ALL {
            assert_eq!(mode.as_str().parse::<TaintMode>(), Ok(mode));
        }
        assert_eq!("rx".parse::<TaintMode>(), Err(UnknownTaintMode));
    }

    #[test]
    fn mode_gates() {
        assert!(!TaintMode::Disabled.reads() && !TaintMode::Disabled.writes());
        assert!(TaintMode::Read.reads() && !TaintMode::Read.writes());
        assert!(!TaintMode::Write.reads() && TaintMode::Write.writes());
        assert!(TaintMode::ReadWrite.reads() && TaintMode::ReadWrite.writes());
        assert_eq!(TaintMode::default(), TaintMode::ReadWrite);
    }
}
