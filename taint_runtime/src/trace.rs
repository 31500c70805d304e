// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing hooks for `taint_runtime`.
//!
//! Tracing is optional and is designed to be `no_std` friendly.
//! The VM only emits events requested by a [`TraceMask`].
//!
//! To enable tracing, install a [`TraceSink`] with [`Vm::set_trace_sink`].

#[cfg(doc)]
use crate::vm::Vm;

use crate::error::{RuntimeError, Status};
use crate::tag::{Taint, TaintTags};
use crate::thread::ThreadTaint;
use crate::value::{ObjectId, ThreadId};

/// A set of trace events requested by a [`TraceSink`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TraceMask(u32);

impl core::ops::BitOr for TraceMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for TraceMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl TraceMask {
    /// No tracing.
    pub const NONE: Self = Self(0);
    /// Trace function calls.
    ///
    /// Enables (for [`ScopeKind::Call`]):
    /// - [`TraceSink::scope_enter`]
    /// - [`TraceSink::scope_exit`]
    pub const CALL: Self = Self(1 << 0);
    /// Trace secure-call boundaries.
    ///
    /// Enables (for [`ScopeKind::SecureCall`] and [`ScopeKind::Delegate`]):
    /// - [`TraceSink::scope_enter`]
    /// - [`TraceSink::scope_exit`]
    pub const SECURE: Self = Self(1 << 1);
    /// Trace changes of a thread's taint.
    ///
    /// Enables:
    /// - [`TraceSink::taint_changed`]
    pub const TAINT: Self = Self(1 << 2);
    /// Everything.
    pub const ALL: Self = Self(Self::CALL.0 | Self::SECURE.0 | Self::TAINT.0);

    /// Returns `true` if this mask includes all bits in `other`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

/// The kind of scope being entered/exited.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    /// A function activation.
    Call {
        /// Function being executed.
        function: ObjectId,
    },
    /// A [`Vm::secure_call`] boundary.
    SecureCall,
    /// A secure delegate invocation.
    Delegate,
}

/// Scope outcome for tracing.
#[derive(Copy, Clone, Debug)]
pub enum TraceOutcome<'a> {
    /// The scope completed normally.
    Ok,
    /// The scope is being left by an error.
    Error(&'a RuntimeError),
    /// A protected boundary caught an error and reported `Status`.
    Caught(Status),
}

/// Why a thread's taint changed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaintCause {
    /// Set through the taint API.
    Explicit,
    /// [`Vm::force_taint_thread`].
    Forced,
    /// [`Vm::clear_taint`].
    Cleared,
    /// [`Vm::reset_taint`].
    Reset,
    /// Read of a tainted table slot.
    TableRead,
    /// Call of a tainted function.
    Call,
    /// Secure-call boundary restored the caller's taint.
    SecureRestore,
    /// A secure delegate entered its forced-secure scope.
    DelegateEntry,
}

/// A trace sink that can receive VM events.
///
/// Every callback receives the VM's [`TaintTags`] so sinks can resolve tag names.
pub trait TraceSink {
    /// Returns the set of events the sink wants.
    fn mask(&self) -> TraceMask {
        TraceMask::NONE
    }

    /// Called when entering a scope.
    ///
    /// Called only if `mask()` includes:
    /// - [`TraceMask::CALL`] (for [`ScopeKind::Call`])
    /// - [`TraceMask::SECURE`] (for [`ScopeKind::SecureCall`] and [`ScopeKind::Delegate`])
    ///
    /// - `thread`: thread running the scope
    /// - `depth`: frame depth after entering the scope
    /// - `taint`: stack taint of the thread once the scope is entered
    fn scope_enter(
        &mut self,
        _tags: &TaintTags,
        _kind: ScopeKind,
        _thread: ThreadId,
        _depth: usize,
        _taint: Taint,
    ) {
    }

    /// Called when exiting a scope, including exits caused by errors.
    ///
    /// Same mask rules as [`TraceSink::scope_enter`].
    fn scope_exit(
        &mut self,
        _tags: &TaintTags,
        _kind: ScopeKind,
        _thread: ThreadId,
        _depth: usize,
        _outcome: TraceOutcome<'_>,
    ) {
    }

    /// Called whenever a thread's taint actually changes.
    ///
    /// Called only if `mask()` includes [`TraceMask::TAINT`].
    fn taint_changed(
        &mut self,
        _tags: &TaintTags,
        _thread: ThreadId,
        _from: ThreadTaint,
        _to: ThreadTaint,
        _cause: TaintCause,
    ) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_contains() {
        let m = TraceMask::CALL | TraceMask::TAINT;
        assert!(m.contains(TraceMask::CALL));
        assert!(!m.contains(TraceMask::SECURE));
        assert!(TraceMask::ALL.contains(m));
        assert!(m.contains(TraceMask::NONE));
    }
}
