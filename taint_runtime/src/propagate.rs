// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Contamination rules.
//!
//! These hooks are the only places where the runtime decides taint on its own:
//! - pushes stamp the thread's stack taint,
//! - reads of tainted table slots and upvalues contaminate the reader,
//! - calls of tainted functions contaminate the caller,
//! - table writes record the writer's stack taint.
//!
//! Stamping is gated on [`TaintMode::writes`], contamination on [`TaintMode::reads`].

#[cfg(doc)]
use crate::mode::TaintMode;

use crate::tag::{Taint, union};
use crate::thread::ThreadTaint;
use crate::trace::TaintCause;
use crate::value::{ObjectId, TableKey, Value};
use crate::vm::Vm;

impl Vm {
    /// Slot taint for a value pushed now.
    pub(crate) fn stamp(&self) -> Taint {
        if self.mode.writes() {
            self.th().taint.stack
        } else {
            None
        }
    }

    /// Persistent taint for a string, table, userdata or thread created now.
    pub(crate) fn new_object_stamp(&self) -> Taint {
        if self.mode.writes() {
            self.th().taint.new_object
        } else {
            None
        }
    }

    /// Persistent taint for a function created now.
    pub(crate) fn new_closure_stamp(&self) -> Taint {
        if self.mode.writes() {
            self.th().taint.new_closure
        } else {
            None
        }
    }

    pub(crate) fn push_fresh(&mut self, value: Value) {
        let taint = self.stamp();
        self.th_mut().push(value, taint);
    }

    /// Pushes a value read from a tainted location.
    pub(crate) fn push_read(&mut self, value: Value, slot: Taint, cause: TaintCause) {
        let slot = if self.mode.reads() { slot } else { None };
        self.contaminate(slot, cause);
        let taint = union(self.stamp(), slot);
        self.th_mut().push(value, taint);
    }

    /// Applies `incoming` to the current thread using the union rule.
    pub(crate) fn contaminate(&mut self, incoming: Taint, cause: TaintCause) {
        if incoming.is_none() || !self.mode.reads() {
            return;
        }
        let cur = self.th().taint;
        let next = ThreadTaint {
            stack: union(cur.stack, incoming),
            new_object: union(cur.new_object, incoming),
            new_closure: union(cur.new_closure, incoming),
        };
        self.replace_thread_taint(self.current, next, cause);
    }

    /// Stores `t[key] = value` and records the writer's taint on the slot.
    pub(crate) fn write_slot(&mut self, table: ObjectId, key: TableKey, value: Value) {
        let taint = self.stamp();
        if let Some(t) = self.heap.table_mut(table) {
            t.set(key, value, taint);
        }
    }
}
