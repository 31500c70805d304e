// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Threads of execution: taint state, value stack and call frames.
//!
//! The value stack is split into two parallel vectors (values and slot taint) indexed the same
//! way, so every occupied slot has exactly one slot taint.

use alloc::vec::Vec;

use crate::tag::Taint;
use crate::value::{ObjectId, Value};

/// The taint carried by a thread.
///
/// `stack` is the ambient taint stamped on values pushed by the thread and is what decides whether
/// the thread is secure. `new_object` and `new_closure` are stamped as the persistent taint of
/// objects and functions the thread constructs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ThreadTaint {
    /// Taint stamped on pushed values.
    pub stack: Taint,
    /// Taint stamped on new strings, tables, userdata and threads.
    pub new_object: Taint,
    /// Taint stamped on new functions.
    pub new_closure: Taint,
}

impl ThreadTaint {
    /// A fully secure thread.
    pub const SECURE: Self = Self::uniform(None);

    /// All three fields set to `taint`.
    #[must_use]
    pub const fn uniform(taint: Taint) -> Self {
        Self {
            stack: taint,
            new_object: taint,
            new_closure: taint,
        }
    }

    /// Returns `true` if the stack taint is secure.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.stack.is_none()
    }
}

/// An activation record.
#[derive(Copy, Clone, Debug)]
pub(crate) struct CallFrame {
    /// Absolute stack index of the called function.
    pub(crate) func: usize,
    /// Absolute stack index of the first argument.
    pub(crate) base: usize,
    /// Function object being executed.
    pub(crate) function: ObjectId,
    /// Stack taint of the thread once the call was entered.
    pub(crate) taint: Taint,
}

/// State of one thread.
#[derive(Clone, Debug)]
pub struct ThreadState {
    pub(crate) taint: ThreadTaint,
    pub(crate) object_taint: Taint,
    pub(crate) env: ObjectId,
    values: Vec<Value>,
    taints: Vec<Taint>,
    pub(crate) frames: Vec<CallFrame>,
}

impl ThreadState {
    pub(crate) fn new(taint: ThreadTaint, object_taint: Taint, env: ObjectId) -> Self {
        Self {
            taint,
            object_taint,
            env,
            values: Vec::new(),
            taints: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Current thread taint.
    #[must_use]
    pub fn taint(&self) -> ThreadTaint {
        self.taint
    }

    /// Number of active call frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Absolute index one past the last occupied slot.
    #[must_use]
    pub fn top(&self) -> usize {
        self.values.len()
    }

    /// Absolute index of the first slot owned by the innermost frame.
    #[must_use]
    pub fn base(&self) -> usize {
        self.frames.last().map_or(0, |f| f.base)
    }

    pub(crate) fn push(&mut self, value: Value, taint: Taint) {
        self.values.push(value);
        self.taints.push(taint);
    }

    pub(crate) fn pop(&mut self) -> Option<(Value, Taint)> {
        let v = self.values.pop()?;
        let t = self.taints.pop().flatten();
        Some((v, t))
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
        self.taints.truncate(len);
    }

    /// Grows or shrinks the stack to `len`, filling new slots with `nil` stamped `taint`.
    pub(crate) fn resize(&mut self, len: usize, taint: Taint) {
        self.values.resize(len, Value::Nil);
        self.taints.resize(len, taint);
    }

    pub(crate) fn value(&self, abs: usize) -> Value {
        self.values.get(abs).copied().unwrap_or(Value::Nil)
    }

    pub(crate) fn slot_taint(&self, abs: usize) -> Taint {
        self.taints.get(abs).copied().flatten()
    }

    pub(crate) fn set_slot(&mut self, abs: usize, value: Value, taint: Taint) {
        if let (Some(v), Some(t)) = (self.values.get_mut(abs), self.taints.get_mut(abs)) {
            *v = value;
            *t = taint;
        }
    }

    pub(crate) fn set_slot_taint(&mut self, abs: usize, taint: Taint) {
        if let Some(t) = self.taints.get_mut(abs) {
            *t = taint;
        }
    }

    /// Stamps every slot in `from..top` with `taint`.
    pub(crate) fn stamp_from(&mut self, from: usize, taint: Taint) {
        if let Some(slots) = self.taints.get_mut(from..) {
            slots.fill(taint);
        }
    }

    /// Moves the slot at `from` to `to`, shifting the slots in between (value and taint together).
    pub(crate) fn rotate(&mut self, from: usize, to: usize) {
        if from >= self.values.len() || to >= self.values.len() {
            return;
        }
        let v = self.values.remove(from);
        let t = self.taints.remove(from);
        self.values.insert(to, v);
        self.taints.insert(to, t);
    }

    /// Removes `count` slots starting at `at`, shifting later slots down.
    pub(crate) fn drain(&mut self, at: usize, count: usize) {
        let end = at.saturating_add(count).min(self.values.len());
        if at >= end {
            return;
        }
        self.values.drain(at..end);
        self.taints.drain(at..end);
    }

    /// Frame at debug `level` (0 = innermost).
    pub(crate) fn frame(&self, level: usize) -> Option<&CallFrame> {
        let ix = self.frames.len().checked_sub(level.checked_add(1)?)?;
        self.frames.get(ix)
    }

    pub(crate) fn frame_mut(&mut self, level: usize) -> Option<&mut CallFrame> {
        let ix = self.frames.len().checked_sub(level.checked_add(1)?)?;
        self.frames.get_mut(ix)
    }

    /// Absolute index one past the slots owned by the frame at `level`.
    pub(crate) fn frame_limit(&self, level: usize) -> usize {
        match level.checked_sub(1).and_then(|inner| self.frame(inner)) {
            Some(inner) => inner.func,
            None => self.top(),
        }
    }

    /// Clears slot and call taint.
    pub(crate) fn clear_transient_taint(&mut self) {
        self.taints.fill(None);
        for frame in &mut self.frames {
            frame.taint = None;
        }
    }
}
