// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Taint query and mutation API.
//!
//! Argument checks happen before any taint is touched. When the mode is
//! [`TaintMode::Disabled`] every query reports secure and every mutator is a no-op, without
//! checking arguments at all.

use crate::error::ApiError;
use crate::mode::TaintMode;
use crate::tag::{Taint, TaintTag};
use crate::thread::ThreadTaint;
use crate::trace::TaintCause;
use crate::value::{ObjectId, TableKey, ThreadId, Value};
use crate::vm::Vm;

const LEVEL_OUT_OF_RANGE: ApiError = ApiError::ArgumentOutOfRange("level out of range");
const LOCAL_OUT_OF_RANGE: ApiError = ApiError::ArgumentOutOfRange("local index out of range");
const UPVALUE_OUT_OF_RANGE: ApiError = ApiError::ArgumentOutOfRange("upvalue index out of range");
const EXPECTED_OBJECT: ApiError =
    ApiError::InvalidArgument("expected function, string, table, thread, or userdata");
const EXPECTED_TABLE: ApiError = ApiError::InvalidArgument("table expected");
const EXPECTED_FUNCTION: ApiError = ApiError::InvalidArgument("function expected");
const INVALID_KEY: ApiError = ApiError::InvalidArgument("table index is nil or NaN");

/// Something that owns a persistent taint.
#[derive(Copy, Clone)]
enum Owner {
    Object(ObjectId),
    Thread(ThreadId),
}

impl Vm {
    /// Current taint mode.
    #[must_use]
    pub fn taint_mode(&self) -> TaintMode {
        self.mode
    }

    /// Changes the taint mode. Recorded taint is kept and becomes observable again once reads
    /// are re-enabled.
    pub fn set_taint_mode(&mut self, mode: TaintMode) {
        self.mode = mode;
    }

    fn observe(&self, taint: Taint) -> Taint {
        if self.mode.reads() { taint } else { None }
    }

    // -----------------------------------------------------------------------------------------
    // Thread taint
    // -----------------------------------------------------------------------------------------

    /// All three taint fields of `thread` (default: the current thread).
    pub fn thread_taint_state(&self, thread: Option<ThreadId>) -> Result<ThreadTaint, ApiError> {
        if self.mode == TaintMode::Disabled {
            return Ok(ThreadTaint::SECURE);
        }
        let th = self.threads[self.resolve_thread(thread)?.0 as usize].taint;
        Ok(ThreadTaint {
            stack: self.observe(th.stack),
            new_object: self.observe(th.new_object),
            new_closure: self.observe(th.new_closure),
        })
    }

    /// Stack taint of `thread`; this is what decides whether the thread is secure.
    pub fn thread_taint(&self, thread: Option<ThreadId>) -> Result<Taint, ApiError> {
        self.thread_taint_state(thread).map(|t| t.stack)
    }

    /// Taint stamped on objects `thread` creates.
    pub fn new_object_taint(&self, thread: Option<ThreadId>) -> Result<Taint, ApiError> {
        self.thread_taint_state(thread).map(|t| t.new_object)
    }

    /// Taint stamped on functions `thread` creates.
    pub fn new_closure_taint(&self, thread: Option<ThreadId>) -> Result<Taint, ApiError> {
        self.thread_taint_state(thread).map(|t| t.new_closure)
    }

    /// Returns `true` if `thread` runs secure.
    pub fn is_secure_thread(&self, thread: Option<ThreadId>) -> Result<bool, ApiError> {
        self.thread_taint(thread).map(|t| t.is_none())
    }

    fn mutate_thread(
        &mut self,
        thread: Option<ThreadId>,
        cause: TaintCause,
        f: impl FnOnce(ThreadTaint) -> ThreadTaint,
    ) -> Result<(), ApiError> {
        if self.mode == TaintMode::Disabled {
            return Ok(());
        }
        let id = self.resolve_thread(thread)?;
        if !self.mode.writes() {
            return Ok(());
        }
        let next = f(self.threads[id.0 as usize].taint);
        self.replace_thread_taint(id, next, cause);
        Ok(())
    }

    /// Sets the stack, new-object and new-closure taint of `thread` to `taint`.
    pub fn set_thread_taint(
        &mut self,
        thread: Option<ThreadId>,
        taint: Taint,
    ) -> Result<(), ApiError> {
        self.mutate_thread(thread, TaintCause::Explicit, |_| ThreadTaint::uniform(taint))
    }

    /// Sets only the stack taint of `thread`.
    pub fn set_stack_taint(
        &mut self,
        thread: Option<ThreadId>,
        taint: Taint,
    ) -> Result<(), ApiError> {
        self.mutate_thread(thread, TaintCause::Explicit, |t| ThreadTaint {
            stack: taint,
            ..t
        })
    }

    /// Sets only the new-object taint of `thread`.
    pub fn set_new_object_taint(
        &mut self,
        thread: Option<ThreadId>,
        taint: Taint,
    ) -> Result<(), ApiError> {
        self.mutate_thread(thread, TaintCause::Explicit, |t| ThreadTaint {
            new_object: taint,
            ..t
        })
    }

    /// Sets only the new-closure taint of `thread`.
    pub fn set_new_closure_taint(
        &mut self,
        thread: Option<ThreadId>,
        taint: Taint,
    ) -> Result<(), ApiError> {
        self.mutate_thread(thread, TaintCause::Explicit, |t| ThreadTaint {
            new_closure: taint,
            ..t
        })
    }

    /// Taints a secure thread with [`TaintTag::FORCED`]. An already tainted thread keeps its tag.
    pub fn force_taint_thread(&mut self, thread: Option<ThreadId>) -> Result<(), ApiError> {
        self.mutate_thread(thread, TaintCause::Forced, |t| {
            if t.is_secure() {
                ThreadTaint::uniform(Some(TaintTag::FORCED))
            } else {
                t
            }
        })
    }

    /// Makes `thread` secure.
    pub fn clear_taint(&mut self, thread: Option<ThreadId>) -> Result<(), ApiError> {
        self.mutate_thread(thread, TaintCause::Cleared, |_| ThreadTaint::SECURE)
    }

    /// Makes `thread` secure and also clears its slot and call taint.
    pub fn reset_taint(&mut self, thread: Option<ThreadId>) -> Result<(), ApiError> {
        self.mutate_thread(thread, TaintCause::Reset, |_| ThreadTaint::SECURE)?;
        if self.mode.writes() {
            let id = self.resolve_thread(thread)?;
            self.threads[id.0 as usize].clear_transient_taint();
        }
        Ok(())
    }

    // -----------------------------------------------------------------------------------------
    // Value slots
    // -----------------------------------------------------------------------------------------

    /// Slot taint of the value at `idx`.
    pub fn value_taint(&self, idx: i32) -> Result<Taint, ApiError> {
        if self.mode == TaintMode::Disabled {
            return Ok(None);
        }
        let abs = self.abs_index(idx)?;
        Ok(self.observe(self.th().slot_taint(abs)))
    }

    /// Overwrites the slot taint of the value at `idx`.
    pub fn set_value_taint(&mut self, idx: i32, taint: Taint) -> Result<(), ApiError> {
        if self.mode == TaintMode::Disabled {
            return Ok(());
        }
        let abs = self.abs_index(idx)?;
        if self.mode.writes() {
            self.th_mut().set_slot_taint(abs, taint);
        }
        Ok(())
    }

    /// Returns `true` if the value at `idx` is secure.
    pub fn is_secure_value(&self, idx: i32) -> Result<bool, ApiError> {
        self.value_taint(idx).map(|t| t.is_none())
    }

    // -----------------------------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------------------------

    fn owner_at(&self, idx: i32) -> Result<Owner, ApiError> {
        match self.value(idx)? {
            Value::Thread(t) => Ok(Owner::Thread(t)),
            v => v.object().map(Owner::Object).ok_or(EXPECTED_OBJECT),
        }
    }

    /// Persistent taint of the string, table, function, thread or userdata at `idx`.
    pub fn object_taint(&self, idx: i32) -> Result<Taint, ApiError> {
        if self.mode == TaintMode::Disabled {
            return Ok(None);
        }
        let taint = match self.owner_at(idx)? {
            Owner::Object(id) => self.heap.taint(id),
            Owner::Thread(t) => self.thread(t).and_then(|th| th.object_taint),
        };
        Ok(self.observe(taint))
    }

    /// Overwrites the persistent taint of the object at `idx`.
    pub fn set_object_taint(&mut self, idx: i32, taint: Taint) -> Result<(), ApiError> {
        if self.mode == TaintMode::Disabled {
            return Ok(());
        }
        let owner = self.owner_at(idx)?;
        if !self.mode.writes() {
            return Ok(());
        }
        match owner {
            Owner::Object(id) => self.heap.set_taint(id, taint),
            Owner::Thread(t) => {
                if let Some(th) = self.threads.get_mut(t.0 as usize) {
                    th.object_taint = taint;
                }
            }
        }
        Ok(())
    }

    /// Returns `true` if the object at `idx` is secure.
    pub fn is_secure_object(&self, idx: i32) -> Result<bool, ApiError> {
        self.object_taint(idx).map(|t| t.is_none())
    }

    // -----------------------------------------------------------------------------------------
    // Table slots
    // -----------------------------------------------------------------------------------------

    fn table_and_key(
        &self,
        table: i32,
        key: i32,
    ) -> Result<(ObjectId, Option<TableKey>), ApiError> {
        let Value::Table(id) = self.value(table)? else {
            return Err(EXPECTED_TABLE);
        };
        let key = self.table_key(self.value(key)?);
        Ok((id, key))
    }

    /// Taint recorded for `t[k]`, where `t` is the table at `table` and `k` the value at `key`.
    ///
    /// Keys that were never written (including `nil` and NaN) are secure.
    pub fn table_slot_taint(&self, table: i32, key: i32) -> Result<Taint, ApiError> {
        if self.mode == TaintMode::Disabled {
            return Ok(None);
        }
        let (id, key) = self.table_and_key(table, key)?;
        let taint = match (key, self.heap.table(id)) {
            (Some(k), Some(t)) => t.slot_taint(&k),
            _ => None,
        };
        Ok(self.observe(taint))
    }

    /// Overwrites the taint recorded for `t[k]`.
    pub fn set_table_slot_taint(
        &mut self,
        table: i32,
        key: i32,
        taint: Taint,
    ) -> Result<(), ApiError> {
        if self.mode == TaintMode::Disabled {
            return Ok(());
        }
        let (id, key) = self.table_and_key(table, key)?;
        let key = key.ok_or(INVALID_KEY)?;
        if self.mode.writes()
            && let Some(t) = self.heap.table_mut(id)
        {
            t.set_slot_taint(key, taint);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------------------------
    // Upvalues
    // -----------------------------------------------------------------------------------------

    fn function_at(&self, idx: i32) -> Result<ObjectId, ApiError> {
        match self.value(idx)? {
            Value::Function(id) => Ok(id),
            _ => Err(EXPECTED_FUNCTION),
        }
    }

    /// Taint of upvalue `n` (1-based) of the function at `func`.
    pub fn upvalue_taint(&self, func: i32, n: usize) -> Result<Taint, ApiError> {
        if self.mode == TaintMode::Disabled {
            return Ok(None);
        }
        let id = self.function_at(func)?;
        let up = self
            .heap
            .function(id)
            .and_then(|f| f.upvalue(n))
            .ok_or(UPVALUE_OUT_OF_RANGE)?;
        Ok(self.observe(up.taint))
    }

    /// Overwrites the taint of upvalue `n` (1-based) of the function at `func`.
    pub fn set_upvalue_taint(&mut self, func: i32, n: usize, taint: Taint) -> Result<(), ApiError> {
        if self.mode == TaintMode::Disabled {
            return Ok(());
        }
        let id = self.function_at(func)?;
        let writes = self.mode.writes();
        let up = self
            .heap
            .function_mut(id)
            .and_then(|f| f.upvalue_mut(n))
            .ok_or(UPVALUE_OUT_OF_RANGE)?;
        if writes {
            up.taint = taint;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------------------------
    // Frames
    // -----------------------------------------------------------------------------------------

    /// Absolute slot of local `n` (1-based) in the frame at `level` of `thread`.
    fn local_slot(&self, thread: ThreadId, level: usize, n: usize) -> Result<usize, ApiError> {
        let th = &self.threads[thread.0 as usize];
        let frame = th.frame(level).ok_or(LEVEL_OUT_OF_RANGE)?;
        let abs = n
            .checked_sub(1)
            .map(|i| frame.base + i)
            .ok_or(LOCAL_OUT_OF_RANGE)?;
        if abs < th.frame_limit(level) {
            Ok(abs)
        } else {
            Err(LOCAL_OUT_OF_RANGE)
        }
    }

    /// Taint of local `n` (1-based) in the frame at `level` (0 = innermost) of `thread`.
    pub fn local_taint(
        &self,
        thread: Option<ThreadId>,
        level: usize,
        n: usize,
    ) -> Result<Taint, ApiError> {
        if self.mode == TaintMode::Disabled {
            return Ok(None);
        }
        let id = self.resolve_thread(thread)?;
        let abs = self.local_slot(id, level, n)?;
        Ok(self.observe(self.threads[id.0 as usize].slot_taint(abs)))
    }

    /// Overwrites the taint of local `n` in the frame at `level` of `thread`.
    pub fn set_local_taint(
        &mut self,
        thread: Option<ThreadId>,
        level: usize,
        n: usize,
        taint: Taint,
    ) -> Result<(), ApiError> {
        if self.mode == TaintMode::Disabled {
            return Ok(());
        }
        let id = self.resolve_thread(thread)?;
        let abs = self.local_slot(id, level, n)?;
        if self.mode.writes() {
            self.threads[id.0 as usize].set_slot_taint(abs, taint);
        }
        Ok(())
    }

    /// Call taint of the frame at `level` of `thread`: its stack taint once the call was entered.
    pub fn call_taint(&self, thread: Option<ThreadId>, level: usize) -> Result<Taint, ApiError> {
        if self.mode == TaintMode::Disabled {
            return Ok(None);
        }
        let id = self.resolve_thread(thread)?;
        let frame = self.threads[id.0 as usize]
            .frame(level)
            .ok_or(LEVEL_OUT_OF_RANGE)?;
        Ok(self.observe(frame.taint))
    }

    /// Overwrites the call taint of the frame at `level` of `thread`.
    pub fn set_call_taint(
        &mut self,
        thread: Option<ThreadId>,
        level: usize,
        taint: Taint,
    ) -> Result<(), ApiError> {
        if self.mode == TaintMode::Disabled {
            return Ok(());
        }
        let id = self.resolve_thread(thread)?;
        let writes = self.mode.writes();
        let frame = self.threads[id.0 as usize]
            .frame_mut(level)
            .ok_or(LEVEL_OUT_OF_RANGE)?;
        if writes {
            frame.taint = taint;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Returns;

    #[test]
    fn force_taint_does_not_override() {
        let mut vm = Vm::default();
        vm.force_taint_thread(None).unwrap();
        assert_eq!(vm.thread_taint(None), Ok(Some(TaintTag::FORCED)));

        let t = vm.tags_mut().intern("addon");
        vm.set_thread_taint(None, Some(t)).unwrap();
        vm.force_taint_thread(None).unwrap();
        assert_eq!(vm.thread_taint(None), Ok(Some(t)));

        vm.clear_taint(None).unwrap();
        assert_eq!(vm.is_secure_thread(None), Ok(true));
    }

    #[test]
    fn individual_thread_fields() {
        let mut vm = Vm::default();
        let a = vm.tags_mut().intern("a");
        let b = vm.tags_mut().intern("b");
        vm.set_new_object_taint(None, Some(a)).unwrap();
        vm.set_new_closure_taint(None, Some(b)).unwrap();
        assert_eq!(vm.thread_taint(None), Ok(None));
        assert_eq!(vm.new_object_taint(None), Ok(Some(a)));
        assert_eq!(vm.new_closure_taint(None), Ok(Some(b)));

        vm.create_table(0);
        vm.push_function(|_| Ok(0));
        assert_eq!(vm.object_taint(1), Ok(Some(a)));
        assert_eq!(vm.object_taint(2), Ok(Some(b)));
        assert_eq!(vm.value_taint(1), Ok(None));
    }

    #[test]
    fn object_taint_rejects_immediates() {
        let mut vm = Vm::default();
        let t = vm.tags_mut().intern("addon");
        vm.push_number(1.0);
        assert_eq!(vm.object_taint(1), Err(EXPECTED_OBJECT));
        assert_eq!(vm.set_object_taint(1, Some(t)), Err(EXPECTED_OBJECT));
        assert_eq!(vm.value_taint(1), Ok(None));
    }

    #[test]
    fn thread_objects_carry_taint() {
        let mut vm = Vm::default();
        let t = vm.tags_mut().intern("addon");
        vm.set_thread_taint(None, Some(t)).unwrap();
        let co = vm.new_thread();
        vm.clear_taint(None).unwrap();

        assert_eq!(vm.object_taint(-1), Ok(Some(t)));
        assert_eq!(vm.thread_taint(Some(co)), Ok(Some(t)));
        assert_eq!(vm.thread_taint(None), Ok(None));
        assert_eq!(
            vm.thread_taint(Some(ThreadId(99))),
            Err(ApiError::InvalidArgument("invalid thread"))
        );
    }

    #[test]
    fn table_slot_taint_roundtrip() {
        let mut vm = Vm::default();
        let t = vm.tags_mut().intern("addon");
        vm.create_table(0);
        vm.push_string("k");
        vm.set_table_slot_taint(1, 2, Some(t)).unwrap();
        assert_eq!(vm.table_slot_taint(1, 2), Ok(Some(t)));
        vm.set_table_slot_taint(1, 2, None).unwrap();
        assert_eq!(vm.table_slot_taint(1, 2), Ok(None));

        vm.push_nil();
        assert_eq!(vm.table_slot_taint(1, 3), Ok(None));
        assert_eq!(vm.set_table_slot_taint(1, 3, Some(t)), Err(INVALID_KEY));
        assert_eq!(vm.table_slot_taint(2, 3), Err(EXPECTED_TABLE));
    }

    #[test]
    fn upvalue_taint_roundtrip() {
        let mut vm = Vm::default();
        let t = vm.tags_mut().intern("addon");
        vm.push_number(1.0);
        vm.push_closure(|_| Ok(0), 1).unwrap();
        assert_eq!(vm.upvalue_taint(1, 1), Ok(None));
        vm.set_upvalue_taint(1, 1, Some(t)).unwrap();
        assert_eq!(vm.upvalue_taint(1, 1), Ok(Some(t)));
        assert_eq!(vm.upvalue_taint(1, 2), Err(UPVALUE_OUT_OF_RANGE));
        assert_eq!(vm.upvalue_taint(1, 0), Err(UPVALUE_OUT_OF_RANGE));

        // Reading the tainted upvalue contaminates the running closure's thread.
        vm.set_top(0).unwrap();
        vm.push_number(2.0);
        vm.push_closure(
            |vm| {
                vm.push_upvalue(1)?;
                Ok(1)
            },
            1,
        )
        .unwrap();
        vm.set_upvalue_taint(1, 1, Some(t)).unwrap();
        vm.call(0, Returns::Exactly(1)).unwrap();
        assert_eq!(vm.thread_taint(None), Ok(Some(t)));
        assert_eq!(vm.value_taint(1), Ok(Some(t)));
    }

    #[test]
    fn local_and_call_taint_by_level() {
        let mut vm = Vm::default();
        let t = vm.tags_mut().intern("addon");
        vm.push_function(move |vm| {
            assert_eq!(vm.local_taint(None, 0, 1), Ok(None));
            vm.set_local_taint(None, 0, 1, Some(t))?;
            assert_eq!(vm.value_taint(1), Ok(Some(t)));
            assert_eq!(vm.local_taint(None, 0, 3), Err(LOCAL_OUT_OF_RANGE));
            assert_eq!(vm.local_taint(None, 1, 1), Err(LEVEL_OUT_OF_RANGE));

            assert_eq!(vm.call_taint(None, 0), Ok(None));
            vm.set_call_taint(None, 0, Some(t))?;
            assert_eq!(vm.call_taint(None, 0), Ok(Some(t)));
            assert_eq!(vm.call_taint(None, 1), Err(LEVEL_OUT_OF_RANGE));
            Ok(0)
        });
        vm.push_number(1.0);
        vm.push_number(2.0);
        vm.call(2, Returns::All).unwrap();
        assert_eq!(vm.call_taint(None, 0), Err(LEVEL_OUT_OF_RANGE));
    }

    #[test]
    fn reset_clears_transient_taint() {
        let mut vm = Vm::default();
        let t = vm.tags_mut().intern("addon");
        vm.set_thread_taint(None, Some(t)).unwrap();
        vm.push_number(1.0);
        vm.reset_taint(None).unwrap();
        assert_eq!(vm.thread_taint(None), Ok(None));
        assert_eq!(vm.value_taint(1), Ok(None));
    }

    #[test]
    fn disabled_mode_is_inert() {
        let mut vm = Vm::default();
        let t = vm.tags_mut().intern("addon");
        vm.push_number(1.0);
        vm.set_value_taint(1, Some(t)).unwrap();
        vm.set_taint_mode(TaintMode::Disabled);

        assert_eq!(vm.value_taint(1), Ok(None));
        assert_eq!(vm.object_taint(1), Ok(None));
        assert_eq!(vm.call_taint(None, 5), Ok(None));
        vm.set_thread_taint(None, Some(t)).unwrap();
        vm.set_taint_mode(TaintMode::ReadWrite);
        assert_eq!(vm.thread_taint(None), Ok(None));
        assert_eq!(vm.value_taint(1), Ok(Some(t)));
    }

    #[test]
    fn write_only_mode_records_without_observing() {
        let mut vm = Vm::default();
        let t = vm.tags_mut().intern("addon");
        vm.set_taint_mode(TaintMode::Write);
        vm.set_thread_taint(None, Some(t)).unwrap();
        vm.push_number(1.0);
        assert_eq!(vm.value_taint(1), Ok(None));
        vm.set_taint_mode(TaintMode::ReadWrite);
        assert_eq!(vm.value_taint(1), Ok(Some(t)));
    }

    #[test]
    fn api_errors_do_not_mutate() {
        let mut vm = Vm::default();
        let t = vm.tags_mut().intern("addon");
        assert_eq!(
            vm.set_value_taint(1, Some(t)),
            Err(ApiError::ArgumentOutOfRange("stack index out of range"))
        );
        assert_eq!(vm.set_call_taint(None, 0, Some(t)), Err(LEVEL_OUT_OF_RANGE));
        assert!(vm.set_thread_taint(Some(ThreadId(7)), Some(t)).is_err());
        assert_eq!(vm.thread_taint(None), Ok(None));
    }
}
