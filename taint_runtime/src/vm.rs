// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The runtime: value stack, tables, calls and protected calls.
//!
//! The API mirrors a classic embeddable stack machine. Positive stack indices count from the
//! first slot of the innermost frame (`1` is the first argument), negative indices count down from
//! the top (`-1` is the top value). Every slot write goes through the propagation hooks in
//! [`crate::propagate`].

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt;

use crate::error::{ApiError, RuntimeError, Status};
use crate::function::{Function, NativeFn, Upvalue};
use crate::heap::{Heap, ObjectBody};
use crate::mode::TaintMode;
use crate::table::Table;
use crate::tag::{Taint, TaintTags, union};
use crate::thread::{CallFrame, ThreadState, ThreadTaint};
use crate::trace::{ScopeKind, TaintCause, TraceMask, TraceOutcome, TraceSink};
use crate::value::{ObjectId, TableKey, ThreadId, Value, ValueKind};

/// Execution limits.
#[derive(Clone, Debug)]
pub struct Limits {
    /// Maximum call depth (frames) per thread.
    pub max_call_depth: usize,
    /// Maximum number of value slots per thread, checked on call entry.
    pub max_stack_slots: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_call_depth: 200,
            max_stack_slots: 1_000_000,
        }
    }
}

/// How many results a call should leave on the stack.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Returns {
    /// Keep every value the callee returned.
    All,
    /// Truncate or pad with `nil` to exactly this many values.
    Exactly(usize),
}

const STACK_INDEX_OUT_OF_RANGE: ApiError = ApiError::ArgumentOutOfRange("stack index out of range");
const UPVALUE_OUT_OF_RANGE: ApiError = ApiError::ArgumentOutOfRange("upvalue index out of range");

/// A taint-tracking runtime instance.
pub struct Vm {
    limits: Limits,
    pub(crate) mode: TaintMode,
    pub(crate) tags: TaintTags,
    pub(crate) heap: Heap,
    pub(crate) threads: Vec<ThreadState>,
    pub(crate) current: ThreadId,
    globals: ObjectId,

    trace_mask: TraceMask,
    trace: Option<Box<dyn TraceSink>>,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("limits", &self.limits)
            .field("mode", &self.mode)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

impl Vm {
    /// Creates a VM with a secure root thread and an empty globals table.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        let mut heap = Heap::new();
        let globals = heap.alloc(ObjectBody::Table(Table::new()), None);
        let main = ThreadState::new(ThreadTaint::SECURE, None, globals);
        Self {
            limits,
            mode: TaintMode::default(),
            tags: TaintTags::new(),
            heap,
            threads: alloc::vec![main],
            current: ThreadId::MAIN,
            globals,
            trace_mask: TraceMask::NONE,
            trace: None,
        }
    }

    /// Execution limits.
    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Object heap (read-only view for embedders).
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Tag name table.
    #[must_use]
    pub fn tags(&self) -> &TaintTags {
        &self.tags
    }

    /// Tag name table, for interning new tags.
    pub fn tags_mut(&mut self) -> &mut TaintTags {
        &mut self.tags
    }

    /// Globals table handle.
    #[must_use]
    pub fn globals(&self) -> ObjectId {
        self.globals
    }

    /// The root thread.
    #[must_use]
    pub fn main_thread(&self) -> ThreadId {
        ThreadId::MAIN
    }

    /// The thread the stack API operates on.
    #[must_use]
    pub fn current_thread(&self) -> ThreadId {
        self.current
    }

    /// State of `thread`, if it exists.
    #[must_use]
    pub fn thread(&self, thread: ThreadId) -> Option<&ThreadState> {
        self.threads.get(thread.0 as usize)
    }

    /// Installs a trace sink. The sink's [`TraceSink::mask`] is sampled once here.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.trace_mask = sink.mask();
        self.trace = Some(sink);
    }

    /// Removes and returns the installed trace sink.
    pub fn take_trace_sink(&mut self) -> Option<Box<dyn TraceSink>> {
        self.trace_mask = TraceMask::NONE;
        self.trace.take()
    }

    // -----------------------------------------------------------------------------------------
    // Internal thread access
    // -----------------------------------------------------------------------------------------

    pub(crate) fn th(&self) -> &ThreadState {
        &self.threads[self.current.0 as usize]
    }

    pub(crate) fn th_mut(&mut self) -> &mut ThreadState {
        &mut self.threads[self.current.0 as usize]
    }

    pub(crate) fn resolve_thread(&self, thread: Option<ThreadId>) -> Result<ThreadId, ApiError> {
        let id = thread.unwrap_or(self.current);
        if (id.0 as usize) < self.threads.len() {
            Ok(id)
        } else {
            Err(ApiError::InvalidArgument("invalid thread"))
        }
    }

    /// Converts a relative stack index into an absolute slot index.
    pub(crate) fn abs_index(&self, idx: i32) -> Result<usize, ApiError> {
        let th = self.th();
        let base = th.base();
        let top = th.top();
        let abs = match idx {
            0 => return Err(STACK_INDEX_OUT_OF_RANGE),
            i if i > 0 => base + (i.unsigned_abs() as usize) - 1,
            i => {
                let off = i.unsigned_abs() as usize;
                if off > top - base {
                    return Err(STACK_INDEX_OUT_OF_RANGE);
                }
                top - off
            }
        };
        if abs < top {
            Ok(abs)
        } else {
            Err(STACK_INDEX_OUT_OF_RANGE)
        }
    }

    pub(crate) fn table_key(&self, key: Value) -> Option<TableKey> {
        match key {
            Value::Nil => None,
            Value::Boolean(b) => Some(TableKey::Boolean(b)),
            Value::Number(n) => TableKey::number(n),
            Value::String(id) => self.heap.str(id).cloned().map(TableKey::Str),
            Value::Table(id) | Value::Function(id) | Value::Userdata(id) => {
                Some(TableKey::Object(id))
            }
            Value::Thread(t) => Some(TableKey::Thread(t)),
        }
    }

    fn table_at(&self, idx: i32) -> Result<ObjectId, RuntimeError> {
        match self.value(idx)? {
            Value::Table(id) => Ok(id),
            other => Err(RuntimeError::NotIndexable(other.kind())),
        }
    }

    // -----------------------------------------------------------------------------------------
    // Trace plumbing
    // -----------------------------------------------------------------------------------------

    pub(crate) fn trace_scope_enter(&mut self, kind: ScopeKind, depth: usize) {
        let mask = match kind {
            ScopeKind::Call { .. } => TraceMask::CALL,
            ScopeKind::SecureCall | ScopeKind::Delegate => TraceMask::SECURE,
        };
        if self.trace_mask.contains(mask)
            && let Some(t) = self.trace.as_mut()
        {
            let taint = self.threads[self.current.0 as usize].taint.stack;
            t.scope_enter(&self.tags, kind, self.current, depth, taint);
        }
    }

    pub(crate) fn trace_scope_exit(
        &mut self,
        kind: ScopeKind,
        depth: usize,
        outcome: TraceOutcome<'_>,
    ) {
        let mask = match kind {
            ScopeKind::Call { .. } => TraceMask::CALL,
            ScopeKind::SecureCall | ScopeKind::Delegate => TraceMask::SECURE,
        };
        if self.trace_mask.contains(mask)
            && let Some(t) = self.trace.as_mut()
        {
            t.scope_exit(&self.tags, kind, self.current, depth, outcome);
        }
    }

    /// Replaces a thread's taint and reports the transition.
    pub(crate) fn replace_thread_taint(
        &mut self,
        thread: ThreadId,
        to: ThreadTaint,
        cause: TaintCause,
    ) {
        let Some(th) = self.threads.get_mut(thread.0 as usize) else {
            return;
        };
        let from = th.taint;
        if from == to {
            return;
        }
        th.taint = to;
        if self.trace_mask.contains(TraceMask::TAINT)
            && let Some(t) = self.trace.as_mut()
        {
            t.taint_changed(&self.tags, thread, from, to, cause);
        }
    }

    // -----------------------------------------------------------------------------------------
    // Stack
    // -----------------------------------------------------------------------------------------

    /// Number of values in the innermost frame.
    #[must_use]
    pub fn get_top(&self) -> usize {
        let th = self.th();
        th.top() - th.base()
    }

    /// Sets the frame size. Non-negative `idx` is an absolute count (growing pads with `nil`),
    /// negative `idx` is relative to the top (`-1` keeps everything).
    pub fn set_top(&mut self, idx: i32) -> Result<(), ApiError> {
        let base = self.th().base();
        let top = self.th().top();
        let len = if idx >= 0 {
            base + idx.unsigned_abs() as usize
        } else {
            let drop = (idx.unsigned_abs() as usize) - 1;
            if drop > top - base {
                return Err(STACK_INDEX_OUT_OF_RANGE);
            }
            top - drop
        };
        let stamp = self.stamp();
        self.th_mut().resize(len, stamp);
        Ok(())
    }

    /// Pops `n` values (fewer if the frame is smaller).
    pub fn pop(&mut self, n: usize) {
        let th = self.th_mut();
        let len = th.top().saturating_sub(n).max(th.base());
        th.truncate(len);
    }

    /// Pops the top value of the innermost frame. Never reaches below the frame base.
    pub(crate) fn pop_frame_value(&mut self) -> Result<(Value, Taint), ApiError> {
        if self.get_top() == 0 {
            return Err(STACK_INDEX_OUT_OF_RANGE);
        }
        self.th_mut().pop().ok_or(STACK_INDEX_OUT_OF_RANGE)
    }

    /// Value at `idx`.
    pub fn value(&self, idx: i32) -> Result<Value, ApiError> {
        let abs = self.abs_index(idx)?;
        Ok(self.th().value(abs))
    }

    /// Kind of the value at `idx`.
    pub fn kind(&self, idx: i32) -> Result<ValueKind, ApiError> {
        self.value(idx).map(|v| v.kind())
    }

    /// Number at `idx`, if it is one.
    #[must_use]
    pub fn to_number(&self, idx: i32) -> Option<f64> {
        match self.value(idx) {
            Ok(Value::Number(n)) => Some(n),
            _ => None,
        }
    }

    /// Truthiness of the value at `idx`; missing slots are false.
    #[must_use]
    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value(idx).is_ok_and(|v| v.is_truthy())
    }

    /// String contents at `idx`, if it is a string.
    #[must_use]
    pub fn to_str(&self, idx: i32) -> Option<Rc<str>> {
        match self.value(idx) {
            Ok(Value::String(id)) => self.heap.str(id).cloned(),
            _ => None,
        }
    }

    /// Primitive equality: strings by content, other reference kinds by identity.
    #[must_use]
    pub fn raw_equal(&self, a: i32, b: i32) -> bool {
        let (Ok(a), Ok(b)) = (self.value(a), self.value(b)) else {
            return false;
        };
        self.values_equal(a, b)
    }

    pub(crate) fn values_equal(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::String(x), Value::String(y)) => {
                x == y || self.heap.str(x).is_some_and(|s| Some(s) == self.heap.str(y))
            }
            _ => a == b,
        }
    }

    /// Pushes `nil`.
    pub fn push_nil(&mut self) {
        self.push_fresh(Value::Nil);
    }

    /// Pushes a boolean.
    pub fn push_boolean(&mut self, b: bool) {
        self.push_fresh(Value::Boolean(b));
    }

    /// Pushes a number.
    pub fn push_number(&mut self, n: f64) {
        self.push_fresh(Value::Number(n));
    }

    /// Pushes a new string object.
    pub fn push_string(&mut self, s: &str) -> ObjectId {
        let taint = self.new_object_stamp();
        let id = self.heap.alloc_str(s, taint);
        self.push_fresh(Value::String(id));
        id
    }

    /// Pushes a copy of the value at `idx`. The copy keeps its source slot taint and also picks
    /// up the pushing thread's taint.
    pub fn push_value(&mut self, idx: i32) -> Result<(), ApiError> {
        let abs = self.abs_index(idx)?;
        let v = self.th().value(abs);
        let taint = union(self.stamp(), self.th().slot_taint(abs));
        self.th_mut().push(v, taint);
        Ok(())
    }

    /// Pushes the globals table.
    pub fn push_globals(&mut self) {
        self.push_fresh(Value::Table(self.globals));
    }

    /// Moves the top value into `idx`, shifting values above it up.
    pub fn insert(&mut self, idx: i32) -> Result<(), ApiError> {
        let abs = self.abs_index(idx)?;
        let top = self.th().top();
        self.th_mut().rotate(top - 1, abs);
        Ok(())
    }

    /// Removes the value at `idx`, shifting values above it down.
    pub fn remove(&mut self, idx: i32) -> Result<(), ApiError> {
        let abs = self.abs_index(idx)?;
        self.th_mut().drain(abs, 1);
        Ok(())
    }

    /// Pops the top value into `idx`.
    pub fn replace(&mut self, idx: i32) -> Result<(), ApiError> {
        let abs = self.abs_index(idx)?;
        let (v, t) = self.pop_frame_value()?;
        // Replacing the top slot with itself just pops it.
        if abs < self.th().top() {
            self.th_mut().set_slot(abs, v, t);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------------------------
    // Object construction
    // -----------------------------------------------------------------------------------------

    /// Pushes a new table.
    pub fn create_table(&mut self, capacity: usize) -> ObjectId {
        let taint = self.new_object_stamp();
        let id = self
            .heap
            .alloc(ObjectBody::Table(Table::with_capacity(capacity)), taint);
        self.push_fresh(Value::Table(id));
        id
    }

    /// Pushes a new userdata with `size` zeroed bytes.
    pub fn new_userdata(&mut self, size: usize) -> ObjectId {
        let taint = self.new_object_stamp();
        let id = self.heap.alloc_userdata(size, taint);
        self.push_fresh(Value::Userdata(id));
        id
    }

    /// Pushes a new thread. The thread starts with a snapshot of the creator's taint.
    pub fn new_thread(&mut self) -> ThreadId {
        let snapshot = self.th().taint;
        let object_taint = self.new_object_stamp();
        let env = self.current_env();
        let id = ThreadId(u32::try_from(self.threads.len()).unwrap_or(u32::MAX));
        self.threads
            .push(ThreadState::new(snapshot, object_taint, env));
        self.push_fresh(Value::Thread(id));
        id
    }

    /// Runs `f` with `thread` as the running thread, then switches back.
    ///
    /// Pushes, calls and taint changes made by `f` apply to `thread`. A function running on
    /// `thread` may switch back to another thread; its frames then stay addressable by level
    /// through the thread-taking taint queries. The previous thread is restored on every exit
    /// path, including a panic in `f`.
    pub fn with_thread<R>(
        &mut self,
        thread: ThreadId,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, ApiError> {
        let thread = self.resolve_thread(Some(thread))?;
        let previous = core::mem::replace(&mut self.current, thread);
        let mut switch = ThreadSwitch { vm: self, previous };
        Ok(f(&mut *switch.vm))
    }

    /// Pushes a native function without upvalues.
    pub fn push_function<F>(&mut self, f: F) -> ObjectId
    where
        F: Fn(&mut Self) -> Result<usize, RuntimeError> + 'static,
    {
        self.push_native(Rc::new(f), Vec::new())
    }

    /// Pops `n` values as upvalues and pushes a native closure capturing them.
    pub fn push_closure<F>(&mut self, f: F, n: usize) -> Result<ObjectId, ApiError>
    where
        F: Fn(&mut Self) -> Result<usize, RuntimeError> + 'static,
    {
        if n > self.get_top() {
            return Err(STACK_INDEX_OUT_OF_RANGE);
        }
        let mut upvalues = Vec::with_capacity(n);
        let th = self.th();
        for abs in th.top() - n..th.top() {
            upvalues.push(Upvalue {
                value: th.value(abs),
                taint: th.slot_taint(abs),
            });
        }
        self.pop(n);
        Ok(self.push_native(Rc::new(f), upvalues))
    }

    fn push_native(&mut self, body: NativeFn, upvalues: Vec<Upvalue>) -> ObjectId {
        let taint = self.new_closure_stamp();
        let env = self.current_env();
        let id = self.heap.alloc(
            ObjectBody::Function(Function::new(body, env, upvalues)),
            taint,
        );
        self.push_fresh(Value::Function(id));
        id
    }

    /// Environment inherited by new functions and threads: the running function's, or globals.
    fn current_env(&self) -> ObjectId {
        self.th()
            .frames
            .last()
            .and_then(|f| self.heap.function(f.function))
            .map_or(self.globals, Function::env)
    }

    /// Pushes upvalue `n` (1-based) of the running closure. The read contaminates like a table
    /// slot read.
    pub fn push_upvalue(&mut self, n: usize) -> Result<(), ApiError> {
        let up = self
            .th()
            .frames
            .last()
            .and_then(|f| self.heap.function(f.function))
            .and_then(|f| f.upvalue(n).copied())
            .ok_or(UPVALUE_OUT_OF_RANGE)?;
        self.push_read(up.value, up.taint, TaintCause::TableRead);
        Ok(())
    }

    /// Pops a value into upvalue `n` (1-based) of the running closure. The upvalue records the
    /// writer's stack taint, like a table slot write.
    pub fn set_upvalue(&mut self, n: usize) -> Result<(), ApiError> {
        let function = self
            .th()
            .frames
            .last()
            .map(|f| f.function)
            .filter(|&id| self.heap.function(id).is_some_and(|f| f.upvalue(n).is_some()))
            .ok_or(UPVALUE_OUT_OF_RANGE)?;
        let (value, _) = self.pop_frame_value()?;
        let taint = self.stamp();
        let up = self
            .heap
            .function_mut(function)
            .and_then(|f| f.upvalue_mut(n))
            .ok_or(UPVALUE_OUT_OF_RANGE)?;
        *up = Upvalue { value, taint };
        Ok(())
    }

    // -----------------------------------------------------------------------------------------
    // Tables
    // -----------------------------------------------------------------------------------------

    /// Pops a key and pushes `t[key]` where `t` is the table at `idx`.
    ///
    /// The read contaminates the thread with the slot's taint.
    pub fn get_table(&mut self, idx: i32) -> Result<(), RuntimeError> {
        let table = self.table_at(idx)?;
        let (key, _) = self.pop_frame_value()?;
        // `nil` and NaN keys never resolve.
        let key = self.table_key(key);
        self.read_key(table, key);
        Ok(())
    }

    /// Pushes `t[name]` where `t` is the table at `idx`.
    pub fn get_field(&mut self, idx: i32, name: &str) -> Result<(), RuntimeError> {
        let table = self.table_at(idx)?;
        self.read_key(table, Some(TableKey::Str(Rc::from(name))));
        Ok(())
    }

    fn read_key(&mut self, table: ObjectId, key: Option<TableKey>) {
        let (value, slot) = match (key, self.heap.table(table)) {
            (Some(k), Some(t)) => (t.get(&k), t.slot_taint(&k)),
            _ => (Value::Nil, None),
        };
        self.push_read(value, slot, TaintCause::TableRead);
    }

    /// Pops a value and a key (value on top) and stores `t[key] = value` for the table at `idx`.
    pub fn set_table(&mut self, idx: i32) -> Result<(), RuntimeError> {
        let table = self.table_at(idx)?;
        if self.get_top() < 2 {
            return Err(STACK_INDEX_OUT_OF_RANGE.into());
        }
        let (value, _) = self.pop_frame_value()?;
        let (key, _) = self.pop_frame_value()?;
        let key = match key {
            Value::Nil => return Err(RuntimeError::InvalidKey("table index is nil")),
            Value::Number(n) if n.is_nan() => {
                return Err(RuntimeError::InvalidKey("table index is NaN"));
            }
            k => self
                .table_key(k)
                .ok_or(RuntimeError::InvalidKey("invalid table index"))?,
        };
        self.write_slot(table, key, value);
        Ok(())
    }

    /// Pops a value and stores `t[name] = value` for the table at `idx`.
    pub fn set_field(&mut self, idx: i32, name: &str) -> Result<(), RuntimeError> {
        let table = self.table_at(idx)?;
        let (value, _) = self.pop_frame_value()?;
        self.write_slot(table, TableKey::Str(Rc::from(name)), value);
        Ok(())
    }

    /// Pushes the global `name`.
    pub fn get_global(&mut self, name: &str) {
        self.read_key(self.globals, Some(TableKey::Str(Rc::from(name))));
    }

    /// Pops a value into the global `name`.
    pub fn set_global(&mut self, name: &str) -> Result<(), RuntimeError> {
        let (value, _) = self.pop_frame_value()?;
        self.write_slot(self.globals, TableKey::Str(Rc::from(name)), value);
        Ok(())
    }

    /// Pushes the metatable of the value at `idx` and returns `true`, or pushes nothing and
    /// returns `false`.
    pub fn get_metatable(&mut self, idx: i32) -> Result<bool, ApiError> {
        let mt = self.value(idx)?.object().and_then(|id| self.heap.metatable(id));
        match mt {
            Some(mt) => {
                self.push_fresh(Value::Table(mt));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pops a table (or `nil`) and installs it as the metatable of the value at `idx`.
    ///
    /// Returns `false` when the target kind cannot carry a metatable.
    pub fn set_metatable(&mut self, idx: i32) -> Result<bool, ApiError> {
        let target = self.value(idx)?;
        let mt = match self.value(-1)? {
            Value::Table(id) => Some(id),
            Value::Nil => None,
            _ => return Err(ApiError::InvalidArgument("nil or table expected")),
        };
        self.pop(1);
        Ok(target
            .object()
            .is_some_and(|id| self.heap.set_metatable(id, mt)))
    }

    // -----------------------------------------------------------------------------------------
    // Environments
    // -----------------------------------------------------------------------------------------

    /// Pushes the effective environment of the function or thread at `idx`.
    ///
    /// If the environment table has a metatable with a non-nil `__environment` field, that field's
    /// value is pushed instead of the table. Other kinds push `nil`.
    pub fn get_fenv(&mut self, idx: i32) -> Result<(), ApiError> {
        let env = match self.value(idx)? {
            Value::Function(id) => self.heap.function(id).map(Function::env),
            Value::Thread(t) => self.thread(t).map(|th| th.env),
            _ => None,
        };
        let Some(env) = env else {
            self.push_nil();
            return Ok(());
        };
        let key = TableKey::Str(Rc::from("__environment"));
        let proxy = self
            .heap
            .metatable(env)
            .and_then(|mt| self.heap.table(mt))
            .map(|mt| mt.get(&key))
            .filter(|v| !v.is_nil());
        self.push_fresh(proxy.unwrap_or(Value::Table(env)));
        Ok(())
    }

    /// Pops a table and installs it as the environment of the function or thread at `idx`.
    ///
    /// Returns `false` (and still pops) when the target has no environment.
    pub fn set_fenv(&mut self, idx: i32) -> Result<bool, ApiError> {
        let target = self.value(idx)?;
        let Value::Table(env) = self.value(-1)? else {
            return Err(ApiError::InvalidArgument("table expected"));
        };
        self.pop(1);
        match target {
            Value::Function(id) => match self.heap.function_mut(id) {
                Some(f) => {
                    f.set_env(env);
                    Ok(true)
                }
                None => Ok(false),
            },
            Value::Thread(t) => match self.threads.get_mut(t.0 as usize) {
                Some(th) => {
                    th.env = env;
                    Ok(true)
                }
                None => Ok(false),
            },
            _ => Ok(false),
        }
    }

    // -----------------------------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------------------------

    /// Creates an error carrying a new string object.
    pub fn error_message(&mut self, message: &str) -> RuntimeError {
        let taint = self.new_object_stamp();
        RuntimeError::Raised(Value::String(self.heap.alloc_str(message, taint)))
    }

    /// Pops the top value and wraps it as an error. An empty frame raises `nil`.
    pub fn raise(&mut self) -> RuntimeError {
        let value = self.pop_frame_value().map_or(Value::Nil, |(v, _)| v);
        RuntimeError::Raised(value)
    }

    pub(crate) fn call_slot(&self, nargs: usize) -> Result<usize, ApiError> {
        let th = self.th();
        th.top()
            .checked_sub(nargs + 1)
            .filter(|&func| func >= th.base())
            .ok_or(STACK_INDEX_OUT_OF_RANGE)
    }

    /// Calls the function below the top `nargs` values. Errors propagate to the caller.
    pub fn call(&mut self, nargs: usize, results: Returns) -> Result<(), RuntimeError> {
        let func = self.call_slot(nargs)?;
        self.call_at(func, results)
    }

    /// Calls the function below the top `nargs` values, catching errors.
    ///
    /// On error the function and its arguments are replaced by the error object, or by the
    /// result of the handler at `errfunc` when `errfunc` is non-zero.
    pub fn pcall(
        &mut self,
        nargs: usize,
        results: Returns,
        errfunc: i32,
    ) -> Result<Status, ApiError> {
        let func = self.call_slot(nargs)?;
        let handler = match errfunc {
            0 => None,
            i => Some(self.abs_index(i)?),
        };
        Ok(self.pcall_at(func, results, handler))
    }

    pub(crate) fn pcall_at(
        &mut self,
        func: usize,
        results: Returns,
        handler: Option<usize>,
    ) -> Status {
        let depth = self.th().depth();
        let Err(err) = self.call_at(func, results) else {
            return Status::Ok;
        };
        self.unwind(depth, func);
        let err_value = self.error_object(err);
        let Some(handler) = handler else {
            self.push_fresh(err_value);
            return Status::Runtime;
        };

        let handler_value = self.th().value(handler);
        let handler_taint = self.th().slot_taint(handler);
        self.th_mut().push(handler_value, handler_taint);
        self.push_fresh(err_value);
        match self.call_at(func, Returns::Exactly(1)) {
            Ok(()) => Status::Runtime,
            Err(err) => {
                self.unwind(depth, func);
                let v = self.error_object(err);
                self.push_fresh(v);
                Status::ErrorHandler
            }
        }
    }

    fn unwind(&mut self, depth: usize, top: usize) {
        let th = self.th_mut();
        th.frames.truncate(depth);
        th.truncate(top);
    }

    fn error_object(&mut self, err: RuntimeError) -> Value {
        match err {
            RuntimeError::Raised(v) => v,
            other => {
                let taint = self.new_object_stamp();
                Value::String(self.heap.alloc_str(&other.to_string(), taint))
            }
        }
    }

    pub(crate) fn call_at(&mut self, func: usize, results: Returns) -> Result<(), RuntimeError> {
        let callee = self.th().value(func);
        let Value::Function(id) = callee else {
            return Err(RuntimeError::NotCallable(callee.kind()));
        };
        if self.th().depth() >= self.limits.max_call_depth {
            return Err(RuntimeError::CallDepthExceeded);
        }
        if self.th().top() > self.limits.max_stack_slots {
            return Err(RuntimeError::StackOverflow);
        }
        let body = self
            .heap
            .function(id)
            .map(Function::body)
            .ok_or(RuntimeError::NotCallable(ValueKind::Function))?;

        self.contaminate(self.heap.taint(id), TaintCause::Call);
        let taint = self.th().taint.stack;
        self.th_mut().frames.push(CallFrame {
            func,
            base: func + 1,
            function: id,
            taint,
        });
        let depth = self.th().depth();
        let kind = ScopeKind::Call { function: id };
        self.trace_scope_enter(kind, depth);

        let result = body(self).and_then(|n| self.finish_call(n, results));

        match &result {
            Ok(()) => self.trace_scope_exit(kind, depth, TraceOutcome::Ok),
            Err(e) => {
                self.trace_scope_exit(kind, depth, TraceOutcome::Error(e));
                self.th_mut().frames.truncate(depth - 1);
            }
        }
        result
    }

    /// Moves the top `n` values of the finished frame down to its function slot.
    fn finish_call(&mut self, n: usize, results: Returns) -> Result<(), RuntimeError> {
        let stamp = self.stamp();
        let th = self.th_mut();
        let Some(frame) = th.frames.pop() else {
            return Err(STACK_INDEX_OUT_OF_RANGE.into());
        };
        let available = th.top().saturating_sub(frame.base);
        if n > available {
            th.frames.push(frame);
            return Err(RuntimeError::BadResultCount {
                reported: n,
                available,
            });
        }
        let first = th.top() - n;
        th.drain(frame.func, first - frame.func);
        for abs in frame.func..th.top() {
            th.set_slot_taint(abs, union(stamp, th.slot_taint(abs)));
        }
        if let Returns::Exactly(want) = results {
            th.resize(frame.func + want, stamp);
        }
        Ok(())
    }
}

/// Switches the running thread back when dropped.
struct ThreadSwitch<'vm> {
    vm: &'vm mut Vm,
    previous: ThreadId,
}

impl Drop for ThreadSwitch<'_> {
    fn drop(&mut self) {
        self.vm.current = self.previous;
    }
}
