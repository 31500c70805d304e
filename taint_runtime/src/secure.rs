// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The secure-call boundary.
//!
//! A secure call runs its target as a protected call and then puts the caller back exactly where
//! it was: the thread taint captured before dispatch is restored and every value the call left on
//! the stack is stamped with the captured stack taint. Restoration lives in the [`Drop`] impl of
//! [`SecureScope`], so it also runs when a host panic unwinds through the boundary.

use core::ops::{Deref, DerefMut};

use crate::error::{ApiError, RuntimeError, Status};
use crate::thread::ThreadTaint;
use crate::trace::{ScopeKind, TaintCause, TraceOutcome};
use crate::value::{TableKey, ThreadId, Value, ValueKind};
use crate::vm::{Returns, Vm};

/// Restores a thread's taint when dropped.
struct SecureScope<'vm> {
    vm: &'vm mut Vm,
    kind: ScopeKind,
    thread: ThreadId,
    saved: ThreadTaint,
    /// First stack slot re-stamped on exit.
    func: usize,
    depth: usize,
    outcome: Option<Result<Status, RuntimeError>>,
}

impl<'vm> SecureScope<'vm> {
    fn enter(vm: &'vm mut Vm, kind: ScopeKind, func: usize) -> Self {
        let thread = vm.current_thread();
        let saved = vm.th().taint;
        let depth = vm.th().depth();
        vm.trace_scope_enter(kind, depth);
        Self {
            vm,
            kind,
            thread,
            saved,
            func,
            depth,
            outcome: None,
        }
    }
}

impl Deref for SecureScope<'_> {
    type Target = Vm;

    fn deref(&self) -> &Vm {
        self.vm
    }
}

impl DerefMut for SecureScope<'_> {
    fn deref_mut(&mut self) -> &mut Vm {
        self.vm
    }
}

impl Drop for SecureScope<'_> {
    fn drop(&mut self) {
        let vm = &mut *self.vm;
        vm.replace_thread_taint(self.thread, self.saved, TaintCause::SecureRestore);
        if let Some(th) = vm.threads.get_mut(self.thread.0 as usize) {
            th.stamp_from(self.func, self.saved.stack);
        }
        let outcome = match &self.outcome {
            Some(Ok(Status::Ok)) => TraceOutcome::Ok,
            Some(Ok(status)) => TraceOutcome::Caught(*status),
            Some(Err(e)) => TraceOutcome::Error(e),
            // Unwinding out of a host panic.
            None => return,
        };
        vm.trace_scope_exit(self.kind, self.depth, outcome);
    }
}

fn secure_delegate(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let kind = vm.value(1).map_or(ValueKind::Nil, |v| v.kind());
    if kind != ValueKind::Function {
        return Err(RuntimeError::BadArgument {
            arg: 1,
            function: "securedelegate",
            error: ApiError::InvalidArgument("function expected"),
        });
    }
    let func = vm.th().base();
    let result = {
        let mut scope = SecureScope::enter(vm, ScopeKind::Delegate, func);
        let thread = scope.thread;
        scope.replace_thread_taint(thread, ThreadTaint::SECURE, TaintCause::DelegateEntry);
        let result = scope.call_at(func, Returns::All);
        scope.outcome = Some(result.map(|()| Status::Ok));
        result
    };
    result?;
    Ok(vm.get_top())
}

impl Vm {
    /// Calls the function below the top `nargs` values as a protected call and restores the
    /// caller's taint afterwards.
    ///
    /// The target may also be a string, which names an entry in the globals table. The lookup
    /// does not contaminate the caller.
    ///
    /// On every exit path the thread's taint is reset to what it was before the call and every
    /// value the call leaves on the stack is stamped with the caller's stack taint. On error the
    /// stack holds the error object, or the handler's result when `errfunc` is non-zero. The
    /// handler runs under the taint current when the error reached the boundary.
    pub fn secure_call(
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

        if let Value::String(name) = self.th().value(func) {
            let target = self
                .heap
                .str(name)
                .cloned()
                .and_then(|name| {
                    self.heap
                        .table(self.globals())
                        .map(|g| g.get(&TableKey::Str(name)))
                })
                .unwrap_or(Value::Nil);
            let stamp = self.stamp();
            self.th_mut().set_slot(func, target, stamp);
        }

        let mut scope = SecureScope::enter(self, ScopeKind::SecureCall, func);
        let status = scope.pcall_at(func, results, handler);
        scope.outcome = Some(Ok(status));
        Ok(status)
    }

    /// Pushes a secure delegate: a function that calls its first argument with the remaining
    /// arguments while the thread runs secure.
    ///
    /// The caller's taint is restored when the delegate returns and its results are stamped with
    /// the caller's stack taint. Errors propagate to the caller after restoration.
    pub fn create_secure_delegate(&mut self) {
        self.push_function(secure_delegate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::TaintTag;

    fn taint_and_return(vm: &mut Vm) -> Result<usize, RuntimeError> {
        vm.force_taint_thread(None)?;
        vm.push_number(1.0);
        Ok(1)
    }

    #[test]
    fn secure_call_restores_secure_caller() {
        let mut vm = Vm::default();
        vm.push_function(taint_and_return);
        let status = vm.secure_call(0, Returns::All, 0).unwrap();
        assert_eq!(status, Status::Ok);
        assert_eq!(vm.is_secure_thread(None), Ok(true));
        assert_eq!(vm.get_top(), 1);
        assert_eq!(vm.is_secure_value(1), Ok(true));
    }

    #[test]
    fn secure_call_restores_tainted_caller() {
        let mut vm = Vm::default();
        let t = vm.tags_mut().intern("addon");
        vm.push_function(|vm| {
            vm.clear_taint(None)?;
            vm.push_boolean(true);
            Ok(1)
        });
        vm.set_thread_taint(None, Some(t)).unwrap();
        vm.secure_call(0, Returns::All, 0).unwrap();
        assert_eq!(vm.thread_taint(None), Ok(Some(t)));
        assert_eq!(vm.value_taint(1), Ok(Some(t)));
    }

    #[test]
    fn secure_call_resolves_global_names() {
        let mut vm = Vm::default();
        vm.push_function(|vm| {
            vm.push_string("hi");
            Ok(1)
        });
        vm.set_global("greet").unwrap();
        vm.push_string("greet");
        assert_eq!(vm.secure_call(0, Returns::All, 0), Ok(Status::Ok));
        assert_eq!(vm.to_str(1).as_deref(), Some("hi"));

        vm.set_top(0).unwrap();
        vm.push_string("missing");
        assert_eq!(vm.secure_call(0, Returns::All, 0), Ok(Status::Runtime));
        assert_eq!(vm.to_str(1).as_deref(), Some("attempt to call a nil value"));
    }

    #[test]
    fn secure_call_error_is_normalized() {
        let mut vm = Vm::default();
        vm.push_function(|vm| {
            vm.force_taint_thread(None)?;
            Err(vm.error_message("boom"))
        });
        assert_eq!(vm.secure_call(0, Returns::All, 0), Ok(Status::Runtime));
        assert_eq!(vm.get_top(), 1);
        assert_eq!(vm.is_secure_thread(None), Ok(true));
        assert_eq!(vm.is_secure_value(1), Ok(true));
    }

    #[test]
    fn handler_sees_taint_at_error_point() {
        let mut vm = Vm::default();
        vm.push_function(|vm| {
            assert_eq!(vm.thread_taint(None), Ok(Some(TaintTag::FORCED)));
            assert_eq!(vm.value_taint(1), Ok(Some(TaintTag::FORCED)));
            Ok(1)
        });
        vm.push_function(|vm| {
            vm.force_taint_thread(None)?;
            Err(vm.error_message("boom"))
        });
        assert_eq!(vm.secure_call(0, Returns::Exactly(0), 1), Ok(Status::Runtime));
        assert_eq!(vm.get_top(), 2);
        assert_eq!(vm.is_secure_thread(None), Ok(true));
    }

    #[test]
    fn delegate_runs_secure_and_restores() {
        let mut vm = Vm::default();
        let t = vm.tags_mut().intern("addon");
        vm.create_secure_delegate();
        vm.push_function(|vm| {
            assert_eq!(vm.is_secure_thread(None), Ok(true));
            vm.push_number(vm.to_number(1).unwrap_or(0.0) + 1.0);
            Ok(1)
        });
        vm.push_number(41.0);
        vm.set_thread_taint(None, Some(t)).unwrap();
        vm.call(2, Returns::All).unwrap();
        assert_eq!(vm.get_top(), 1);
        assert_eq!(vm.to_number(1), Some(42.0));
        assert_eq!(vm.thread_taint(None), Ok(Some(t)));
        assert_eq!(vm.value_taint(1), Ok(Some(t)));
    }

    #[test]
    fn delegate_restores_before_propagating_errors() {
        let mut vm = Vm::default();
        let t = vm.tags_mut().intern("addon");
        vm.create_secure_delegate();
        vm.push_function(|vm| Err(vm.error_message("inner")));
        vm.set_thread_taint(None, Some(t)).unwrap();
        assert_eq!(vm.pcall(1, Returns::All, 0), Ok(Status::Runtime));
        assert_eq!(vm.thread_taint(None), Ok(Some(t)));
        assert_eq!(vm.to_str(-1).as_deref(), Some("inner"));

        vm.set_top(0).unwrap();
        vm.create_secure_delegate();
        vm.push_number(1.0);
        assert_eq!(vm.pcall(1, Returns::All, 0), Ok(Status::Runtime));
        assert_eq!(
            vm.to_str(-1).as_deref(),
            Some("bad argument #1 to 'securedelegate' (function expected)")
        );
    }
}
