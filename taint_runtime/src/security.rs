// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Script-facing taint reflection library.
//!
//! [`open`] registers the functions below into the global `debug` table. Tags cross this
//! boundary as their interned names and `nil` stands for secure. Functions that target a thread
//! accept an optional leading thread argument; without it they act on the calling thread.
//!
//! | Function | Arguments | Results |
//! |---|---|---|
//! | `gettaintmode` | | `"disabled"`, `"r"`, `"w"` or `"rw"` |
//! | `settaintmode` | mode | |
//! | `getstacktaint`, `getnewobjecttaint`, `getnewclosuretaint` | `[thread]` | taint |
//! | `setstacktaint`, `setnewobjecttaint`, `setnewclosuretaint` | `[thread,] taint` | |
//! | `getvaluetaint` / `setvaluetaint` | value `[, taint]` | taint / the retagged value |
//! | `getobjecttaint` / `setobjecttaint` | object `[, taint]` | taint |
//! | `gettabletaint` / `settabletaint` | table, key `[, taint]` | taint |
//! | `getupvaluetaint` / `setupvaluetaint` | function, index `[, taint]` | taint |
//! | `getlocaltaint` / `setlocaltaint` | `[thread,] level, index [, taint]` | taint |
//! | `getcalltaint` | `[thread,] level` | taint |
//! | `cleartaint`, `resettaint`, `forcetaint` | | |
//! | `issecure` | | boolean |
//! | `issecurevariable` | `[table,] name` | `true`, or `false` and the taint |
//! | `newsecurefunction` | | a secure delegate |
//! | `securecall` | function or global name, ... | the call's results |

use alloc::string::String;

use crate::error::{ApiError, RuntimeError};
use crate::mode::TaintMode;
use crate::tag::Taint;
use crate::value::{ThreadId, Value, ValueKind};
use crate::vm::{Returns, Vm};

type LibFn = fn(&mut Vm) -> Result<usize, RuntimeError>;

const FUNCTIONS: &[(&str, LibFn)] = &[
    ("gettaintmode", get_taint_mode),
    ("settaintmode", set_taint_mode),
    ("getstacktaint", get_stack_taint),
    ("getvaluetaint", get_value_taint),
    ("getobjecttaint", get_object_taint),
    ("getnewobjecttaint", get_new_object_taint),
    ("getnewclosuretaint", get_new_closure_taint),
    ("getcalltaint", get_call_taint),
    ("gettabletaint", get_table_taint),
    ("getupvaluetaint", get_upvalue_taint),
    ("getlocaltaint", get_local_taint),
    ("setstacktaint", set_stack_taint),
    ("setvaluetaint", set_value_taint),
    ("setobjecttaint", set_object_taint),
    ("setnewobjecttaint", set_new_object_taint),
    ("setnewclosuretaint", set_new_closure_taint),
    ("settabletaint", set_table_taint),
    ("setupvaluetaint", set_upvalue_taint),
    ("setlocaltaint", set_local_taint),
    ("cleartaint", clear_taint),
    ("resettaint", reset_taint),
    ("forcetaint", force_taint),
    ("issecure", is_secure),
    ("issecurevariable", is_secure_variable),
    ("newsecurefunction", new_secure_function),
    ("securecall", secure_call),
];

/// Registers the reflection functions into the global `debug` table, creating it if needed.
pub fn open(vm: &mut Vm) -> Result<(), RuntimeError> {
    vm.get_global("debug");
    if vm.kind(-1)? != ValueKind::Table {
        vm.pop(1);
        vm.create_table(FUNCTIONS.len());
        vm.push_value(-1)?;
        vm.set_global("debug")?;
    }
    for &(name, f) in FUNCTIONS {
        vm.push_function(f);
        vm.set_field(-2, name)?;
    }
    vm.pop(1);
    Ok(())
}

// ---------------------------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------------------------

fn bad(arg: usize, function: &'static str, error: ApiError) -> RuntimeError {
    RuntimeError::BadArgument {
        arg,
        function,
        error,
    }
}

fn arg_index(arg: usize) -> i32 {
    i32::try_from(arg).unwrap_or(i32::MAX)
}

fn check_any(vm: &Vm, arg: usize, function: &'static str) -> Result<(), RuntimeError> {
    if arg <= vm.get_top() {
        Ok(())
    } else {
        Err(bad(arg, function, ApiError::InvalidArgument("value expected")))
    }
}

fn check_kind(
    vm: &Vm,
    arg: usize,
    function: &'static str,
    kind: ValueKind,
    message: &'static str,
) -> Result<(), RuntimeError> {
    if vm.kind(arg_index(arg)).ok() == Some(kind) {
        Ok(())
    } else {
        Err(bad(arg, function, ApiError::InvalidArgument(message)))
    }
}

fn check_integer(vm: &Vm, arg: usize, function: &'static str) -> Result<i64, RuntimeError> {
    vm.to_number(arg_index(arg))
        .map(|n| n as i64)
        .ok_or_else(|| bad(arg, function, ApiError::InvalidArgument("number expected")))
}

/// Reads a level or index argument. Negative values can never resolve.
fn check_position(
    vm: &Vm,
    arg: usize,
    function: &'static str,
    out_of_range: &'static str,
) -> Result<usize, RuntimeError> {
    let n = check_integer(vm, arg, function)?;
    usize::try_from(n).map_err(|_| bad(arg, function, ApiError::ArgumentOutOfRange(out_of_range)))
}

/// Reads an optional tag name; `nil` or absent is secure.
fn opt_taint(vm: &mut Vm, arg: usize, function: &'static str) -> Result<Taint, RuntimeError> {
    match vm.value(arg_index(arg)) {
        Err(_) | Ok(Value::Nil) => Ok(None),
        Ok(Value::String(_)) => {
            let name = vm
                .to_str(arg_index(arg))
                .ok_or_else(|| bad(arg, function, ApiError::InvalidArgument("string expected")))?;
            Ok(Some(vm.tags_mut().intern(&name)))
        }
        Ok(_) => Err(bad(arg, function, ApiError::InvalidArgument("string expected"))),
    }
}

/// Returns the thread named by argument 1, if any, and the position of the next argument.
fn opt_thread(vm: &Vm) -> (Option<ThreadId>, usize) {
    match vm.value(1) {
        Ok(Value::Thread(t)) => (Some(t), 2),
        _ => (None, 1),
    }
}

fn push_taint(vm: &mut Vm, taint: Taint) -> usize {
    match taint.and_then(|tag| vm.tags().name(tag)).map(String::from) {
        Some(name) => {
            vm.push_string(&name);
        }
        None => vm.push_nil(),
    }
    1
}

// ---------------------------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------------------------

fn get_taint_mode(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let mode = vm.taint_mode();
    vm.push_string(mode.as_str());
    Ok(1)
}

fn set_taint_mode(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let mode = vm
        .to_str(1)
        .and_then(|s| s.parse::<TaintMode>().ok())
        .ok_or_else(|| bad(1, "settaintmode", ApiError::InvalidArgument("invalid option")))?;
    vm.set_taint_mode(mode);
    Ok(0)
}

// ---------------------------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------------------------

fn get_stack_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let (thread, _) = opt_thread(vm);
    let taint = vm.thread_taint(thread)?;
    Ok(push_taint(vm, taint))
}

fn get_new_object_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let (thread, _) = opt_thread(vm);
    let taint = vm.new_object_taint(thread)?;
    Ok(push_taint(vm, taint))
}

fn get_new_closure_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let (thread, _) = opt_thread(vm);
    let taint = vm.new_closure_taint(thread)?;
    Ok(push_taint(vm, taint))
}

fn set_stack_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    const NAME: &str = "setstacktaint";
    let (thread, arg) = opt_thread(vm);
    check_any(vm, arg, NAME)?;
    let taint = opt_taint(vm, arg, NAME)?;
    vm.set_stack_taint(thread, taint)?;
    Ok(0)
}

fn set_new_object_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    const NAME: &str = "setnewobjecttaint";
    let (thread, arg) = opt_thread(vm);
    check_any(vm, arg, NAME)?;
    let taint = opt_taint(vm, arg, NAME)?;
    vm.set_new_object_taint(thread, taint)?;
    Ok(0)
}

fn set_new_closure_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    const NAME: &str = "setnewclosuretaint";
    let (thread, arg) = opt_thread(vm);
    check_any(vm, arg, NAME)?;
    let taint = opt_taint(vm, arg, NAME)?;
    vm.set_new_closure_taint(thread, taint)?;
    Ok(0)
}

fn clear_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    vm.clear_taint(None)?;
    Ok(0)
}

fn reset_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    vm.reset_taint(None)?;
    Ok(0)
}

fn force_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    vm.force_taint_thread(None)?;
    Ok(0)
}

fn is_secure(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let secure = vm.is_secure_thread(None)?;
    vm.push_boolean(secure);
    Ok(1)
}

// ---------------------------------------------------------------------------------------------
// Values and objects
// ---------------------------------------------------------------------------------------------

fn get_value_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    check_any(vm, 1, "getvaluetaint")?;
    let taint = vm.value_taint(1)?;
    Ok(push_taint(vm, taint))
}

fn set_value_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    const NAME: &str = "setvaluetaint";
    check_any(vm, 1, NAME)?;
    check_any(vm, 2, NAME)?;
    vm.set_top(2)?;
    let taint = opt_taint(vm, 2, NAME)?;
    vm.set_value_taint(1, taint)?;
    vm.set_top(1)?;
    Ok(1)
}

fn get_object_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    let taint = vm
        .object_taint(1)
        .map_err(|e| bad(1, "getobjecttaint", e))?;
    Ok(push_taint(vm, taint))
}

fn set_object_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    const NAME: &str = "setobjecttaint";
    // Validate the target before reading the tag.
    vm.object_taint(1).map_err(|e| bad(1, NAME, e))?;
    check_any(vm, 2, NAME)?;
    let taint = opt_taint(vm, 2, NAME)?;
    vm.set_object_taint(1, taint).map_err(|e| bad(1, NAME, e))?;
    Ok(0)
}

// ---------------------------------------------------------------------------------------------
// Tables and upvalues
// ---------------------------------------------------------------------------------------------

fn get_table_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    const NAME: &str = "gettabletaint";
    check_kind(vm, 1, NAME, ValueKind::Table, "table expected")?;
    vm.set_top(2)?;
    let taint = vm.table_slot_taint(1, 2).map_err(|e| bad(2, NAME, e))?;
    Ok(push_taint(vm, taint))
}

fn set_table_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    const NAME: &str = "settabletaint";
    check_kind(vm, 1, NAME, ValueKind::Table, "table expected")?;
    check_any(vm, 2, NAME)?;
    check_any(vm, 3, NAME)?;
    let taint = opt_taint(vm, 3, NAME)?;
    vm.set_table_slot_taint(1, 2, taint)
        .map_err(|e| bad(2, NAME, e))?;
    Ok(0)
}

fn get_upvalue_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    const NAME: &str = "getupvaluetaint";
    check_kind(vm, 1, NAME, ValueKind::Function, "function expected")?;
    let n = check_position(vm, 2, NAME, "upvalue index out of range")?;
    let taint = vm.upvalue_taint(1, n).map_err(|e| bad(2, NAME, e))?;
    Ok(push_taint(vm, taint))
}

fn set_upvalue_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    const NAME: &str = "setupvaluetaint";
    check_kind(vm, 1, NAME, ValueKind::Function, "function expected")?;
    let n = check_position(vm, 2, NAME, "upvalue index out of range")?;
    check_any(vm, 3, NAME)?;
    let taint = opt_taint(vm, 3, NAME)?;
    vm.set_upvalue_taint(1, n, taint)
        .map_err(|e| bad(2, NAME, e))?;
    Ok(0)
}

/// `true` if `[table,] name` is a secure slot, otherwise `false` and the slot's taint.
fn is_secure_variable(vm: &mut Vm) -> Result<usize, RuntimeError> {
    const NAME: &str = "issecurevariable";
    if vm.kind(1).ok() != Some(ValueKind::Table) {
        vm.push_globals();
        vm.insert(1)?;
    }
    check_kind(vm, 2, NAME, ValueKind::String, "string expected")?;
    let taint = vm.table_slot_taint(1, 2)?;
    vm.push_boolean(taint.is_none());
    match taint {
        None => Ok(1),
        Some(_) => Ok(1 + push_taint(vm, taint)),
    }
}

// ---------------------------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------------------------

fn get_call_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    const NAME: &str = "getcalltaint";
    let (thread, arg) = opt_thread(vm);
    let level = check_position(vm, arg, NAME, "level out of range")?;
    let taint = vm
        .call_taint(thread, level)
        .map_err(|e| bad(arg, NAME, e))?;
    Ok(push_taint(vm, taint))
}

fn get_local_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    const NAME: &str = "getlocaltaint";
    let (thread, arg) = opt_thread(vm);
    let level = check_position(vm, arg, NAME, "level out of range")?;
    let n = check_position(vm, arg + 1, NAME, "local index out of range")?;
    let taint = vm
        .local_taint(thread, level, n)
        .map_err(|e| local_error(arg, NAME, e))?;
    Ok(push_taint(vm, taint))
}

fn set_local_taint(vm: &mut Vm) -> Result<usize, RuntimeError> {
    const NAME: &str = "setlocaltaint";
    let (thread, arg) = opt_thread(vm);
    let level = check_position(vm, arg, NAME, "level out of range")?;
    let n = check_position(vm, arg + 1, NAME, "local index out of range")?;
    check_any(vm, arg + 2, NAME)?;
    let taint = opt_taint(vm, arg + 2, NAME)?;
    vm.set_local_taint(thread, level, n, taint)
        .map_err(|e| local_error(arg, NAME, e))?;
    Ok(0)
}

/// Blames the level argument for a bad level and the index argument otherwise.
fn local_error(arg: usize, function: &'static str, error: ApiError) -> RuntimeError {
    match error {
        ApiError::ArgumentOutOfRange("level out of range") => bad(arg, function, error),
        _ => bad(arg + 1, function, error),
    }
}

// ---------------------------------------------------------------------------------------------
// Secure execution
// ---------------------------------------------------------------------------------------------

fn new_secure_function(vm: &mut Vm) -> Result<usize, RuntimeError> {
    vm.create_secure_delegate();
    Ok(1)
}

fn secure_call(vm: &mut Vm) -> Result<usize, RuntimeError> {
    check_any(vm, 1, "securecall")?;
    let nargs = vm.get_top() - 1;
    let status = vm.secure_call(nargs, Returns::All, 0)?;
    if status.is_ok() {
        Ok(vm.get_top())
    } else {
        Err(vm.raise())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;

    fn lib_vm() -> Vm {
        let mut vm = Vm::default();
        open(&mut vm).unwrap();
        vm
    }

    /// Pushes `debug[name]`.
    fn lib_fn(vm: &mut Vm, name: &str) {
        vm.get_global("debug");
        vm.get_field(-1, name).unwrap();
        vm.remove(-2).unwrap();
    }

    #[test]
    fn open_registers_into_debug_table() {
        let mut vm = lib_vm();
        vm.get_global("debug");
        for (name, _) in FUNCTIONS {
            vm.get_field(-1, name).unwrap();
            assert_eq!(vm.kind(-1), Ok(ValueKind::Function), "{name}");
            vm.pop(1);
        }
        vm.pop(1);
        assert_eq!(vm.get_top(), 0);
    }

    #[test]
    fn taint_mode_by_name() {
        let mut vm = lib_vm();
        lib_fn(&mut vm, "settaintmode");
        vm.push_string("r");
        vm.call(1, Returns::Exactly(0)).unwrap();
        assert_eq!(vm.taint_mode(), TaintMode::Read);

        lib_fn(&mut vm, "gettaintmode");
        vm.call(0, Returns::Exactly(1)).unwrap();
        assert_eq!(vm.to_str(-1).as_deref(), Some("r"));

        lib_fn(&mut vm, "settaintmode");
        vm.push_string("bogus");
        assert_eq!(vm.pcall(1, Returns::All, 0), Ok(Status::Runtime));
        assert_eq!(
            vm.to_str(-1).as_deref(),
            Some("bad argument #1 to 'settaintmode' (invalid option)")
        );
    }

    #[test]
    fn stack_taint_by_name() {
        let mut vm = lib_vm();
        lib_fn(&mut vm, "setstacktaint");
        vm.push_string("MyAddon");
        vm.call(1, Returns::Exactly(0)).unwrap();
        let tag = vm.tags().get("MyAddon");
        assert!(tag.is_some());
        assert_eq!(vm.thread_taint(None), Ok(tag));

        lib_fn(&mut vm, "getstacktaint");
        vm.call(0, Returns::Exactly(1)).unwrap();
        assert_eq!(vm.to_str(-1).as_deref(), Some("MyAddon"));
        vm.pop(1);

        lib_fn(&mut vm, "cleartaint");
        vm.call(0, Returns::Exactly(0)).unwrap();
        lib_fn(&mut vm, "getstacktaint");
        vm.call(0, Returns::Exactly(1)).unwrap();
        assert_eq!(vm.kind(-1), Ok(ValueKind::Nil));
    }

    #[test]
    fn setvaluetaint_returns_retagged_value() {
        let mut vm = lib_vm();
        lib_fn(&mut vm, "setvaluetaint");
        vm.push_number(3.0);
        vm.push_string("MyAddon");
        vm.call(2, Returns::Exactly(1)).unwrap();
        assert_eq!(vm.to_number(-1), Some(3.0));
        assert_eq!(vm.value_taint(-1), Ok(vm.tags().get("MyAddon")));
        assert_eq!(vm.is_secure_thread(None), Ok(true));

        lib_fn(&mut vm, "getvaluetaint");
        vm.insert(-2).unwrap();
        vm.call(1, Returns::Exactly(1)).unwrap();
        assert_eq!(vm.to_str(-1).as_deref(), Some("MyAddon"));
    }

    #[test]
    fn getobjecttaint_rejects_numbers() {
        let mut vm = lib_vm();
        lib_fn(&mut vm, "getobjecttaint");
        vm.push_number(1.0);
        assert_eq!(vm.pcall(1, Returns::All, 0), Ok(Status::Runtime));
        assert_eq!(
            vm.to_str(-1).as_deref(),
            Some(
                "bad argument #1 to 'getobjecttaint' \
                 (expected function, string, table, thread, or userdata)"
            )
        );
    }

    #[test]
    fn getcalltaint_level_out_of_range() {
        let mut vm = lib_vm();
        lib_fn(&mut vm, "getcalltaint");
        vm.push_number(10.0);
        assert_eq!(vm.pcall(1, Returns::All, 0), Ok(Status::Runtime));
        assert_eq!(
            vm.to_str(-1).as_deref(),
            Some("bad argument #1 to 'getcalltaint' (level out of range)")
        );

        vm.set_top(0).unwrap();
        lib_fn(&mut vm, "getcalltaint");
        vm.push_number(0.0);
        vm.call(1, Returns::Exactly(1)).unwrap();
        assert_eq!(vm.kind(-1), Ok(ValueKind::Nil));
    }

    #[test]
    fn thread_argument_selects_thread() {
        let mut vm = lib_vm();
        let t = vm.tags_mut().intern("Other");
        let co = vm.new_thread();
        vm.set_thread_taint(Some(co), Some(t)).unwrap();

        lib_fn(&mut vm, "getstacktaint");
        vm.insert(-2).unwrap();
        vm.call(1, Returns::Exactly(1)).unwrap();
        assert_eq!(vm.to_str(-1).as_deref(), Some("Other"));
        vm.pop(1);

        lib_fn(&mut vm, "getstacktaint");
        vm.call(0, Returns::Exactly(1)).unwrap();
        assert_eq!(vm.kind(-1), Ok(ValueKind::Nil));
    }

    #[test]
    fn issecurevariable_reports_taint_name() {
        let mut vm = lib_vm();
        let t = vm.tags_mut().intern("MyAddon");
        vm.push_number(1.0);
        vm.set_global("Secure").unwrap();
        vm.set_thread_taint(None, Some(t)).unwrap();
        vm.push_number(2.0);
        vm.set_global("Tainted").unwrap();
        vm.clear_taint(None).unwrap();

        lib_fn(&mut vm, "issecurevariable");
        vm.push_string("Secure");
        vm.call(1, Returns::All).unwrap();
        assert_eq!(vm.get_top(), 1);
        assert!(vm.to_boolean(1));
        vm.set_top(0).unwrap();

        lib_fn(&mut vm, "issecurevariable");
        vm.push_string("Tainted");
        vm.call(1, Returns::All).unwrap();
        assert_eq!(vm.get_top(), 2);
        assert!(!vm.to_boolean(1));
        assert_eq!(vm.to_str(2).as_deref(), Some("MyAddon"));
        assert_eq!(vm.is_secure_thread(None), Ok(true));
        vm.set_top(0).unwrap();

        lib_fn(&mut vm, "issecurevariable");
        vm.create_table(0);
        vm.push_string("field");
        vm.call(2, Returns::Exactly(1)).unwrap();
        assert!(vm.to_boolean(1));
    }

    #[test]
    fn securecall_by_name_restores_caller() {
        let mut vm = lib_vm();
        vm.push_function(|vm| {
            vm.force_taint_thread(None)?;
            vm.push_number(1.0);
            Ok(1)
        });
        vm.set_global("helper").unwrap();

        lib_fn(&mut vm, "securecall");
        vm.push_string("helper");
        vm.call(1, Returns::All).unwrap();
        assert_eq!(vm.get_top(), 1);
        assert_eq!(vm.to_number(1), Some(1.0));
        assert_eq!(vm.is_secure_thread(None), Ok(true));
        assert_eq!(vm.is_secure_value(1), Ok(true));
    }
}
