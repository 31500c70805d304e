// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `taint_runtime`: an embeddable script runtime core with taint tracking.
//!
//! Every value slot, heap object, table slot, call frame, upvalue and thread carries a taint: an
//! opaque provenance tag, or `None` for secure. Pushes, table reads and writes, and calls
//! propagate taint; [`Vm::secure_call`](vm::Vm::secure_call) isolates whatever a callee does to
//! the thread's taint from its caller.
//!
//! ## Example
//!
//! ```
//! use taint_runtime::vm::{Returns, Vm};
//!
//! let mut vm = Vm::default();
//! let addon = vm.tags_mut().intern("MyAddon");
//!
//! // Data written by tainted code...
//! vm.create_table(0);
//! vm.set_thread_taint(None, Some(addon))?;
//! vm.push_number(0.5);
//! vm.set_field(1, "alpha")?;
//! vm.clear_taint(None)?;
//!
//! // ...taints whoever reads it.
//! vm.get_field(1, "alpha")?;
//! assert_eq!(vm.thread_taint(None)?, Some(addon));
//!
//! // A secure call hands the caller back its own taint.
//! vm.clear_taint(None)?;
//! vm.push_function(|vm| {
//!     vm.force_taint_thread(None)?;
//!     vm.push_boolean(true);
//!     Ok(1)
//! });
//! vm.secure_call(0, Returns::All, 0)?;
//! assert!(vm.is_secure_thread(None)?);
//! assert!(vm.is_secure_value(-1)?);
//! # Ok::<(), taint_runtime::error::RuntimeError>(())
//! ```

#![no_std]

extern crate alloc;

pub mod error;
pub mod function;
pub mod heap;
pub mod mode;
pub(crate) mod propagate;
pub(crate) mod secure;
pub mod security;
pub mod table;
pub mod tag;
pub(crate) mod taint;
pub mod thread;
pub mod trace;
pub mod value;
pub mod vm;
