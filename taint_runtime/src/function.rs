// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Functions and upvalues.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use crate::error::RuntimeError;
use crate::tag::Taint;
use crate::value::{ObjectId, Value};
use crate::vm::Vm;

/// Host-native function body.
///
/// The callee sees its arguments at stack indices `1..=n` and returns how many values at the top
/// of its frame are results.
pub type NativeFn = Rc<dyn Fn(&mut Vm) -> Result<usize, RuntimeError>>;

/// A captured upvalue together with its taint.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Upvalue {
    /// Captured value.
    pub value: Value,
    /// Taint recorded for the capture.
    pub taint: Taint,
}

/// A function object.
#[derive(Clone)]
pub struct Function {
    body: NativeFn,
    env: ObjectId,
    upvalues: Vec<Upvalue>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("env", &self.env)
            .field("upvalues", &self.upvalues)
            .finish_non_exhaustive()
    }
}

impl Function {
    pub(crate) fn new(body: NativeFn, env: ObjectId, upvalues: Vec<Upvalue>) -> Self {
        Self {
            body,
            env,
            upvalues,
        }
    }

    pub(crate) fn body(&self) -> NativeFn {
        Rc::clone(&self.body)
    }

    /// Environment table handle.
    #[must_use]
    pub fn env(&self) -> ObjectId {
        self.env
    }

    pub(crate) fn set_env(&mut self, env: ObjectId) {
        self.env = env;
    }

    /// Number of captured upvalues.
    #[must_use]
    pub fn upvalue_count(&self) -> usize {
        self.upvalues.len()
    }

    /// Returns upvalue `n` (1-based).
    #[must_use]
    pub fn upvalue(&self, n: usize) -> Option<&Upvalue> {
        self.upvalues.get(n.checked_sub(1)?)
    }

    pub(crate) fn upvalue_mut(&mut self, n: usize) -> Option<&mut Upvalue> {
        self.upvalues.get_mut(n.checked_sub(1)?)
    }
}
