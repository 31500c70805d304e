// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Runtime values.

use alloc::rc::Rc;
use core::fmt;

/// Handle to a heap object (string, table, function or userdata).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

/// Handle to a thread of execution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

impl ThreadId {
    /// The root thread created with the VM.
    pub const MAIN: Self = Self(0);
}

/// A runtime value.
///
/// Reference kinds hold handles; their payload and persistent taint live in the VM heap.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// `nil`.
    #[default]
    Nil,
    /// Boolean.
    Boolean(bool),
    /// Number.
    Number(f64),
    /// String object.
    String(ObjectId),
    /// Table object.
    Table(ObjectId),
    /// Function object.
    Function(ObjectId),
    /// Opaque host object.
    Userdata(ObjectId),
    /// Thread object.
    Thread(ThreadId),
}

impl Value {
    /// Returns the kind tag of this value.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Nil => ValueKind::Nil,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Number(_) => ValueKind::Number,
            Self::String(_) => ValueKind::String,
            Self::Table(_) => ValueKind::Table,
            Self::Function(_) => ValueKind::Function,
            Self::Userdata(_) => ValueKind::Userdata,
            Self::Thread(_) => ValueKind::Thread,
        }
    }

    /// Returns the heap handle for heap-backed values.
    #[must_use]
    pub const fn object(&self) -> Option<ObjectId> {
        match self {
            Self::String(id) | Self::Table(id) | Self::Function(id) | Self::Userdata(id) => {
                Some(*id)
            }
            Self::Nil | Self::Boolean(_) | Self::Number(_) | Self::Thread(_) => None,
        }
    }

    /// Script truthiness: everything except `nil` and `false` is true.
    #[must_use]
    pub const fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Boolean(false))
    }

    /// Returns `true` for `nil`.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }
}

/// Kind tag of a [`Value`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// `nil`.
    Nil,
    /// Boolean.
    Boolean,
    /// Number.
    Number,
    /// String.
    String,
    /// Table.
    Table,
    /// Function.
    Function,
    /// Userdata.
    Userdata,
    /// Thread.
    Thread,
}

impl ValueKind {
    /// Returns `true` for kinds that carry a persistent object taint.
    #[must_use]
    pub const fn is_reference(self) -> bool {
        !matches!(self, Self::Nil | Self::Boolean | Self::Number)
    }

    /// Script-facing type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Table => "table",
            Self::Function => "function",
            Self::Userdata => "userdata",
            Self::Thread => "thread",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hashable form of a value used as a table key.
///
/// Strings key by content; other reference kinds key by identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TableKey {
    /// Boolean key.
    Boolean(bool),
    /// Number key, stored as normalized bits (`-0.0` folds into `0.0`).
    Number(u64),
    /// String key.
    Str(Rc<str>),
    /// Table, function or userdata key.
    Object(ObjectId),
    /// Thread key.
    Thread(ThreadId),
}

impl TableKey {
    /// Builds a number key. Returns `None` for NaN.
    #[must_use]
    pub fn number(n: f64) -> Option<Self> {
        if n.is_nan() {
            return None;
        }
        let n = if n == 0.0 { 0.0 } else { n };
        Some(Self::Number(n.to_bits()))
    }
}
