// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.

use core::fmt;

use crate::value::{Value, ValueKind};

/// An argument-shape error reported by the embedding API.
///
/// These are raised before any taint is mutated.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ApiError {
    /// The argument has the wrong kind.
    InvalidArgument(&'static str),
    /// A stack index, call level, local or upvalue index does not resolve.
    ArgumentOutOfRange(&'static str),
}

impl ApiError {
    /// Returns the human-readable message.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidArgument(m) | Self::ArgumentOutOfRange(m) => m,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl core::error::Error for ApiError {}

/// An error that unwinds through calls until a protected boundary catches it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RuntimeError {
    /// A script-level error carrying an arbitrary error object.
    Raised(Value),
    /// An embedding API argument check failed.
    Api(ApiError),
    /// A library function rejected one of its arguments.
    BadArgument {
        /// 1-based argument position.
        arg: usize,
        /// Library function name.
        function: &'static str,
        /// What went wrong.
        error: ApiError,
    },
    /// Attempted to call a value that is not a function.
    NotCallable(ValueKind),
    /// Attempted to index a value that is not a table.
    NotIndexable(ValueKind),
    /// Table key was `nil` or NaN.
    InvalidKey(&'static str),
    /// Call depth limit exceeded.
    CallDepthExceeded,
    /// Value stack limit exceeded.
    StackOverflow,
    /// A native function reported more results than it left on the stack.
    BadResultCount {
        /// Results reported.
        reported: usize,
        /// Values available in the frame.
        available: usize,
    },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raised(v) => write!(f, "error object ({})", v.kind()),
            Self::Api(e) => write!(f, "{e}"),
            Self::BadArgument {
                arg,
                function,
                error,
            } => write!(f, "bad argument #{arg} to '{function}' ({error})"),
            Self::NotCallable(kind) => write!(f, "attempt to call a {kind} value"),
            Self::NotIndexable(kind) => write!(f, "attempt to index a {kind} value"),
            Self::InvalidKey(m) => f.write_str(m),
            Self::CallDepthExceeded => write!(f, "stack overflow (call depth limit exceeded)"),
            Self::StackOverflow => write!(f, "stack overflow (value stack limit exceeded)"),
            Self::BadResultCount {
                reported,
                available,
            } => write!(
                f,
                "native function returned {reported} results with {available} on the stack"
            ),
        }
    }
}

impl core::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Api(e) | Self::BadArgument { error: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl From<ApiError> for RuntimeError {
    fn from(e: ApiError) -> Self {
        Self::Api(e)
    }
}

/// Outcome of a protected call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// The callee returned normally.
    Ok,
    /// The callee raised an error.
    Runtime,
    /// The error handler itself raised an error.
    ErrorHandler,
}

impl Status {
    /// Numeric status: `0` on success, non-zero on error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Runtime => 2,
            Self::ErrorHandler => 5,
        }
    }

    /// Returns `true` for [`Status::Ok`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}
