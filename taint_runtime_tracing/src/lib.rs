// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Adapter that forwards `taint_runtime` trace hooks to the [`tracing`] ecosystem.
//!
//! Scopes (calls, secure calls, secure delegates) become `TRACE` level spans that are entered on
//! `scope_enter` and exited on `scope_exit`. Thread taint transitions become `DEBUG` events.
//! Install a subscriber (for example `tracing_subscriber::fmt`) to see them.
//!
//! A host panic can unwind through scopes without reporting their exit. Spans left behind that way
//! are closed as soon as a later event shows they are gone: entering a scope at or below their
//! position, or exiting a scope that encloses them.
//!
//! ```
//! use taint_runtime::vm::Vm;
//! use taint_runtime_tracing::TracingTraceSink;
//!
//! let mut vm = Vm::default();
//! vm.set_trace_sink(Box::new(TracingTraceSink::new()));
//! ```

use taint_runtime::tag::{Taint, TaintTag, TaintTags};
use taint_runtime::thread::ThreadTaint;
use taint_runtime::trace::{ScopeKind, TaintCause, TraceMask, TraceOutcome, TraceSink};
use taint_runtime::value::{ObjectId, ThreadId};
use tracing::span::EnteredSpan;
use tracing::{debug, trace, trace_span};

/// Resolves labels for tags and functions.
///
/// Return `None` to fall back to the default label.
pub trait TagLabeler {
    /// Label for a non-secure tag.
    fn tag_label(&mut self, tag: TaintTag, tags: &TaintTags) -> Option<String> {
        tags.name(tag).map(String::from)
    }

    /// Label for a called function.
    fn function_label(&mut self, _function: ObjectId) -> Option<String> {
        None
    }
}

/// Labels tags by their interned names.
#[derive(Clone, Copy, Debug, Default)]
pub struct NameLabeler;

impl TagLabeler for NameLabeler {}

/// Position of a scope within a thread: frame depth, then calls before the boundaries they run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ScopePos {
    depth: usize,
    boundary: bool,
}

impl ScopePos {
    fn new(kind: ScopeKind, depth: usize) -> Self {
        Self {
            depth,
            boundary: !matches!(kind, ScopeKind::Call { .. }),
        }
    }
}

struct OpenScope {
    thread: ThreadId,
    pos: ScopePos,
    _span: EnteredSpan,
}

/// A [`TraceSink`] that emits `tracing` spans and events.
pub struct TracingTraceSink<L = NameLabeler> {
    labeler: L,
    mask: TraceMask,
    spans: Vec<OpenScope>,
}

impl<L> core::fmt::Debug for TracingTraceSink<L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TracingTraceSink")
            .field("mask", &self.mask)
            .field("open_spans", &self.spans.len())
            .finish_non_exhaustive()
    }
}

impl Default for TracingTraceSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TracingTraceSink {
    /// Creates a sink that traces everything and labels tags by name.
    #[must_use]
    pub fn new() -> Self {
        Self::with_labeler(NameLabeler)
    }
}

impl<L: TagLabeler> TracingTraceSink<L> {
    /// Creates a sink with a custom labeler.
    #[must_use]
    pub fn with_labeler(labeler: L) -> Self {
        Self {
            labeler,
            mask: TraceMask::ALL,
            spans: Vec::new(),
        }
    }

    /// Restricts the events this sink asks for.
    #[must_use]
    pub fn with_mask(mut self, mask: TraceMask) -> Self {
        self.mask = mask;
        self
    }

    /// Number of scopes currently entered.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.spans.len()
    }

    /// Closes spans of `thread` at or after `pos`, innermost first.
    fn close_from(&mut self, thread: ThreadId, pos: ScopePos) {
        while self
            .spans
            .last()
            .is_some_and(|open| open.thread == thread && open.pos >= pos)
        {
            self.spans.pop();
        }
    }

    fn taint_label(&mut self, taint: Taint, tags: &TaintTags) -> String {
        match taint {
            None => String::from("secure"),
            Some(tag) => self
                .labeler
                .tag_label(tag, tags)
                .unwrap_or_else(|| tag.to_string()),
        }
    }
}

impl<L: TagLabeler> TraceSink for TracingTraceSink<L> {
    fn mask(&self) -> TraceMask {
        self.mask
    }

    fn scope_enter(
        &mut self,
        tags: &TaintTags,
        kind: ScopeKind,
        thread: ThreadId,
        depth: usize,
        taint: Taint,
    ) {
        let pos = ScopePos::new(kind, depth);
        // Anything still open at this position was abandoned by an unwind.
        self.close_from(thread, pos);
        let taint = self.taint_label(taint, tags);
        let span = match kind {
            ScopeKind::Call { function } => {
                let function = self
                    .labeler
                    .function_label(function)
                    .unwrap_or_else(|| format!("function#{}", function.0));
                trace_span!("call", %function, thread = thread.0, depth, %taint)
            }
            ScopeKind::SecureCall => trace_span!("secure_call", thread = thread.0, depth, %taint),
            ScopeKind::Delegate => trace_span!("secure_delegate", thread = thread.0, depth, %taint),
        };
        self.spans.push(OpenScope {
            thread,
            pos,
            _span: span.entered(),
        });
    }

    fn scope_exit(
        &mut self,
        _tags: &TaintTags,
        kind: ScopeKind,
        thread: ThreadId,
        depth: usize,
        outcome: TraceOutcome<'_>,
    ) {
        match outcome {
            TraceOutcome::Ok => trace!("scope returned"),
            TraceOutcome::Error(error) => trace!(%error, "scope unwound"),
            TraceOutcome::Caught(status) => debug!(status = status.code(), "error caught"),
        }
        // Dropping the guards exits the spans.
        self.close_from(thread, ScopePos::new(kind, depth));
    }

    fn taint_changed(
        &mut self,
        tags: &TaintTags,
        thread: ThreadId,
        from: ThreadTaint,
        to: ThreadTaint,
        cause: TaintCause,
    ) {
        let from = self.taint_label(from.stack, tags);
        let to_label = self.taint_label(to.stack, tags);
        debug!(
            thread = thread.0,
            %from,
            to = %to_label,
            secure = to.is_secure(),
            ?cause,
            "thread taint changed"
        );
    }
}
