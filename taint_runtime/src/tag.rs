// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Taint tags.
//!
//! A [`TaintTag`] is an opaque provenance token compared by identity. Tags are interned by name in
//! a per-VM [`TaintTags`] table so the reflection layer can exchange them with scripts as strings.
//!
//! The absence of a tag means "secure"; see [`Taint`].

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::num::NonZeroU32;

use hashbrown::HashMap;

/// Name of the tag installed by [`Vm::force_taint_thread`](crate::vm::Vm::force_taint_thread).
pub const FORCED_TAINT_NAME: &str = "*** ForceTaint_Strong ***";

/// An interned provenance tag.
///
/// Equality is identity: two tags are equal only if they were produced by the same
/// [`TaintTags::intern`] entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaintTag(NonZeroU32);

impl TaintTag {
    /// The tag applied by forced tainting. Always the first entry of a [`TaintTags`] table.
    pub const FORCED: Self = Self(NonZeroU32::MIN);

    /// Returns the raw interned id.
    #[must_use]
    pub const fn id(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for TaintTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "taint#{}", self.0)
    }
}

/// A possibly-absent taint. `None` is the distinguished secure value.
pub type Taint = Option<TaintTag>;

/// Combines the taint already held by a reader with the taint of the data it reads.
///
/// The first non-secure tag wins: a tainted reader keeps its own tag even when the data carries a
/// different one, and a secure reader adopts the data's tag.
#[inline]
#[must_use]
pub const fn union(current: Taint, incoming: Taint) -> Taint {
    match current {
        Some(tag) => Some(tag),
        None => incoming,
    }
}

/// Name table for [`TaintTag`]s.
#[derive(Clone, Debug)]
pub struct TaintTags {
    names: Vec<Box<str>>,
    by_name: HashMap<Box<str>, TaintTag>,
}

impl Default for TaintTags {
    fn default() -> Self {
        Self::new()
    }
}

impl TaintTags {
    /// Creates a table holding only the forced tag.
    #[must_use]
    pub fn new() -> Self {
        let mut tags = Self {
            names: Vec::new(),
            by_name: HashMap::new(),
        };
        let forced = tags.intern(FORCED_TAINT_NAME);
        debug_assert_eq!(forced, TaintTag::FORCED, "forced tag must be interned first");
        tags
    }

    /// Returns the tag for `name`, interning it on first use.
    pub fn intern(&mut self, name: &str) -> TaintTag {
        if let Some(tag) = self.by_name.get(name) {
            return *tag;
        }
        let next = u32::try_from(self.names.len()).unwrap_or(u32::MAX);
        let tag = TaintTag(NonZeroU32::MIN.saturating_add(next));
        self.names.push(Box::from(name));
        self.by_name.insert(Box::from(name), tag);
        tag
    }

    /// Looks up an already interned tag.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<TaintTag> {
        self.by_name.get(name).copied()
    }

    /// Returns the name `tag` was interned under.
    ///
    /// Returns `None` for tags that belong to another table.
    #[must_use]
    pub fn name(&self, tag: TaintTag) -> Option<&str> {
        let ix = usize::try_from(tag.0.get() - 1).ok()?;
        self.names.get(ix).map(|n| &**n)
    }

    /// Number of interned tags, including the forced tag.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always `false`: the forced tag is interned on construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
