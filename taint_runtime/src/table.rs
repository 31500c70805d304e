// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tables and their per-slot taint overlay.
//!
//! Slot taint lives in a side map keyed like the entries themselves. Only tainted slots have a
//! record, so tables written by secure code never allocate overlay storage.

use hashbrown::HashMap;

use crate::tag::{Taint, TaintTag};
use crate::value::{ObjectId, TableKey, Value};

/// A keyed table.
#[derive(Clone, Debug, Default)]
pub struct Table {
    entries: HashMap<TableKey, Value>,
    slot_taint: HashMap<TableKey, TaintTag>,
    metatable: Option<ObjectId>,
}

impl Table {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty table with room for `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            slot_taint: HashMap::new(),
            metatable: None,
        }
    }

    /// Returns the value stored at `key`, or `nil`.
    #[must_use]
    pub fn get(&self, key: &TableKey) -> Value {
        self.entries.get(key).copied().unwrap_or(Value::Nil)
    }

    /// Stores `value` at `key` and records `taint` for the slot.
    ///
    /// Storing `nil` deletes the entry together with its taint record.
    pub fn set(&mut self, key: TableKey, value: Value, taint: Taint) {
        if value.is_nil() {
            self.entries.remove(&key);
            self.slot_taint.remove(&key);
            return;
        }
        self.set_slot_taint(key.clone(), taint);
        self.entries.insert(key, value);
    }

    /// Returns the recorded taint for `key`. Slots without a record are secure.
    #[must_use]
    pub fn slot_taint(&self, key: &TableKey) -> Taint {
        self.slot_taint.get(key).copied()
    }

    /// Overwrites the taint record for `key` without touching its value.
    pub fn set_slot_taint(&mut self, key: TableKey, taint: Taint) {
        match taint {
            Some(tag) => {
                self.slot_taint.insert(key, tag);
            }
            None => {
                self.slot_taint.remove(&key);
            }
        }
    }

    /// Number of non-nil entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the metatable handle, if any.
    #[must_use]
    pub fn metatable(&self) -> Option<ObjectId> {
        self.metatable
    }

    /// Replaces the metatable.
    pub fn set_metatable(&mut self, metatable: Option<ObjectId>) {
        self.metatable = metatable;
    }

    /// Iterates over all entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&TableKey, &Value)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::TaintTags;
    use alloc::rc::Rc;

    fn key(s: &str) -> TableKey {
        TableKey::Str(Rc::from(s))
    }

    #[test]
    fn set_records_and_delete_discards_taint() {
        let mut tags = TaintTags::new();
        let t = tags.intern("t");
        let mut table = Table::new();

        table.set(key("r"), Value::Number(0.3), Some(t));
        assert_eq!(table.get(&key("r")), Value::Number(0.3));
        assert_eq!(table.slot_taint(&key("r")), Some(t));

        table.set(key("r"), Value::Nil, None);
        assert_eq!(table.get(&key("r")), Value::Nil);
        assert_eq!(table.slot_taint(&key("r")), None);
        assert!(table.is_empty());
    }

    #[test]
    fn secure_write_clears_previous_record() {
        let mut tags = TaintTags::new();
        let t = tags.intern("t");
        let mut table = Table::new();

        table.set(key("g"), Value::Boolean(true), Some(t));
        table.set(key("g"), Value::Boolean(false), None);
        assert_eq!(table.slot_taint(&key("g")), None);
    }

    #[test]
    fn explicit_slot_taint_roundtrip() {
        let mut tags = TaintTags::new();
        let t = tags.intern("t");
        let mut table = Table::new();
        table.set(key("b"), Value::Number(0.9), None);

        table.set_slot_taint(key("b"), Some(t));
        assert_eq!(table.slot_taint(&key("b")), Some(t));
        assert_eq!(table.get(&key("b")), Value::Number(0.9));

        table.set_slot_taint(key("b"), None);
        assert_eq!(table.slot_taint(&key("b")), None);
    }
}
