// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Object heap.
//!
//! Every heap entity carries exactly one persistent taint, stamped at construction and mutable
//! afterwards. Objects are never collected; handles stay valid for the lifetime of the VM.

use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::function::Function;
use crate::table::Table;
use crate::tag::Taint;
use crate::value::ObjectId;

/// An opaque host object.
#[derive(Clone, Debug, Default)]
pub struct Userdata {
    /// Raw payload owned by the host.
    pub bytes: Vec<u8>,
    metatable: Option<ObjectId>,
}

impl Userdata {
    /// Returns the metatable handle, if any.
    #[must_use]
    pub fn metatable(&self) -> Option<ObjectId> {
        self.metatable
    }
}

#[derive(Clone, Debug)]
pub(crate) enum ObjectBody {
    Str(Rc<str>),
    Table(Table),
    Function(Function),
    Userdata(Userdata),
}

#[derive(Clone, Debug)]
struct HeapObject {
    taint: Taint,
    body: ObjectBody,
}

/// Heap storage for strings, tables, functions and userdata.
#[derive(Clone, Debug, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc(&mut self, body: ObjectBody, taint: Taint) -> ObjectId {
        let id = ObjectId(u32::try_from(self.objects.len()).unwrap_or(u32::MAX));
        debug_assert!(id.0 != u32::MAX, "object handle space exhausted");
        self.objects.push(HeapObject { taint, body });
        id
    }

    pub(crate) fn alloc_str(&mut self, s: &str, taint: Taint) -> ObjectId {
        self.alloc(ObjectBody::Str(Rc::from(s)), taint)
    }

    pub(crate) fn alloc_userdata(&mut self, size: usize, taint: Taint) -> ObjectId {
        self.alloc(
            ObjectBody::Userdata(Userdata {
                bytes: alloc::vec![0; size],
                metatable: None,
            }),
            taint,
        )
    }

    /// Number of allocated objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if nothing has been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Persistent taint of `id`. Unknown handles read as secure.
    #[must_use]
    pub fn taint(&self, id: ObjectId) -> Taint {
        self.objects.get(id.0 as usize).and_then(|o| o.taint)
    }

    pub(crate) fn set_taint(&mut self, id: ObjectId, taint: Taint) {
        if let Some(o) = self.objects.get_mut(id.0 as usize) {
            o.taint = taint;
        }
    }

    /// String contents of `id`.
    #[must_use]
    pub fn str(&self, id: ObjectId) -> Option<&Rc<str>> {
        match &self.objects.get(id.0 as usize)?.body {
            ObjectBody::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Table stored at `id`.
    #[must_use]
    pub fn table(&self, id: ObjectId) -> Option<&Table> {
        match &self.objects.get(id.0 as usize)?.body {
            ObjectBody::Table(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn table_mut(&mut self, id: ObjectId) -> Option<&mut Table> {
        match &mut self.objects.get_mut(id.0 as usize)?.body {
            ObjectBody::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Function stored at `id`.
    #[must_use]
    pub fn function(&self, id: ObjectId) -> Option<&Function> {
        match &self.objects.get(id.0 as usize)?.body {
            ObjectBody::Function(f) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn function_mut(&mut self, id: ObjectId) -> Option<&mut Function> {
        match &mut self.objects.get_mut(id.0 as usize)?.body {
            ObjectBody::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Userdata stored at `id`.
    #[must_use]
    pub fn userdata(&self, id: ObjectId) -> Option<&Userdata> {
        match &self.objects.get(id.0 as usize)?.body {
            ObjectBody::Userdata(u) => Some(u),
            _ => None,
        }
    }

    /// Metatable of a table or userdata.
    #[must_use]
    pub fn metatable(&self, id: ObjectId) -> Option<ObjectId> {
        match &self.objects.get(id.0 as usize)?.body {
            ObjectBody::Table(t) => t.metatable(),
            ObjectBody::Userdata(u) => u.metatable,
            ObjectBody::Str(_) | ObjectBody::Function(_) => None,
        }
    }

    /// Replaces the metatable of a table or userdata. Returns `false` for other objects.
    pub(crate) fn set_metatable(&mut self, id: ObjectId, metatable: Option<ObjectId>) -> bool {
        let Some(o) = self.objects.get_mut(id.0 as usize) else {
            return false;
        };
        match &mut o.body {
            ObjectBody::Table(t) => {
                t.set_metatable(metatable);
                true
            }
            ObjectBody::Userdata(u) => {
                u.metatable = metatable;
                true
            }
            ObjectBody::Str(_) | ObjectBody::Function(_) => false,
        }
    }
}
