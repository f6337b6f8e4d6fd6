#![forbid(unsafe_code)]

//! Binding observable handles to a root variable.
//!
//! A container becomes observable when it is bound: it learns its root
//! variable, its dot-path under that root, and a weak reference to the
//! [`MutationSink`] (the store) that receives its mutation records. The
//! presence of a binding is the "already wrapped" marker: [`wrap`] skips
//! handles that carry one, which makes it idempotent and keeps cycles from
//! recursing forever.
//!
//! Every recursive pass over a value graph (binding, re-basing, detaching)
//! carries an explicit visited set keyed by handle address.

use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashSet;

use crate::key::ItemKey;
use crate::path;
use crate::record::{Action, MutationRecord};
use crate::value::Value;

/// Receiver of observation-layer traffic. Implemented by the store.
pub trait MutationSink {
    /// Queue a mutation record.
    fn emit(&self, record: MutationRecord);

    /// A bound value was read. `token` is the fully-qualified dot-path.
    fn track(&self, root: &str, token: &str);

    /// Hand out the next identity key.
    fn allocate_key(&self) -> ItemKey;
}

/// Addresses of handles already visited by a traversal pass.
pub(crate) type Visited = AHashSet<usize>;

/// Where a bound container lives.
#[derive(Clone)]
pub struct Binding {
    root: Rc<str>,
    path: String,
    sink: Weak<dyn MutationSink>,
}

impl Binding {
    #[must_use]
    pub fn new(root: &str, path: impl Into<String>, sink: &Rc<dyn MutationSink>) -> Self {
        Self {
            root: Rc::from(root),
            path: path.into(),
            sink: Rc::downgrade(sink),
        }
    }

    /// Root variable name.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Dot-path relative to the root (`""` for the root value).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the container sits below the root value.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        !self.path.is_empty()
    }

    /// Whether both bindings feed the same sink under the same root.
    #[must_use]
    pub fn same_scope(&self, other: &Self) -> bool {
        self.root == other.root && Weak::ptr_eq(&self.sink, &other.sink)
    }

    pub(crate) fn child(&self, segment: &str) -> Self {
        Self {
            root: Rc::clone(&self.root),
            path: path::join(&self.path, segment),
            sink: self.sink.clone(),
        }
    }

    pub(crate) fn child_index(&self, index: usize) -> Self {
        self.child(&index.to_string())
    }

    /// Start a record for this container's root, pathed at this container.
    pub(crate) fn record(&self, action: Action) -> MutationRecord {
        MutationRecord::new(self.root.as_ref(), action).with_path(self.path.clone())
    }

    pub(crate) fn emit(&self, record: MutationRecord) {
        if let Some(sink) = self.sink.upgrade() {
            sink.emit(record);
        }
    }

    /// Report a read of `relative` (a path under the root).
    pub(crate) fn track(&self, relative: &str) {
        if let Some(sink) = self.sink.upgrade() {
            sink.track(&self.root, &path::qualify(&self.root, relative));
        }
    }

    pub(crate) fn allocate_key(&self) -> Option<ItemKey> {
        self.sink.upgrade().map(|sink| sink.allocate_key())
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("root", &self.root)
            .field("path", &self.path)
            .finish()
    }
}

/// Bind `value` under `root` at `path`, feeding records to `sink`.
///
/// Primitives pass through. Handles that are already bound are returned
/// unchanged, as are any already-bound handles found below a fresh one.
pub fn wrap(value: Value, root: &str, path: &str, sink: &Rc<dyn MutationSink>) -> Value {
    attach(value, &Binding::new(root, path, sink))
}

pub(crate) fn attach(value: Value, binding: &Binding) -> Value {
    let mut visited = Visited::default();
    attach_inner(&value, binding, &mut visited);
    value
}

/// Bind a value being inserted at `binding`'s position.
///
/// Fresh values are attached. A value already bound in the same scope was
/// moved, so its paths are re-based. Values owned by another scope are left
/// alone.
pub(crate) fn place(value: Value, binding: &Binding) -> Value {
    let current = match &value {
        Value::Object(o) => o.binding(),
        Value::Array(a) => a.binding(),
        _ => return value,
    };
    let mut visited = Visited::default();
    match current {
        None => attach_inner(&value, binding, &mut visited),
        Some(cur) if cur.same_scope(binding) => rebind_inner(&value, binding, &mut visited),
        Some(_) => {}
    }
    value
}

pub(crate) fn attach_inner(value: &Value, binding: &Binding, visited: &mut Visited) {
    match value {
        Value::Object(o) => o.attach(binding, visited),
        Value::Array(a) => a.attach(binding, visited),
        _ => {}
    }
}

/// Move a subtree that already belongs to `binding`'s scope to a new path.
pub(crate) fn rebind_inner(value: &Value, binding: &Binding, visited: &mut Visited) {
    match value {
        Value::Object(o) => o.rebind(binding, visited),
        Value::Array(a) => a.rebind(binding, visited),
        _ => {}
    }
}

/// Strip bindings in `scope` from a discarded subtree.
///
/// Identity keys are kept; a detached handle just stops reporting.
pub fn detach(value: &Value, scope: &Binding) {
    let mut visited = Visited::default();
    detach_inner(value, scope, &mut visited);
}

/// Detach a value removed from `slot`, unless it was moved elsewhere first.
pub(crate) fn release(value: &Value, slot: &Binding) {
    let current = match value {
        Value::Object(o) => o.binding(),
        Value::Array(a) => a.binding(),
        _ => return,
    };
    if current.is_some_and(|cur| cur.same_scope(slot) && cur.path() == slot.path()) {
        detach_inner(value, slot, &mut Visited::default());
    }
}

pub(crate) fn detach_inner(value: &Value, scope: &Binding, visited: &mut Visited) {
    match value {
        Value::Object(o) => o.detach(scope, visited),
        Value::Array(a) => a.detach(scope, visited),
        _ => {}
    }
}
