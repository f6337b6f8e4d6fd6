#![forbid(unsafe_code)]

//! Observable objects.
//!
//! An [`ObservableObject`] is a shared handle over an insertion-ordered
//! property map. Once bound to a store:
//!
//! - `get` reports a dependency read and wraps nested containers on first
//!   access, caching the handle so later reads return the identical object;
//! - `set` is a no-op for an identical value, otherwise it binds the new
//!   value and emits `modified`;
//! - `delete` emits `removed` when the property existed;
//! - a replaced or deleted container is detached and stops reporting.
//!
//! The identity key is assigned the first time the object is bound and
//! survives every in-place mutation.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::binding::{
    Binding, Visited, attach_inner, detach_inner, place, rebind_inner, release,
};
use crate::error::ValueError;
use crate::key::ItemKey;
use crate::path;
use crate::record::Action;
use crate::value::{Slot, Value, child_path, enter};

struct ObjectNode {
    key: Cell<Option<ItemKey>>,
    binding: RefCell<Option<Binding>>,
    props: RefCell<IndexMap<String, Slot>>,
}

/// Shared handle to an observable object.
///
/// Cloning the handle shares the same underlying object.
#[derive(Clone)]
pub struct ObservableObject {
    node: Rc<ObjectNode>,
}

impl ObservableObject {
    /// An empty, unbound object.
    #[must_use]
    pub fn new() -> Self {
        Self::from_slots(IndexMap::new())
    }

    /// Unbound object built from `(name, value)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::from_slots(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), Slot::Live(v.into())))
                .collect(),
        )
    }

    pub(crate) fn from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self::from_slots(
            map.into_iter()
                .map(|(k, v)| (k, Slot::from_json(v)))
                .collect(),
        )
    }

    fn from_slots(props: IndexMap<String, Slot>) -> Self {
        Self {
            node: Rc::new(ObjectNode {
                key: Cell::new(None),
                binding: RefCell::new(None),
                props: RefCell::new(props),
            }),
        }
    }

    /// Identity key, once the object has been bound.
    #[must_use]
    pub fn key(&self) -> Option<ItemKey> {
        self.node.key.get()
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.node.binding.borrow().is_some()
    }

    #[must_use]
    pub fn binding(&self) -> Option<Binding> {
        self.node.binding.borrow().clone()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.node).cast::<()>() as usize
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.node.props.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.node.props.borrow().is_empty()
    }

    /// Property names in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.node.props.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn contains_key(&self, prop: &str) -> bool {
        self.node.props.borrow().contains_key(prop)
    }

    /// Read a property, wrapping a nested container on first access.
    pub fn get(&self, prop: &str) -> Option<Value> {
        let binding = self.binding();
        if let Some(b) = &binding {
            b.track(&path::join(b.path(), prop));
        }
        let child = binding.as_ref().map(|b| b.child(prop));
        let mut props = self.node.props.borrow_mut();
        let slot = props.get_mut(prop)?;
        Some(slot.materialize(child.as_ref()))
    }

    /// All properties in insertion order, each read through [`get`](Self::get).
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.keys()
            .into_iter()
            .filter_map(|k| self.get(&k).map(|v| (k, v)))
            .collect()
    }

    /// Assign a property. Returns `false` when the value is identical to the
    /// current one, in which case nothing is recorded.
    pub fn set(&self, prop: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        let old = self.node.props.borrow().get(prop).map(Slot::peek);
        if old.as_ref().is_some_and(|old| old.is_same(&value)) {
            return false;
        }

        let binding = self.binding();
        if let (Some(b), Some(old)) = (&binding, &old) {
            release(old, &b.child(prop));
        }
        let value = match &binding {
            Some(b) => place(value, &b.child(prop)),
            None => value,
        };
        self.node
            .props
            .borrow_mut()
            .insert(prop.to_owned(), Slot::Live(value));

        if let Some(b) = binding {
            let record = b
                .record(Action::Modified)
                .with_item(Value::Object(self.clone()))
                .with_property(prop)
                .with_old_value(old)
                .with_path(path::join(b.path(), prop));
            b.emit(record);
        }
        true
    }

    /// Remove a property, returning its old value.
    pub fn delete(&self, prop: &str) -> Option<Value> {
        let removed = self.node.props.borrow_mut().shift_remove(prop)?;
        let old = removed.into_value();
        if let Some(b) = self.binding() {
            release(&old, &b.child(prop));
            let record = b
                .record(Action::Removed)
                .with_property(prop)
                .with_old_value(Some(old.clone()))
                .with_path(path::join(b.path(), prop));
            b.emit(record);
        }
        Some(old)
    }

    /// Deep JSON snapshot. Fails on cyclic graphs.
    pub fn to_json(&self) -> Result<serde_json::Value, ValueError> {
        self.to_json_inner("", &mut AHashSet::new())
    }

    pub(crate) fn to_json_inner(
        &self,
        at: &str,
        stack: &mut AHashSet<usize>,
    ) -> Result<serde_json::Value, ValueError> {
        enter(stack, self.addr(), at)?;
        let props = self.node.props.borrow();
        let mut map = serde_json::Map::with_capacity(props.len());
        for (k, slot) in props.iter() {
            map.insert(k.clone(), slot.to_json_inner(&child_path(at, k), stack)?);
        }
        stack.remove(&self.addr());
        Ok(serde_json::Value::Object(map))
    }

    fn live_children(&self) -> Vec<(String, Value)> {
        self.node
            .props
            .borrow()
            .iter()
            .filter_map(|(k, slot)| {
                slot.live()
                    .filter(|v| v.is_container())
                    .map(|v| (k.clone(), v.clone()))
            })
            .collect()
    }

    pub(crate) fn attach(&self, binding: &Binding, visited: &mut Visited) {
        if self.is_bound() || !visited.insert(self.addr()) {
            return;
        }
        if self.key().is_none() {
            self.node.key.set(binding.allocate_key());
        }
        *self.node.binding.borrow_mut() = Some(binding.clone());
        for (k, child) in self.live_children() {
            attach_inner(&child, &binding.child(&k), visited);
        }
    }

    pub(crate) fn rebind(&self, binding: &Binding, visited: &mut Visited) {
        if self.binding().is_some_and(|cur| !cur.same_scope(binding)) {
            return;
        }
        if !visited.insert(self.addr()) {
            return;
        }
        if self.key().is_none() {
            self.node.key.set(binding.allocate_key());
        }
        *self.node.binding.borrow_mut() = Some(binding.clone());
        for (k, child) in self.live_children() {
            rebind_inner(&child, &binding.child(&k), visited);
        }
    }

    pub(crate) fn detach(&self, scope: &Binding, visited: &mut Visited) {
        if !self.binding().is_some_and(|cur| cur.same_scope(scope)) {
            return;
        }
        if !visited.insert(self.addr()) {
            return;
        }
        *self.node.binding.borrow_mut() = None;
        for (_, child) in self.live_children() {
            detach_inner(&child, scope, visited);
        }
    }
}

impl Default for ObservableObject {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObservableObject {
    // Property values are omitted: object graphs may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableObject")
            .field("key", &self.key())
            .field("binding", &self.binding())
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::MutationSink;
    use crate::binding::testing::{RecordingSink, bind};
    use serde_json::json;

    fn bound(sink: &Rc<RecordingSink>, json: serde_json::Value) -> ObservableObject {
        bind(sink, "v", Value::from_json(json))
            .as_object()
            .cloned()
            .expect("object")
    }

    #[test]
    fn get_returns_identical_handle() {
        let sink = RecordingSink::new();
        let obj = bound(&sink, json!({"inner": {"x": 1}}));
        let first = obj.get("inner").unwrap();
        let second = obj.get("inner").unwrap();
        assert!(first.is_same(&second));
        assert!(first.as_object().unwrap().key().is_some());
        assert_eq!(first.as_object().unwrap().binding().unwrap().path(), "inner");
    }

    #[test]
    fn nested_objects_stay_raw_until_read() {
        let sink = RecordingSink::new();
        let before = {
            let _obj = bound(&sink, json!({"a": {"b": {"c": 1}}}));
            sink.allocate_key().raw()
        };
        // Only the root consumed a key before the probe above.
        assert_eq!(before, 2);
    }

    #[test]
    fn set_emits_modified_with_path_and_old_value() {
        let sink = RecordingSink::new();
        let obj = bound(&sink, json!({"user": {"name": "John"}}));
        let user = obj.get("user").unwrap();
        user.as_object().unwrap().set("name", "Jane");

        let records = sink.take();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.variable, "v");
        assert_eq!(r.action, Action::Modified);
        assert_eq!(r.property.as_deref(), Some("name"));
        assert_eq!(r.path, "user.name");
        assert_eq!(r.old_value.as_ref().and_then(Value::as_str), Some("John"));
    }

    #[test]
    fn set_identical_value_is_silent() {
        let sink = RecordingSink::new();
        let obj = bound(&sink, json!({"a": 1, "o": {}}));
        assert!(!obj.set("a", 1));
        let inner = obj.get("o").unwrap();
        assert!(!obj.set("o", inner));
        assert!(sink.take().is_empty());
    }

    #[test]
    fn key_survives_mutation() {
        let sink = RecordingSink::new();
        let obj = bound(&sink, json!({"name": "a"}));
        let key = obj.key();
        for i in 0..10 {
            obj.set("name", format!("n{i}"));
        }
        assert_eq!(obj.key(), key);
    }

    #[test]
    fn delete_emits_removed_only_for_existing() {
        let sink = RecordingSink::new();
        let obj = bound(&sink, json!({"a": 1}));
        assert_eq!(obj.delete("missing"), None);
        assert!(sink.take().is_empty());

        let old = obj.delete("a");
        assert_eq!(old.and_then(|v| v.as_f64()), Some(1.0));
        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, Action::Removed);
        assert_eq!(records[0].path, "a");
    }

    #[test]
    fn replaced_child_stops_reporting() {
        let sink = RecordingSink::new();
        let user = bound(&sink, json!({"address": {"city": "a"}}));
        let old = user.get("address").unwrap().as_object().cloned().unwrap();
        user.set("address", ObservableObject::from_pairs([("city", "b")]));
        assert_eq!(sink.take().len(), 1);
        assert!(old.binding().is_none());

        old.set("city", "ghost");
        assert!(sink.take().is_empty());
        let current = user.get("address").unwrap().as_object().cloned().unwrap();
        assert_eq!(current.binding().unwrap().path(), "address");
    }

    #[test]
    fn deleted_child_stops_reporting() {
        let sink = RecordingSink::new();
        let user = bound(&sink, json!({"address": {"city": "a", "tags": ["x"]}}));
        let address = user.get("address").unwrap().as_object().cloned().unwrap();
        let tags = address.get("tags").unwrap().as_array().cloned().unwrap();
        user.delete("address");
        assert_eq!(sink.take().len(), 1);

        address.set("city", "ghost");
        tags.push("y");
        assert!(sink.take().is_empty());
        assert!(tags.binding().is_none());
    }

    #[test]
    fn moved_child_survives_its_old_slot_being_replaced() {
        let sink = RecordingSink::new();
        let obj = bound(&sink, json!({"a": {"x": 1}}));
        let child = obj.get("a").unwrap();
        obj.set("b", child.clone());
        obj.set("a", 2);
        sink.take();

        child.as_object().unwrap().set("x", 3);
        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "b.x");
    }

    #[test]
    fn promoting_a_grandchild_keeps_it_bound() {
        let sink = RecordingSink::new();
        let obj = bound(&sink, json!({"a": {"inner": {"x": 1}}}));
        let outer = obj.get("a").unwrap();
        let inner = outer.as_object().unwrap().get("inner").unwrap();
        obj.set("a", inner.clone());
        sink.take();

        assert!(outer.as_object().unwrap().binding().is_none());
        inner.as_object().unwrap().set("x", 2);
        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "a.x");
    }

    #[test]
    fn deleted_child_can_join_another_variable() {
        let sink = RecordingSink::new();
        let first = bound(&sink, json!({"address": {"city": "a"}}));
        let address = first.get("address").unwrap();
        first.delete("address");
        sink.take();

        let second = bind(&sink, "w", Value::Object(ObservableObject::new()));
        second.as_object().unwrap().set("home", address.clone());
        sink.take();
        address.as_object().unwrap().set("city", "b");
        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].variable, "w");
        assert_eq!(records[0].path, "home.city");
    }

    #[test]
    fn get_reports_qualified_tokens() {
        let sink = RecordingSink::new();
        let obj = bound(&sink, json!({"a": {"b": 1}}));
        let _ = obj.get("a").unwrap().as_object().unwrap().get("b");
        let reads = sink.reads.borrow().clone();
        assert_eq!(reads, vec!["v.a".to_owned(), "v.a.b".to_owned()]);
    }

    #[test]
    fn unbound_objects_do_not_record() {
        let sink = RecordingSink::new();
        let obj = ObservableObject::from_pairs([("a", 1)]);
        obj.set("a", 2);
        obj.delete("a");
        assert!(sink.take().is_empty());
        assert!(obj.key().is_none());
    }

    #[test]
    fn cyclic_snapshot_fails_cleanly() {
        let obj = ObservableObject::new();
        obj.set("self", obj.clone());
        assert!(matches!(obj.to_json(), Err(ValueError::Cycle { .. })));
    }

    #[test]
    fn shared_subtree_is_not_a_cycle() {
        let shared = ObservableObject::from_pairs([("x", 1)]);
        let obj = ObservableObject::from_pairs([("a", shared.clone()), ("b", shared)]);
        assert_eq!(obj.to_json().unwrap(), json!({"a": {"x": 1}, "b": {"x": 1}}));
    }
}
