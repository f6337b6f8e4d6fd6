#![forbid(unsafe_code)]

//! Observable arrays.
//!
//! An [`ObservableArray`] is a shared handle over a sequence of values. When
//! bound, every direct item is wrapped eagerly and the array keeps a shadow
//! snapshot of per-index identity keys, refreshed by every tracked operation
//! and by [`ObservableArray::force_update`].
//!
//! Structural operations report removed items at their pre-mutation index
//! and inserted items at their post-mutation index, then re-base the paths
//! of every item that moved. Arrays nested below the root value report
//! `added`, `removed` and `updated` as `modified`.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use tracing::{debug, trace};

use crate::binding::{
    Binding, Visited, attach_inner, detach_inner, place, rebind_inner, release,
};
use crate::error::{MutationError, ValueError};
use crate::key::ItemKey;
use crate::path;
use crate::record::{Action, MutationRecord};
use crate::value::{Slot, Value, child_path, enter};

/// Largest length accepted by [`ObservableArray::set_len`].
const MAX_LEN: f64 = u32::MAX as f64;

struct ArrayNode {
    binding: RefCell<Option<Binding>>,
    items: RefCell<Vec<Slot>>,
    shadow: RefCell<Vec<Option<ItemKey>>>,
}

/// Shared handle to an observable array.
#[derive(Clone)]
pub struct ObservableArray {
    node: Rc<ArrayNode>,
}

fn identity_of(value: &Value) -> Option<ItemKey> {
    value.as_object().and_then(|o| o.key())
}

impl ObservableArray {
    /// An empty, unbound array.
    #[must_use]
    pub fn new() -> Self {
        Self::from_slots(Vec::new())
    }

    pub fn from_values<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::from_slots(items.into_iter().map(|v| Slot::Live(v.into())).collect())
    }

    pub(crate) fn from_json_items(items: Vec<serde_json::Value>) -> Self {
        Self::from_slots(items.into_iter().map(Slot::from_json).collect())
    }

    fn from_slots(items: Vec<Slot>) -> Self {
        Self {
            node: Rc::new(ArrayNode {
                binding: RefCell::new(None),
                items: RefCell::new(items),
                shadow: RefCell::new(Vec::new()),
            }),
        }
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

    // -- reads ---------------------------------------------------------------

    /// Number of items. Reports a read of the array path.
    #[must_use]
    pub fn len(&self) -> usize {
        self.track_self();
        self.node.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one item. Reports a read of `path.index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        let binding = self.binding();
        if let Some(b) = &binding {
            b.track(&path::join_index(b.path(), index));
        }
        let child = binding.as_ref().map(|b| b.child_index(index));
        let mut items = self.node.items.borrow_mut();
        let slot = items.get_mut(index)?;
        Some(slot.materialize(child.as_ref()))
    }

    /// All items, in order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.track_self();
        self.materialized()
    }

    pub fn iter(&self) -> std::vec::IntoIter<Value> {
        self.to_vec().into_iter()
    }

    /// Index of the first item matching `pred`.
    pub fn position(&self, mut pred: impl FnMut(&Value) -> bool) -> Option<usize> {
        self.to_vec().iter().position(|v| pred(v))
    }

    /// Whether the array holds `value` (identity for containers).
    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.to_vec().iter().any(|v| v.is_same(value))
    }

    /// Shadow snapshot of per-index identity keys.
    ///
    /// Primitive items have no key. The snapshot only follows tracked
    /// operations; after [`untracked`](Self::untracked) it is stale until
    /// [`force_update`](Self::force_update).
    #[must_use]
    pub fn identity_keys(&self) -> Vec<Option<ItemKey>> {
        self.node.shadow.borrow().clone()
    }

    // -- tracked mutations ---------------------------------------------------

    /// Assign `items[index]`. Writing past the end fills the gap with
    /// `null`. Returns `false` when the value is identical to the current one.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> bool {
        let value = value.into();
        let old = self.node.items.borrow().get(index).map(Slot::peek);
        if old.as_ref().is_some_and(|old| old.is_same(&value)) {
            return false;
        }
        let binding = self.binding();
        if let (Some(b), Some(old)) = (&binding, &old) {
            release(old, &b.child_index(index));
        }
        let value = self.bind_at(value, index, binding.as_ref());
        {
            let mut items = self.node.items.borrow_mut();
            if index >= items.len() {
                items.resize_with(index, || Slot::Live(Value::Null));
                items.push(Slot::Live(value.clone()));
            } else {
                items[index] = Slot::Live(value.clone());
            }
        }
        self.refresh_shadow();
        if let Some(b) = &binding {
            b.emit(
                b.record(Action::Modified)
                    .with_item(value)
                    .with_old_value(old)
                    .with_index(index),
            );
        }
        true
    }

    /// Remove the item at `index`, closing the gap.
    pub fn delete(&self, index: usize) -> Option<Value> {
        if index >= self.node.items.borrow().len() {
            return None;
        }
        self.splice(index, 1, Vec::<Value>::new()).into_iter().next()
    }

    /// Append one item. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        self.extend([value.into()])
    }

    /// Append several items. Returns the new length.
    pub fn extend<T: Into<Value>>(&self, values: impl IntoIterator<Item = T>) -> usize {
        let start = self.node.items.borrow().len();
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.splice(start, 0, values);
        self.node.items.borrow().len()
    }

    pub fn pop(&self) -> Option<Value> {
        let len = self.node.items.borrow().len();
        let last = len.checked_sub(1)?;
        self.splice(last, 1, Vec::<Value>::new()).into_iter().next()
    }

    pub fn shift(&self) -> Option<Value> {
        if self.node.items.borrow().is_empty() {
            return None;
        }
        self.splice(0, 1, Vec::<Value>::new()).into_iter().next()
    }

    /// Insert items at the front. Returns the new length.
    pub fn unshift<T: Into<Value>>(&self, values: impl IntoIterator<Item = T>) -> usize {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.splice(0, 0, values);
        self.node.items.borrow().len()
    }

    /// Remove `delete_count` items at `start` and insert `values` there.
    ///
    /// `start` and `delete_count` are clamped to the array. Returns the
    /// removed items.
    pub fn splice<T: Into<Value>>(
        &self,
        start: usize,
        delete_count: usize,
        values: impl IntoIterator<Item = T>,
    ) -> Vec<Value> {
        let binding = self.binding();
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();

        let removed: Vec<Value> = {
            let mut items = self.node.items.borrow_mut();
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items
                .splice(start..end, std::iter::empty())
                .map(Slot::into_value)
                .collect()
        };
        let start = start.min(self.node.items.borrow().len());
        if let Some(b) = &binding {
            let mut visited = Visited::default();
            for old in &removed {
                detach_inner(old, b, &mut visited);
            }
        }

        let inserted: Vec<Value> = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| self.bind_at(v, start + i, binding.as_ref()))
            .collect();
        {
            let mut items = self.node.items.borrow_mut();
            items.splice(start..start, inserted.iter().cloned().map(Slot::Live));
        }

        if let Some(b) = &binding {
            if removed.len() != inserted.len() {
                self.rebase_from(start + inserted.len(), b);
            }
        }
        self.refresh_shadow();

        if let Some(b) = &binding {
            for (i, old) in removed.iter().enumerate() {
                b.emit(removed_record(b, start + i, old.clone()));
            }
            for (i, item) in inserted.into_iter().enumerate() {
                b.emit(added_record(b, start + i, item));
            }
        }
        removed
    }

    /// Set the length.
    ///
    /// Rejects negative, fractional and non-finite lengths without touching
    /// the array. Shrinking reports one `removed` per truncated item; growing
    /// pads with `null` and reports nothing.
    pub fn set_len(&self, len: f64) -> Result<(), MutationError> {
        if !(len.is_finite() && len >= 0.0 && len.fract() == 0.0 && len <= MAX_LEN) {
            debug!(len, "rejecting invalid array length");
            return Err(MutationError::InvalidLength(len));
        }
        let len = len as usize;
        let current = self.node.items.borrow().len();
        if len >= current {
            self.node
                .items
                .borrow_mut()
                .resize_with(len, || Slot::Live(Value::Null));
            self.refresh_shadow();
            return Ok(());
        }
        self.splice(len, current - len, Vec::<Value>::new());
        Ok(())
    }

    /// Sort in place. Reports nothing per item.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) {
        let mut values = self.materialized();
        values.sort_by(|a, b| compare(a, b));
        self.store_reordered(values);
    }

    /// Reverse in place. Reports nothing per item.
    pub fn reverse(&self) {
        let mut values = self.materialized();
        values.reverse();
        self.store_reordered(values);
    }

    /// Keep only items matching `pred`.
    ///
    /// Reports every old item as removed and every kept item as added, then
    /// one `updated` summary. Returns the kept items.
    pub fn filter_in_place(&self, mut pred: impl FnMut(&Value) -> bool) -> Vec<Value> {
        let kept: Vec<Value> = self.materialized().into_iter().filter(|v| pred(v)).collect();
        self.replace_contents(kept.clone());
        kept
    }

    /// Non-mutating filter that notifies subscribers with one `filtered`
    /// record.
    pub fn filtered(&self, mut pred: impl FnMut(&Value) -> bool) -> Vec<Value> {
        let result: Vec<Value> = self.to_vec().into_iter().filter(|v| pred(v)).collect();
        if let Some(b) = self.binding() {
            b.emit(b.record(Action::Filtered));
        }
        result
    }

    /// Replace the whole contents: every old item removed (from the end),
    /// every new item added, then one `updated` summary.
    pub fn replace<T: Into<Value>>(&self, values: impl IntoIterator<Item = T>) {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.replace_contents(values);
    }

    /// Resynchronize after edits made through [`untracked`](Self::untracked):
    /// bind new items, re-base every path, refresh the shadow keys, and
    /// report one `modified` record with no index.
    pub fn force_update(&self) {
        let Some(b) = self.binding() else {
            self.refresh_shadow();
            return;
        };
        let values = self.materialized();
        let mut visited = Visited::default();
        visited.insert(self.addr());
        for (i, value) in values.iter().enumerate() {
            let child = b.child_index(i);
            match value {
                Value::Object(o) if o.is_bound() => o.rebind(&child, &mut visited),
                Value::Array(a) if a.is_bound() => a.rebind(&child, &mut visited),
                other => attach_inner(other, &child, &mut visited),
            }
        }
        self.refresh_shadow();
        trace!(root = b.root(), path = b.path(), len = values.len(), "array resynchronized");
        b.emit(b.record(Action::Modified).with_item(Value::Array(self.clone())));
    }

    /// Edit the items directly. Nothing is bound, re-based or reported;
    /// call [`force_update`](Self::force_update) afterwards.
    pub fn untracked<R>(&self, edit: impl FnOnce(&mut Vec<Value>) -> R) -> R {
        let mut values = self.materialized();
        let result = edit(&mut values);
        *self.node.items.borrow_mut() = values.into_iter().map(Slot::Live).collect();
        result
    }

    // -- snapshots -----------------------------------------------------------

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
        let items = self.node.items.borrow();
        let mut out = Vec::with_capacity(items.len());
        for (i, slot) in items.iter().enumerate() {
            out.push(slot.to_json_inner(&child_path(at, &i.to_string()), stack)?);
        }
        stack.remove(&self.addr());
        Ok(serde_json::Value::Array(out))
    }

    // -- binding passes ------------------------------------------------------

    pub(crate) fn attach(&self, binding: &Binding, visited: &mut Visited) {
        if self.is_bound() || !visited.insert(self.addr()) {
            return;
        }
        *self.node.binding.borrow_mut() = Some(binding.clone());
        for (i, item) in self.materialized_with(Some(binding)).iter().enumerate() {
            attach_inner(item, &binding.child_index(i), visited);
        }
        self.refresh_shadow();
    }

    pub(crate) fn rebind(&self, binding: &Binding, visited: &mut Visited) {
        if self.binding().is_some_and(|cur| !cur.same_scope(binding)) {
            return;
        }
        if !visited.insert(self.addr()) {
            return;
        }
        *self.node.binding.borrow_mut() = Some(binding.clone());
        for (i, item) in self.materialized_with(Some(binding)).iter().enumerate() {
            rebind_inner(item, &binding.child_index(i), visited);
        }
        self.refresh_shadow();
    }

    pub(crate) fn detach(&self, scope: &Binding, visited: &mut Visited) {
        if !self.binding().is_some_and(|cur| cur.same_scope(scope)) {
            return;
        }
        if !visited.insert(self.addr()) {
            return;
        }
        *self.node.binding.borrow_mut() = None;
        let live: Vec<Value> = self
            .node
            .items
            .borrow()
            .iter()
            .filter_map(|slot| slot.live().filter(|v| v.is_container()).cloned())
            .collect();
        for item in &live {
            detach_inner(item, scope, visited);
        }
    }

    // -- internals -----------------------------------------------------------

    fn track_self(&self) {
        if let Some(b) = self.binding() {
            b.track(b.path());
        }
    }

    /// Materialize every item under the current binding.
    fn materialized(&self) -> Vec<Value> {
        let binding = self.binding();
        self.materialized_with(binding.as_ref())
    }

    fn materialized_with(&self, binding: Option<&Binding>) -> Vec<Value> {
        let mut out = Vec::new();
        let len = self.node.items.borrow().len();
        for i in 0..len {
            let child = binding.map(|b| b.child_index(i));
            let value = {
                let mut items = self.node.items.borrow_mut();
                match items.get_mut(i) {
                    Some(slot) => slot.materialize(child.as_ref()),
                    None => break,
                }
            };
            out.push(value);
        }
        out
    }

    fn bind_at(&self, value: Value, index: usize, binding: Option<&Binding>) -> Value {
        match binding {
            Some(b) => place(value, &b.child_index(index)),
            None => value,
        }
    }

    fn rebase_from(&self, from: usize, binding: &Binding) {
        let values = self.materialized();
        let mut visited = Visited::default();
        visited.insert(self.addr());
        for (i, value) in values.iter().enumerate().skip(from) {
            rebind_inner(value, &binding.child_index(i), &mut visited);
        }
    }

    fn refresh_shadow(&self) {
        let keys: Vec<Option<ItemKey>> = self
            .node
            .items
            .borrow()
            .iter()
            .map(|slot| slot.live().and_then(identity_of))
            .collect();
        *self.node.shadow.borrow_mut() = keys;
    }

    fn store_reordered(&self, values: Vec<Value>) {
        *self.node.items.borrow_mut() = values.into_iter().map(Slot::Live).collect();
        if let Some(b) = self.binding() {
            self.rebase_from(0, &b);
        }
        self.refresh_shadow();
    }

    fn replace_contents(&self, values: Vec<Value>) {
        let binding = self.binding();
        let old = self.materialized();
        self.node.items.borrow_mut().clear();
        if let Some(b) = &binding {
            let mut visited = Visited::default();
            for value in &old {
                detach_inner(value, b, &mut visited);
            }
        }
        let inserted: Vec<Value> = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| self.bind_at(v, i, binding.as_ref()))
            .collect();
        *self.node.items.borrow_mut() = inserted.iter().cloned().map(Slot::Live).collect();
        self.refresh_shadow();

        if let Some(b) = &binding {
            for (i, value) in old.into_iter().enumerate().rev() {
                b.emit(removed_record(b, i, value));
            }
            for (i, value) in inserted.into_iter().enumerate() {
                b.emit(added_record(b, i, value));
            }
            b.emit(
                b.record(nested_action(b, Action::Updated))
                    .with_item(Value::Array(self.clone())),
            );
        }
    }
}

fn removed_record(b: &Binding, index: usize, old: Value) -> MutationRecord {
    b.record(nested_action(b, Action::Removed))
        .with_old_value(Some(old))
        .with_index(index)
}

fn added_record(b: &Binding, index: usize, item: Value) -> MutationRecord {
    b.record(nested_action(b, Action::Added))
        .with_item(item)
        .with_index(index)
}

/// Arrays below the root report structural changes as `modified`.
fn nested_action(binding: &Binding, action: Action) -> Action {
    match action {
        Action::Added | Action::Removed | Action::Updated if binding.is_nested() => {
            Action::Modified
        }
        other => other,
    }
}

impl Default for ObservableArray {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObservableArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableArray")
            .field("binding", &self.binding())
            .field("len", &self.node.items.borrow().len())
            .finish()
    }
}
