#![forbid(unsafe_code)]

//! The store: a registry of named root variables.
//!
//! # Architecture
//!
//! [`Store`] is a cheap, clonable handle over shared single-threaded state
//! (`Rc` + `RefCell`, so it is `!Send`). The shared state implements
//! [`MutationSink`]: every bound value reports its mutations and reads back
//! to it. Mutations are applied synchronously; their records are queued per
//! variable, and delivery happens when the host calls [`Store::tick`] or
//! [`Store::run_until_idle`].
//!
//! A flush of one variable runs, in order:
//!
//! 1. persistence write (persisted variables only);
//! 2. deduplication of the queued records;
//! 3. subscriber delivery;
//! 4. recomputation of affected computed properties;
//! 5. view projection of the variable.
//!
//! # Invariants
//!
//! 1. At most one flush is armed per variable.
//! 2. A computed property's dependencies are the reads of its last
//!    evaluation.
//! 3. Assigning a variable its current value records nothing.
//! 4. A computed result identical to the previous one notifies nobody.
//!
//! # Failure Modes
//!
//! - **Subscriber panics**: logged at `error`; siblings still run.
//! - **Derivation panics**: logged at `error`; the previous value stays.
//! - **Storage fails**: logged at `warn`; the in-memory value stands.
//! - **Deferred source fails**: logged at `error`; the variable stays unset.
//! - **Expression fails**: logged at `warn`; the node is hidden and gets no
//!   classes.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use indexmap::IndexMap;
use resonant_core::{
    Action, Binding, ExpressionEvaluator, ItemKey, KeyAllocator, MutationError, MutationRecord,
    MutationSink, ObservableObject, RestrictedEvaluator, Value, detach, path, wrap,
};
use serde_json::Value as Json;
use tracing::{debug, debug_span, error, trace, warn};

use crate::bus::{Bus, Callback, Subscription, panic_message};
use crate::config::StoreConfig;
use crate::error::{Result, SourceError, StoreError};
use crate::persist::{MemoryStorage, Persistence, Storage};
use crate::project::{Model, Projector};
use crate::scheduler::{Batch, Scheduler, dedupe};
use crate::source::{self, PendingSource};
use crate::tracker::{Derivation, Tracker};
use crate::view::{ClickAction, InputValue, NodeId, ViewProvider, ancestors};

/// Named click handler: receives the store and the clicked item, if any.
pub type Handler = dyn Fn(&Store, Option<&Value>);

struct Entry {
    value: Value,
    persist: bool,
}

struct StoreInner {
    config: StoreConfig,
    data: RefCell<IndexMap<String, Entry>>,
    scheduler: RefCell<Scheduler>,
    bus: Bus,
    tracker: Tracker,
    keys: KeyAllocator,
    persistence: RefCell<Persistence>,
    evaluator: RefCell<Rc<dyn ExpressionEvaluator>>,
    projector: RefCell<Option<Rc<Projector>>>,
    sources: RefCell<Vec<PendingSource>>,
    handlers: RefCell<AHashMap<String, Rc<Handler>>>,
}

impl MutationSink for StoreInner {
    fn emit(&self, record: MutationRecord) {
        trace!(
            variable = %record.variable,
            action = record.action.as_str(),
            path = %record.path,
            "mutation queued"
        );
        self.scheduler.borrow_mut().enqueue(record);
    }

    fn track(&self, root: &str, token: &str) {
        self.tracker.record(root, token);
    }

    fn allocate_key(&self) -> ItemKey {
        self.keys.allocate()
    }
}

/// Handle to a reactive store. Clones share the same store.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

/// Non-owning store handle, for callbacks that must not keep the store
/// alive.
#[derive(Clone)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    #[must_use]
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("variables", &self.names())
            .field("armed", &self.inner.scheduler.borrow().armed())
            .finish_non_exhaustive()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    // -- construction --------------------------------------------------------

    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        let persistence = Persistence::new(
            Rc::new(MemoryStorage::new()),
            config.storage_prefix.clone(),
        );
        Self {
            inner: Rc::new(StoreInner {
                config,
                data: RefCell::default(),
                scheduler: RefCell::default(),
                bus: Bus::default(),
                tracker: Tracker::default(),
                keys: KeyAllocator::default(),
                persistence: RefCell::new(persistence),
                evaluator: RefCell::new(Rc::new(RestrictedEvaluator::new())),
                projector: RefCell::new(None),
                sources: RefCell::default(),
                handlers: RefCell::default(),
            }),
        }
    }

    /// Use `storage` for persisted variables registered from now on.
    #[must_use]
    pub fn with_storage(self, storage: Rc<dyn Storage>) -> Self {
        self.inner.persistence.borrow_mut().set_storage(storage);
        self
    }

    #[must_use]
    pub fn with_evaluator(self, evaluator: Rc<dyn ExpressionEvaluator>) -> Self {
        *self.inner.evaluator.borrow_mut() = evaluator;
        self
    }

    /// Attach a view and render every variable into it.
    pub fn attach_view(&self, view: Rc<dyn ViewProvider>) {
        *self.inner.projector.borrow_mut() = Some(Rc::new(Projector::new(view)));
        for name in self.names() {
            self.render(&name, &[String::new()]);
        }
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn sink(&self) -> Rc<dyn MutationSink> {
        self.inner.clone()
    }

    // -- registration --------------------------------------------------------

    /// Register (or re-register) a variable and render it.
    ///
    /// Re-registering keeps the variable's subscribers; the old value stops
    /// reporting mutations.
    pub fn add(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.register(name, value.into(), false)
    }

    /// Register a persisted variable. A readable stored snapshot wins over
    /// `value`; otherwise `value` is written to storage.
    pub fn add_persistent(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.register(name, value.into(), true)
    }

    pub fn add_all<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in entries {
            self.add(name.as_ref(), value)?;
        }
        Ok(())
    }

    /// Register a variable once `future` resolves. Until then it is unset.
    pub fn add_deferred<F, E>(&self, name: &str, future: F, persist: bool)
    where
        F: Future<Output = std::result::Result<Json, E>> + 'static,
        E: Into<SourceError>,
    {
        debug!(variable = name, persist, "deferred source registered");
        self.inner
            .sources
            .borrow_mut()
            .push(PendingSource::new(name, persist, future));
    }

    /// Register a computed property.
    ///
    /// The derivation runs immediately; every store read it makes becomes a
    /// dependency. It runs again after a flush touches a dependency.
    pub fn computed(&self, name: &str, derive: impl Fn(&Store) -> Value + 'static) -> Result<()> {
        let derivation: Rc<Derivation> = Rc::new(derive);
        self.inner.tracker.register(name, derivation);
        let value = self.evaluate(name).unwrap_or_default();
        let value = wrap(value, name, "", &self.sink());
        let old = self.inner.data.borrow_mut().insert(
            name.to_owned(),
            Entry {
                value: value.clone(),
                persist: false,
            },
        );
        if let Some(old) = old {
            self.discard(name, &old.value, &value);
        }
        self.render(name, &[String::new()]);
        Ok(())
    }

    fn register(&self, name: &str, value: Value, persist: bool) -> Result<()> {
        if self.inner.tracker.is_computed(name) {
            warn!(variable = name, "cannot register over a computed property");
            return Err(StoreError::read_only(name));
        }
        let value = if persist {
            let json = value.to_json()?;
            let restored = self.inner.persistence.borrow().restore_or_seed(name, Some(&json));
            restored.map_or(value, Value::from_json)
        } else {
            value
        };
        let value = wrap(value, name, "", &self.sink());
        let old = self
            .inner
            .data
            .borrow_mut()
            .insert(name.to_owned(), Entry {
                value: value.clone(),
                persist,
            });
        if let Some(old) = old {
            self.discard(name, &old.value, &value);
        }
        debug!(variable = name, persist, "variable registered");
        self.render(name, &[String::new()]);
        Ok(())
    }

    /// Stop a replaced root value from reporting to this store.
    fn discard(&self, name: &str, old: &Value, new: &Value) {
        if old.is_container() && !old.is_same(new) {
            detach(old, &Binding::new(name, "", &self.sink()));
        }
    }

    // -- reads ---------------------------------------------------------------

    /// Current value of a root variable. Inside a derivation, records a
    /// dependency on it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.tracker.record(name, name);
        self.peek(name)
    }

    /// Value at a fully-qualified dot-path (`"todos.0.title"`).
    #[must_use]
    pub fn get_path(&self, qualified: &str) -> Option<Value> {
        let (root, rel) = path::split_root(qualified);
        let mut current = self.get(root)?;
        for segment in path::segments(rel) {
            current = child(&current, segment)?;
        }
        Some(current)
    }

    /// Current value without recording a dependency.
    #[must_use]
    pub fn peek(&self, name: &str) -> Option<Value> {
        self.inner.data.borrow().get(name).map(|e| e.value.clone())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.data.borrow().contains_key(name)
    }

    /// Registered variable names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner.data.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn is_computed(&self, name: &str) -> bool {
        self.inner.tracker.is_computed(name)
    }

    /// Dependency tokens recorded by the last evaluation of `name`.
    #[must_use]
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        self.inner.tracker.dependencies(name)
    }

    /// JSON object of every variable. Cyclic values are skipped.
    #[must_use]
    pub fn snapshot(&self) -> Json {
        let data = self.inner.data.borrow();
        let mut out = serde_json::Map::with_capacity(data.len());
        for (name, entry) in data.iter() {
            match entry.value.to_json() {
                Ok(json) => {
                    out.insert(name.clone(), json);
                }
                Err(e) => warn!(variable = %name, error = %e, "skipping variable in snapshot"),
            }
        }
        Json::Object(out)
    }

    // -- writes --------------------------------------------------------------

    /// Replace a root variable's value.
    ///
    /// An identical value is a no-op. Otherwise the old value is detached,
    /// the new one bound, and one `modified` record queued.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        if self.inner.tracker.is_computed(name) {
            warn!(variable = name, "computed property is read-only; assignment ignored");
            return Err(StoreError::read_only(name));
        }
        let old = self.peek(name).ok_or_else(|| StoreError::unknown(name))?;
        let value = value.into();
        if old.is_same(&value) {
            return Ok(());
        }
        let sink = self.sink();
        if old.is_container() {
            detach(&old, &Binding::new(name, "", &sink));
        }
        let value = wrap(value, name, "", &sink);
        if let Some(entry) = self.inner.data.borrow_mut().get_mut(name) {
            entry.value = value.clone();
        }
        self.inner.emit(
            MutationRecord::new(name, Action::Modified)
                .with_item(value)
                .with_old_value(Some(old)),
        );
        Ok(())
    }

    /// Assign the value at a fully-qualified dot-path.
    ///
    /// Missing or null intermediate properties become empty objects; array
    /// segments must be valid indices.
    pub fn set_path(&self, qualified: &str, value: impl Into<Value>) -> Result<()> {
        let (root, rel) = path::split_root(qualified);
        if rel.is_empty() {
            return self.set(root, value);
        }
        if self.inner.tracker.is_computed(root) {
            warn!(variable = root, "computed property is read-only; assignment ignored");
            return Err(StoreError::read_only(root));
        }
        let mut current = self.peek(root).ok_or_else(|| StoreError::unknown(root))?;
        let segments: Vec<&str> = path::segments(rel).collect();
        let Some((last, parents)) = segments.split_last() else {
            return self.set(root, value);
        };
        let mut walked = root.to_owned();
        for segment in parents {
            current = step_or_create(&current, segment, &walked)?;
            walked = path::join(&walked, segment);
        }
        match &current {
            Value::Object(o) => {
                o.set(last, value);
            }
            Value::Array(a) => {
                let index = array_index(last, &walked)?;
                a.set(index, value);
            }
            _ => return Err(MutationError::NotAContainer { path: walked }.into()),
        }
        Ok(())
    }

    // -- subscriptions -------------------------------------------------------

    /// Subscribe to `name`'s delivered records until the guard drops.
    pub fn subscribe(
        &self,
        name: &str,
        callback: impl Fn(&Value, Option<&Value>, Action) + 'static,
    ) -> Subscription {
        let callback: Rc<Callback> = Rc::new(callback);
        self.inner.bus.subscribe(name, callback)
    }

    /// Subscribe for the store's lifetime.
    pub fn add_callback(
        &self,
        name: &str,
        callback: impl Fn(&Value, Option<&Value>, Action) + 'static,
    ) {
        let callback: Rc<Callback> = Rc::new(callback);
        self.inner.bus.add_callback(name, callback);
    }

    /// Live callbacks for `name`. Dropped subscriptions are not counted.
    #[must_use]
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.inner.bus.listener_count(name)
    }

    // -- ticking -------------------------------------------------------------

    /// Poll deferred sources, then flush every variable armed when the tick
    /// started. Returns the number of flushes.
    pub fn tick(&self) -> usize {
        self.poll_sources();
        let armed = self.inner.scheduler.borrow().armed();
        let mut flushed = 0;
        for _ in 0..armed {
            let Some(batch) = self.inner.scheduler.borrow_mut().next_batch() else {
                break;
            };
            self.flush(batch);
            flushed += 1;
        }
        flushed
    }

    /// Tick until nothing is armed and no source made progress, at most
    /// `max_drain_ticks` times. Returns the number of ticks run.
    pub fn run_until_idle(&self) -> usize {
        let limit = self.inner.config.max_drain_ticks;
        let mut ticks = 0;
        while ticks < limit {
            let before = self.inner.sources.borrow().len();
            let flushed = self.tick();
            let resolved = before - self.inner.sources.borrow().len().min(before);
            ticks += 1;
            if flushed == 0 && resolved == 0 && self.inner.scheduler.borrow().is_idle() {
                return ticks;
            }
        }
        if !self.inner.scheduler.borrow().is_idle() {
            warn!(ticks, "drain limit reached with flushes still armed");
        }
        ticks
    }

    /// Whether a flush is armed or a deferred source is unresolved.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.inner.scheduler.borrow().is_idle() || !self.inner.sources.borrow().is_empty()
    }

    fn poll_sources(&self) {
        let resolved = {
            let mut sources = self.inner.sources.borrow_mut();
            if sources.is_empty() {
                return;
            }
            source::poll_all(&mut sources)
        };
        for (source, result) in resolved {
            match result {
                Ok(json) => {
                    let value = Value::from_json(json);
                    if let Err(e) = self.register(&source.name, value, source.persist) {
                        error!(
                            variable = %source.name,
                            error = %e,
                            "deferred source could not be registered"
                        );
                    }
                }
                Err(e) => error!(variable = %source.name, error = %e, "deferred source failed"),
            }
        }
    }

    fn flush(&self, batch: Batch) {
        let Batch {
            variable,
            records,
            changed,
        } = batch;
        let span = debug_span!("resonant.flush", variable = %variable, records = records.len());
        let _entered = span.enter();

        // 1. Persist.
        let persisted = self
            .inner
            .data
            .borrow()
            .get(&variable)
            .filter(|e| e.persist)
            .map(|e| e.value.clone());
        if let Some(value) = persisted {
            match value.to_json() {
                Ok(json) => self.inner.persistence.borrow().write(&variable, &json),
                Err(e) => warn!(error = %e, "persistence skipped; value is not serializable"),
            }
        }

        // 2-3. Dedupe and deliver.
        let records = dedupe(records);
        let synthetic = self.inner.tracker.is_computed(&variable)
            && records
                .iter()
                .all(|r| r.action == Action::Modified && r.path.is_empty());
        for record in &records {
            let item = record.subject().cloned().unwrap_or_default();
            let current = self.peek(&variable);
            self.inner
                .bus
                .deliver(&variable, &item, current.as_ref(), record.action);
        }

        // 4. Recompute.
        for name in self.inner.tracker.affected(&variable, &changed) {
            self.recompute(&name);
        }

        // 5. Project. A recomputed value was rendered when it changed.
        if !synthetic {
            self.render(&variable, &changed);
        }
    }

    /// Run `name`'s derivation under the dependency tracker.
    fn evaluate(&self, name: &str) -> Option<Value> {
        let derivation = self.inner.tracker.derivation(name)?;
        let result = {
            let _guard = self.inner.tracker.begin(name);
            catch_unwind(AssertUnwindSafe(|| derivation(self)))
        };
        match result {
            Ok(value) => Some(value),
            Err(payload) => {
                error!(
                    computed = name,
                    panic = panic_message(payload.as_ref()),
                    "derivation panicked; keeping previous value"
                );
                None
            }
        }
    }

    fn recompute(&self, name: &str) {
        let Some(value) = self.evaluate(name) else {
            return;
        };
        let value = wrap(value, name, "", &self.sink());
        let old = {
            let mut data = self.inner.data.borrow_mut();
            let Some(entry) = data.get_mut(name) else {
                return;
            };
            std::mem::replace(&mut entry.value, value.clone())
        };
        trace!(computed = name, "recomputed");
        if old.is_same(&value) {
            return;
        }
        self.discard(name, &old, &value);
        self.render(name, &[String::new()]);
        self.inner.emit(
            MutationRecord::new(name, Action::Modified)
                .with_item(value)
                .with_old_value(Some(old)),
        );
    }

    // -- view ----------------------------------------------------------------

    fn projector(&self) -> Option<Rc<Projector>> {
        self.inner.projector.borrow().clone()
    }

    fn render(&self, name: &str, changed: &[String]) {
        if let Some(projector) = self.projector() {
            projector.project(self, name, changed);
        }
    }

    /// Write an edited input's value to the path it shows and queue the
    /// mutation.
    pub fn commit_input(&self, node: NodeId, input: InputValue) -> Result<()> {
        let projector = self.projector().ok_or(StoreError::NoView)?;
        let view = projector.view();
        let path = projector
            .input_path(node)
            .or_else(|| {
                view.render_meta(node)
                    .is_none()
                    .then(|| view.binding(node))
                    .flatten()
            })
            .ok_or(StoreError::UnboundNode { node })?;
        let value = match input {
            InputValue::Text(text) => Value::String(text),
            InputValue::Number(n) => n.map_or(Value::Null, Value::Number),
            InputValue::Checked(checked) => Value::Bool(checked),
        };
        self.set_path(&path, value)
    }

    /// Register a named click handler.
    pub fn register_action(&self, name: &str, handler: impl Fn(&Store, Option<&Value>) + 'static) {
        let handler: Rc<Handler> = Rc::new(handler);
        self.inner
            .handlers
            .borrow_mut()
            .insert(name.to_owned(), handler);
    }

    /// Dispatch a click on `node`. Returns whether an action ran.
    pub fn click(&self, node: NodeId) -> Result<bool> {
        let projector = self.projector().ok_or(StoreError::NoView)?;
        let view = projector.view();
        let Some((target, action)) =
            ancestors(view, node).find_map(|n| view.click_action(n).map(|a| (n, a)))
        else {
            return Ok(false);
        };
        let context = projector.context_of(target);
        let item = context.as_deref().and_then(|p| self.lookup(p));

        match action {
            ClickAction::Handler(name) => {
                let handler = self.inner.handlers.borrow().get(&name).cloned();
                let Some(handler) = handler else {
                    warn!(handler = %name, "click handler not registered");
                    return Ok(false);
                };
                let result = catch_unwind(AssertUnwindSafe(|| handler(self, item.as_ref())));
                if let Err(payload) = result {
                    error!(
                        handler = %name,
                        panic = panic_message(payload.as_ref()),
                        "click handler panicked"
                    );
                }
                Ok(true)
            }
            ClickAction::RemoveBy(prop) => {
                let Some(item_path) = context else {
                    return Ok(false);
                };
                let Some((list_path, last)) = item_path.rsplit_once('.') else {
                    return Ok(false);
                };
                if path::parse_index(last).is_none() {
                    return Ok(false);
                }
                let Some(Value::Array(list)) = self.lookup(list_path) else {
                    return Ok(false);
                };
                let Some(needle) = item
                    .as_ref()
                    .and_then(Value::as_object)
                    .and_then(|o| o.get(&prop))
                else {
                    return Ok(false);
                };
                let found = list.position(|candidate| {
                    candidate
                        .as_object()
                        .and_then(|o| o.get(&prop))
                        .is_some_and(|v| v.is_same(&needle))
                });
                match found {
                    Some(index) => {
                        list.splice(index, 1, Vec::<Value>::new());
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    }

    /// Untracked lookup of a fully-qualified path.
    fn lookup(&self, qualified: &str) -> Option<Value> {
        let (root, rel) = path::split_root(qualified);
        let mut current = self.peek(root)?;
        for segment in path::segments(rel) {
            current = child(&current, segment)?;
        }
        Some(current)
    }
}

impl Model for Store {
    fn lookup(&self, qualified: &str) -> Option<Value> {
        Store::lookup(self, qualified)
    }

    fn state(&self) -> Json {
        self.snapshot()
    }

    fn evaluator(&self) -> Rc<dyn ExpressionEvaluator> {
        Rc::clone(&self.inner.evaluator.borrow())
    }

    fn key_separator(&self) -> &str {
        &self.inner.config.nested_key_separator
    }
}

fn child(value: &Value, segment: &str) -> Option<Value> {
    match value {
        Value::Object(o) => o.get(segment),
        Value::Array(a) => a.get(path::parse_index(segment)?),
        _ => None,
    }
}

fn array_index(segment: &str, at: &str) -> Result<usize> {
    path::parse_index(segment).ok_or_else(|| {
        MutationError::InvalidIndex {
            path: at.to_owned(),
            segment: segment.to_owned(),
        }
        .into()
    })
}

/// Step into `segment`, creating an empty object where it is missing or null.
fn step_or_create(current: &Value, segment: &str, at: &str) -> Result<Value> {
    let existing = match current {
        Value::Object(o) => o.get(segment),
        Value::Array(a) => {
            let index = array_index(segment, at)?;
            a.get(index)
        }
        _ => {
            return Err(MutationError::NotAContainer { path: at.to_owned() }.into());
        }
    };
    match existing {
        Some(next) if next.is_container() => Ok(next),
        Some(next) if !next.is_null() => Err(MutationError::NotAContainer {
            path: path::join(at, segment),
        }
        .into()),
        _ => {
            let fresh = Value::Object(ObservableObject::new());
            let created = match current {
                Value::Object(o) => {
                    o.set(segment, fresh);
                    o.get(segment)
                }
                Value::Array(a) => {
                    let index = array_index(segment, at)?;
                    a.set(index, fresh);
                    a.get(index)
                }
                _ => None,
            };
            created.ok_or_else(|| MutationError::NotAContainer { path: at.to_owned() }.into())
        }
    }
}
