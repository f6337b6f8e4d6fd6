#![forbid(unsafe_code)]

//! Dynamic dependency tracking for computed properties.
//!
//! One slot names the computed property currently evaluating. While it is
//! occupied, every read reported through the mutation sink records two
//! tokens for that property: the bare root name and the fully-qualified
//! dot-path.
//!
//! # Invariants
//!
//! 1. A dependency set reflects only the most recent evaluation: it is
//!    cleared when an [`EvalGuard`] is opened for the property.
//! 2. The slot is restored to its previous occupant when the guard drops,
//!    including during unwinding.
//! 3. [`Tracker::affected`] lists computed properties in registration order.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;
use resonant_core::Value;
use resonant_core::path;

use crate::store::Store;

/// A computed property's derivation.
pub type Derivation = dyn Fn(&Store) -> Value;

#[derive(Default)]
pub(crate) struct Tracker {
    current: RefCell<Option<String>>,
    deps: RefCell<AHashMap<String, AHashSet<String>>>,
    derivations: RefCell<IndexMap<String, Rc<Derivation>>>,
}

/// Occupies the "currently evaluating" slot until dropped.
pub(crate) struct EvalGuard<'a> {
    tracker: &'a Tracker,
    previous: Option<String>,
}

impl Drop for EvalGuard<'_> {
    fn drop(&mut self) {
        *self.tracker.current.borrow_mut() = self.previous.take();
    }
}

impl Tracker {
    pub(crate) fn register(&self, name: &str, derivation: Rc<Derivation>) {
        self.derivations
            .borrow_mut()
            .insert(name.to_owned(), derivation);
    }

    pub(crate) fn is_computed(&self, name: &str) -> bool {
        self.derivations.borrow().contains_key(name)
    }

    pub(crate) fn derivation(&self, name: &str) -> Option<Rc<Derivation>> {
        self.derivations.borrow().get(name).cloned()
    }

    /// Start evaluating `name`: clear its dependencies and occupy the slot.
    pub(crate) fn begin(&self, name: &str) -> EvalGuard<'_> {
        self.deps.borrow_mut().insert(name.to_owned(), AHashSet::new());
        let previous = self.current.borrow_mut().replace(name.to_owned());
        EvalGuard {
            tracker: self,
            previous,
        }
    }

    /// Record a read by the computed property currently evaluating.
    pub(crate) fn record(&self, root: &str, token: &str) {
        let current = self.current.borrow();
        let Some(name) = current.as_deref() else {
            return;
        };
        let mut deps = self.deps.borrow_mut();
        let set = deps.entry(name.to_owned()).or_default();
        set.insert(root.to_owned());
        set.insert(token.to_owned());
    }

    pub(crate) fn dependencies(&self, name: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .deps
            .borrow()
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Computed properties that read `variable` or a path under one of
    /// `changed` (relative paths of `variable`).
    pub(crate) fn affected(&self, variable: &str, changed: &[String]) -> Vec<String> {
        let tokens: Vec<String> = changed
            .iter()
            .map(|p| path::qualify(variable, p))
            .collect();
        let deps = self.deps.borrow();
        self.derivations
            .borrow()
            .keys()
            .filter(|name| name.as_str() != variable)
            .filter(|name| {
                deps.get(name.as_str()).is_some_and(|set| {
                    set.contains(variable)
                        || set
                            .iter()
                            .any(|dep| tokens.iter().any(|t| path::is_within(dep, t)))
                })
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derivation(f: impl Fn(&Store) -> Value + 'static) -> Rc<Derivation> {
        Rc::new(f)
    }

    #[test]
    fn guard_restores_previous_occupant() {
        let tracker = Tracker::default();
        {
            let _outer = tracker.begin("outer");
            {
                let _inner = tracker.begin("inner");
                tracker.record("a", "a");
            }
            tracker.record("b", "b.x");
        }
        tracker.record("c", "c");
        assert_eq!(tracker.dependencies("inner"), vec!["a"]);
        assert_eq!(tracker.dependencies("outer"), vec!["b", "b.x"]);
        assert!(tracker.dependencies("c").is_empty());
    }

    #[test]
    fn begin_clears_previous_dependencies() {
        let tracker = Tracker::default();
        {
            let _g = tracker.begin("total");
            tracker.record("a", "a");
        }
        {
            let _g = tracker.begin("total");
            tracker.record("b", "b");
        }
        assert_eq!(tracker.dependencies("total"), vec!["b"]);
    }

    #[test]
    fn affected_matches_root_or_changed_subpath() {
        let tracker = Tracker::default();
        let noop = derivation(|_| Value::Null);
        for name in ["by_root", "by_path", "unrelated"] {
            tracker.register(name, Rc::clone(&noop));
        }
        {
            let _g = tracker.begin("by_root");
            tracker.record("a", "a");
        }
        {
            let _g = tracker.begin("unrelated");
            tracker.record("z", "z");
        }
        assert_eq!(tracker.affected("a", &[]), vec!["by_root"]);
        assert!(tracker.affected("q", &["x".to_owned()]).is_empty());
        assert!(tracker.is_computed("by_path"));
    }

    #[test]
    fn deep_token_under_changed_path_is_affected() {
        let tracker = Tracker::default();
        tracker.register("name_len", derivation(|_| Value::Null));
        {
            let _g = tracker.begin("name_len");
            // A token recorded without its bare root.
            tracker
                .deps
                .borrow_mut()
                .entry("name_len".to_owned())
                .or_default()
                .insert("user.name".to_owned());
        }
        assert_eq!(tracker.affected("user", &["name".to_owned()]), vec!["name_len"]);
        assert!(tracker.affected("user", &["age".to_owned()]).is_empty());
    }

    #[test]
    fn guard_restores_on_unwind() {
        let tracker = Tracker::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _g = tracker.begin("boom");
            panic!("derivation failed");
        }));
        assert!(result.is_err());
        tracker.record("a", "a");
        assert!(tracker.dependencies("boom").is_empty());
    }
}
