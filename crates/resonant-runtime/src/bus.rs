#![forbid(unsafe_code)]

//! Notification bus: per-variable subscriber callbacks.
//!
//! Callbacks receive `(item, current, action)` where `item` is the record's
//! subject (new item, or old value for removals) and `current` is the
//! variable's value at delivery time.
//!
//! # Invariants
//!
//! 1. Callbacks for one variable run in registration order.
//! 2. A panicking callback is logged and does not stop its siblings.
//! 3. Dropping a [`Subscription`] removes its callback before the next
//!    delivery. Callbacks added with `add_callback` live as long as the store.
//!
//! Callbacks are collected before they run, so a callback may subscribe,
//! unsubscribe, or mutate the store; new records land in the next tick.

use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use resonant_core::{Action, Value};
use tracing::error;

/// Subscriber callback: `(item, current value, action)`.
pub type Callback = dyn Fn(&Value, Option<&Value>, Action);

enum Listener {
    Owned(Rc<Callback>),
    Weak(Weak<Callback>),
}

impl Listener {
    fn upgrade(&self) -> Option<Rc<Callback>> {
        match self {
            Self::Owned(cb) => Some(Rc::clone(cb)),
            Self::Weak(cb) => cb.upgrade(),
        }
    }
}

/// RAII guard for a subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    _callback: Rc<Callback>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[derive(Default)]
pub(crate) struct Bus {
    listeners: RefCell<AHashMap<String, Vec<Listener>>>,
}

impl Bus {
    pub(crate) fn subscribe(&self, variable: &str, callback: Rc<Callback>) -> Subscription {
        self.listeners
            .borrow_mut()
            .entry(variable.to_owned())
            .or_default()
            .push(Listener::Weak(Rc::downgrade(&callback)));
        Subscription {
            _callback: callback,
        }
    }

    pub(crate) fn add_callback(&self, variable: &str, callback: Rc<Callback>) {
        self.listeners
            .borrow_mut()
            .entry(variable.to_owned())
            .or_default()
            .push(Listener::Owned(callback));
    }

    /// Live callbacks for `variable`; dead subscriptions are pruned.
    fn live(&self, variable: &str) -> Vec<Rc<Callback>> {
        let mut listeners = self.listeners.borrow_mut();
        let Some(list) = listeners.get_mut(variable) else {
            return Vec::new();
        };
        list.retain(|l| l.upgrade().is_some());
        list.iter().filter_map(Listener::upgrade).collect()
    }

    pub(crate) fn listener_count(&self, variable: &str) -> usize {
        self.live(variable).len()
    }

    /// Deliver one record to every live callback for `variable`.
    /// Returns how many callbacks panicked.
    pub(crate) fn deliver(
        &self,
        variable: &str,
        item: &Value,
        current: Option<&Value>,
        action: Action,
    ) -> usize {
        let mut panicked = 0;
        for callback in self.live(variable) {
            let result = catch_unwind(AssertUnwindSafe(|| callback(item, current, action)));
            if let Err(payload) = result {
                panicked += 1;
                error!(
                    variable,
                    action = action.as_str(),
                    panic = panic_message(payload.as_ref()),
                    "subscriber panicked"
                );
            }
        }
        panicked
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use tracing_test::traced_test;

    fn cb(f: impl Fn(&Value, Option<&Value>, Action) + 'static) -> Rc<Callback> {
        Rc::new(f)
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let bus = Bus::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l1 = Rc::clone(&log);
        let l2 = Rc::clone(&log);
        bus.add_callback("v", cb(move |_, _, _| l1.borrow_mut().push(1)));
        let _sub = bus.subscribe("v", cb(move |_, _, _| l2.borrow_mut().push(2)));
        bus.deliver("v", &Value::Null, None, Action::Modified);
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = Bus::default();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let sub = bus.subscribe("v", cb(move |_, _, _| h.set(h.get() + 1)));
        bus.deliver("v", &Value::Null, None, Action::Modified);
        drop(sub);
        bus.deliver("v", &Value::Null, None, Action::Modified);
        assert_eq!(hits.get(), 1);
        assert_eq!(bus.listener_count("v"), 0);
    }

    #[test]
    fn other_variables_are_not_notified() {
        let bus = Bus::default();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        bus.add_callback("a", cb(move |_, _, _| h.set(h.get() + 1)));
        bus.deliver("b", &Value::Null, None, Action::Added);
        assert_eq!(hits.get(), 0);
    }

    #[traced_test]
    #[test]
    fn panicking_callback_is_isolated() {
        let bus = Bus::default();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        bus.add_callback("v", cb(|_, _, _| panic!("boom")));
        bus.add_callback("v", cb(move |_, _, _| h.set(h.get() + 1)));
        let panicked = bus.deliver("v", &Value::from(1), None, Action::Modified);
        assert_eq!(panicked, 1);
        assert_eq!(hits.get(), 1);
        assert!(logs_contain("subscriber panicked"));
        assert!(logs_contain("boom"));
    }

    #[test]
    fn callback_sees_item_and_current() {
        let bus = Bus::default();
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        bus.add_callback(
            "v",
            cb(move |item, current, action| {
                *s.borrow_mut() = Some((
                    item.as_f64(),
                    current.and_then(Value::as_f64),
                    action,
                ));
            }),
        );
        bus.deliver("v", &Value::from(2), Some(&Value::from(5)), Action::Added);
        assert_eq!(*seen.borrow(), Some((Some(2.0), Some(5.0), Action::Added)));
    }
}
