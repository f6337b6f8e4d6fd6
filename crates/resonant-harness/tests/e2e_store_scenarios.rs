//! E2E: store scenarios against the in-memory view.
//!
//! 1. Scalar and object bindings, with inputs writing back
//! 2. Nested lists reconcile inside their item
//! 3. Computed chains settle once the store is idle
//! 4. Panicking subscribers and derivations are contained
//! 5. Storage failures leave the in-memory value standing
//! 6. Deferred sources register the variable when they resolve
//! 7. Cyclic object graphs neither hang nor poison snapshots

#![forbid(unsafe_code)]

use std::cell::Cell;
use std::rc::Rc;

use futures::channel::oneshot;
use resonant_core::{Action, Value};
use resonant_harness::{El, MockDom};
use resonant_runtime::{
    FileStorage, InputKind, InputValue, MemoryStorage, SourceError, Store, ViewProvider,
};
use serde_json::{Value as Json, json};

fn num(store: &Store, path: &str) -> f64 {
    store
        .get_path(path)
        .and_then(|v| v.as_f64())
        .unwrap_or(f64::NAN)
}

fn mount(store: &Store) -> Rc<MockDom> {
    let dom = Rc::new(MockDom::new());
    store.attach_view(dom.clone());
    dom
}

fn counter() -> (Rc<Cell<usize>>, impl Fn(&Value, Option<&Value>, Action) + 'static) {
    let count = Rc::new(Cell::new(0));
    let inner = Rc::clone(&count);
    (count, move |_: &Value, _: Option<&Value>, _: Action| {
        inner.set(inner.get() + 1);
    })
}

// ── Bindings ────────────────────────────────────────────────────────────

#[test]
fn scalar_binding_with_number_input_and_expressions() {
    let store = Store::new();
    let dom = Rc::new(MockDom::new());
    let root = dom.root();
    let label = dom.append(root, El::new("span").bind("count"));
    let field = dom.append(root, El::new("input").bind("count").input(InputKind::Number));
    let badge = dom.append(
        root,
        El::new("p")
            .show_if("count > 1")
            .class("count > 1 ? 'many' : 'few'"),
    );
    store.add("count", 1).unwrap();
    store.attach_view(dom.clone());

    assert_eq!(dom.content(label), "1");
    assert_eq!(dom.input_value(field), Some(InputValue::Number(Some(1.0))));
    assert!(!dom.is_visible(badge));
    assert_eq!(dom.classes(badge), ["few"]);

    store.commit_input(field, InputValue::Number(Some(5.0))).unwrap();
    store.tick();
    assert_eq!(dom.content(label), "5");
    assert!(dom.is_visible(badge));
    assert_eq!(dom.classes(badge), ["many"]);

    store.commit_input(field, InputValue::Number(None)).unwrap();
    store.tick();
    assert_eq!(dom.content(label), "");
    assert!(store.peek("count").unwrap().is_null());
}

#[test]
fn escaped_non_ascii_in_expressions_renders() {
    let store = Store::new();
    let dom = Rc::new(MockDom::new());
    let flag = dom.append(dom.root(), El::new("p").show_if("name == '\\é'"));
    store.add("name", "é").unwrap();
    store.attach_view(dom.clone());
    assert!(dom.is_visible(flag));

    store.set("name", "e").unwrap();
    store.tick();
    assert!(!dom.is_visible(flag));
}

#[test]
fn unchanged_scalar_is_not_rewritten() {
    let store = Store::new();
    store.add("count", 1).unwrap();
    let dom = mount(&store);
    let label = dom.append(dom.root(), El::new("span").bind("count"));
    store.set("count", 2).unwrap();
    store.tick();
    assert_eq!(dom.content(label), "2");
    let writes = dom.counters().content_writes;

    store.set("count", 3).unwrap();
    store.set("count", 2).unwrap();
    store.tick();
    assert_eq!(dom.counters().content_writes, writes);
}

#[test]
fn object_binding_renders_nested_props_and_writes_inputs_back() {
    let store = Store::new();
    let dom = Rc::new(MockDom::new());
    let card = dom.append(dom.root(), El::new("div").bind("user"));
    let name = dom.append(card, El::new("span").prop("name"));
    let email = dom.append(card, El::new("input").prop("email").input(InputKind::Text));
    let address = dom.append(card, El::new("div").prop("address"));
    let city = dom.append(address, El::new("span").prop("city"));
    store
        .add(
            "user",
            Value::from_json(json!({
                "name": "Ada",
                "email": "ada@example.com",
                "address": {"city": "London"},
            })),
        )
        .unwrap();
    store.attach_view(dom.clone());

    assert_eq!(dom.content(name), "Ada");
    assert_eq!(dom.content(city), "London");
    assert_eq!(
        dom.input_value(email),
        Some(InputValue::Text("ada@example.com".to_owned()))
    );

    store
        .commit_input(email, InputValue::Text("ada@lovelace.dev".to_owned()))
        .unwrap();
    store
        .get_path("user.address")
        .and_then(|v| v.as_object().cloned())
        .unwrap()
        .set("city", "Paris");
    store.tick();

    assert_eq!(
        store.get_path("user.email").and_then(|v| v.as_str().map(str::to_owned)),
        Some("ada@lovelace.dev".to_owned())
    );
    assert_eq!(dom.content(city), "Paris");
}

#[test]
fn set_path_creates_missing_objects() {
    let store = Store::new();
    store.add("user", Value::from_json(json!({"name": "Ada"}))).unwrap();
    store.set_path("user.profile.age", 36).unwrap();
    assert_eq!(num(&store, "user.profile.age"), 36.0);
    assert!(store.set_path("user.name.first", "A").is_err());
    assert!(store.set_path("missing.x", 1).is_err());
}

#[test]
fn click_handler_receives_the_clicked_item() {
    let store = Store::new();
    let dom = Rc::new(MockDom::new());
    let list = dom.append(dom.root(), El::new("ul"));
    let source = dom.append(list, El::new("li").bind("people"));
    dom.append(source, El::new("span").prop("name"));
    dom.append(source, El::new("button").on_click("select"));
    store
        .add("people", Value::from_json(json!([{"name": "Ada"}, {"name": "Grace"}])))
        .unwrap();
    store.add("selected", "").unwrap();
    store.register_action("select", |s, item| {
        let name = item
            .and_then(Value::as_object)
            .and_then(|o| o.get("name"))
            .unwrap_or_default();
        s.set("selected", name).unwrap();
    });
    store.attach_view(dom.clone());

    let second = dom.rendered(list)[1];
    let button = dom
        .descendants(second)
        .into_iter()
        .find(|n| dom.click_action(*n).is_some())
        .unwrap();
    assert!(store.click(button).unwrap());
    assert_eq!(
        store.peek("selected").and_then(|v| v.as_str().map(str::to_owned)),
        Some("Grace".to_owned())
    );
}

#[test]
fn unregistered_handler_reports_no_action() {
    let store = Store::new();
    let dom = mount(&store);
    let button = dom.append(dom.root(), El::new("button").on_click("nope"));
    assert!(!store.click(button).unwrap());
}

// ── Nested lists ────────────────────────────────────────────────────────

#[test]
fn nested_lists_render_inside_their_item() {
    let store = Store::new();
    let dom = Rc::new(MockDom::new());
    let list = dom.append(dom.root(), El::new("ul"));
    let source = dom.append(list, El::new("li").bind("groups"));
    dom.append(source, El::new("span").prop("name"));
    let members = dom.append(source, El::new("ul").prop("members"));
    dom.append(members, El::new("li").prop(""));
    store
        .add(
            "groups",
            Value::from_json(json!([
                {"name": "A", "members": ["x", "y"]},
                {"name": "B", "members": []},
            ])),
        )
        .unwrap();
    store.attach_view(dom.clone());

    let member_texts = |group: usize| -> Vec<String> {
        let item = dom.rendered(list)[group];
        let ul = dom.find_prop(item, "members").unwrap();
        dom.rendered(ul).into_iter().map(|n| dom.content(n)).collect()
    };
    assert_eq!(member_texts(0), ["x", "y"]);
    assert!(member_texts(1).is_empty());

    let untouched = dom.rendered(list)[1];
    store
        .get_path("groups.0.members")
        .and_then(|v| v.as_array().cloned())
        .unwrap()
        .push("z");
    store.tick();

    assert_eq!(member_texts(0), ["x", "y", "z"]);
    assert_eq!(dom.rendered(list)[1], untouched);

    let keys: Vec<String> = {
        let item = dom.rendered(list)[0];
        let ul = dom.find_prop(item, "members").unwrap();
        dom.rendered(ul)
            .into_iter()
            .map(|n| dom.render_meta(n).unwrap().key)
            .collect()
    };
    let parent_key = dom.render_meta(dom.rendered(list)[0]).unwrap().key;
    assert_eq!(keys[2], format!("{parent_key}/2"));
}

// ── Computed chains ─────────────────────────────────────────────────────

fn cart_store() -> Store {
    let store = Store::new();
    store
        .add(
            "cart",
            Value::from_json(json!([
                {"price": 2, "qty": 1},
                {"price": 3, "qty": 2},
            ])),
        )
        .unwrap();
    store
        .computed("subtotal", |s| {
            let total: f64 = s
                .get("cart")
                .and_then(|v| v.as_array().cloned())
                .map(|cart| {
                    cart.iter()
                        .filter_map(|line| {
                            let line = line.as_object()?.clone();
                            Some(line.get("price")?.as_f64()? * line.get("qty")?.as_f64()?)
                        })
                        .sum()
                })
                .unwrap_or(0.0);
            Value::from(total)
        })
        .unwrap();
    store
        .computed("tax", |s| Value::from(num(s, "subtotal") * 0.25))
        .unwrap();
    store
        .computed("total", |s| Value::from(num(s, "subtotal") + num(s, "tax")))
        .unwrap();
    store
        .computed("label", |s| Value::from(format!("Total: {}", num(s, "total"))))
        .unwrap();
    store
}

#[test]
fn computed_chain_settles_and_renders() {
    let store = cart_store();
    let dom = mount(&store);
    let label = dom.append(dom.root(), El::new("span").bind("label"));
    store.set("label", "x").unwrap_err();
    assert_eq!(num(&store, "total"), 10.0);

    store.set_path("cart.0.qty", 3).unwrap();
    store.run_until_idle();

    assert_eq!(num(&store, "subtotal"), 12.0);
    assert_eq!(num(&store, "tax"), 3.0);
    assert_eq!(num(&store, "total"), 15.0);
    assert_eq!(dom.content(label), "Total: 15");
    assert_eq!(store.dependencies("total"), ["subtotal", "tax"]);
    assert!(store.dependencies("subtotal").contains(&"cart".to_owned()));
}

#[test]
fn unchanged_computed_notifies_nobody() {
    let store = cart_store();
    let (count, callback) = counter();
    store.add_callback("total", callback);
    // Same subtotal: 2*1 + 3*2 == 8*1 + 3*0
    store.set_path("cart.0.price", 8).unwrap();
    store.set_path("cart.1.qty", 0).unwrap();
    store.run_until_idle();
    assert_eq!(num(&store, "total"), 10.0);
    assert_eq!(count.get(), 0);
}

// ── Failure containment ─────────────────────────────────────────────────

#[test]
fn panicking_subscriber_does_not_stop_siblings() {
    let store = Store::new();
    store.add("count", 0).unwrap();
    store.add_callback("count", |_, _, _| panic!("subscriber exploded"));
    let (count, callback) = counter();
    store.add_callback("count", callback);
    let dom = mount(&store);
    let label = dom.append(dom.root(), El::new("span").bind("count"));

    store.set("count", 1).unwrap();
    store.tick();
    assert_eq!(count.get(), 1);
    assert_eq!(dom.content(label), "1");
}

#[test]
fn panicking_derivation_keeps_previous_value() {
    let store = Store::new();
    store.add("divisor", 2).unwrap();
    store
        .computed("ratio", |s| {
            let d = num(s, "divisor");
            assert!(d != 0.0, "division by zero");
            Value::from(10.0 / d)
        })
        .unwrap();
    assert_eq!(num(&store, "ratio"), 5.0);

    store.set("divisor", 0).unwrap();
    store.run_until_idle();
    assert_eq!(num(&store, "ratio"), 5.0);

    store.set("divisor", 5).unwrap();
    store.run_until_idle();
    assert_eq!(num(&store, "ratio"), 2.0);
}

#[test]
fn dropped_subscription_stops_delivery() {
    let store = Store::new();
    store.add("count", 0).unwrap();
    let seen = Rc::new(Cell::new(0));
    let inner = Rc::clone(&seen);
    let subscription = store.subscribe("count", move |_, _, _| inner.set(inner.get() + 1));
    assert_eq!(store.subscriber_count("count"), 1);
    store.set("count", 1).unwrap();
    store.tick();
    drop(subscription);
    assert_eq!(store.subscriber_count("count"), 0);
    store.set("count", 2).unwrap();
    store.tick();
    assert_eq!(seen.get(), 1);
}

// ── Persistence ─────────────────────────────────────────────────────────

#[test]
fn quota_failure_keeps_in_memory_value() {
    let storage = MemoryStorage::new().with_quota(16);
    let store = Store::new().with_storage(Rc::new(storage.clone()));
    let long = "a".repeat(100);
    store.add_persistent("notes", long.as_str()).unwrap();
    assert!(storage.is_empty());
    assert_eq!(
        store.peek("notes").and_then(|v| v.as_str().map(str::len)),
        Some(100)
    );

    store.set("notes", "hi").unwrap();
    store.tick();
    assert_eq!(storage.len(), 1);
}

#[test]
fn unavailable_storage_recovers() {
    let storage = MemoryStorage::new();
    storage.set_available(false);
    let store = Store::new().with_storage(Rc::new(storage.clone()));
    store.add_persistent("theme", "dark").unwrap();
    assert_eq!(store.snapshot(), json!({"theme": "dark"}));

    storage.set_available(true);
    store.set("theme", "light").unwrap();
    store.tick();
    assert_eq!(storage.len(), 1);
}

#[test]
fn file_storage_restores_across_stores() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path());
    {
        let store = Store::new().with_storage(Rc::new(storage.clone()));
        store
            .add_persistent("prefs", Value::from_json(json!({"theme": "dark"})))
            .unwrap();
        store.set_path("prefs.theme", "light").unwrap();
        store.tick();
    }
    let store = Store::new().with_storage(Rc::new(storage));
    store
        .add_persistent("prefs", Value::from_json(json!({"theme": "dark"})))
        .unwrap();
    assert_eq!(store.snapshot(), json!({"prefs": {"theme": "light"}}));
}

// ── Deferred sources ────────────────────────────────────────────────────

#[test]
fn deferred_source_registers_on_resolution() {
    let store = Store::new();
    let dom = mount(&store);
    let name = dom.append(dom.root(), El::new("span").bind("profile.name"));
    let (tx, rx) = oneshot::channel::<Json>();
    store.add_deferred(
        "profile",
        async move { rx.await.map_err(|_| SourceError::Canceled) },
        false,
    );

    store.tick();
    assert!(!store.contains("profile"));
    assert!(store.has_pending());

    tx.send(json!({"name": "Ada"})).unwrap();
    store.tick();
    assert!(store.contains("profile"));
    assert_eq!(dom.content(name), "Ada");
    assert!(!store.has_pending());
}

#[test]
fn failed_and_canceled_sources_leave_variables_unset() {
    let store = Store::new();
    store.add_deferred(
        "broken",
        std::future::ready(Err::<Json, _>("backend down")),
        false,
    );
    let (tx, rx) = oneshot::channel::<Json>();
    store.add_deferred(
        "abandoned",
        async move { rx.await.map_err(|_| SourceError::Canceled) },
        false,
    );
    drop(tx);

    store.run_until_idle();
    assert!(!store.contains("broken"));
    assert!(!store.contains("abandoned"));
    assert!(!store.has_pending());
}

// ── Cyclic graphs ───────────────────────────────────────────────────────

#[test]
fn cyclic_graph_is_skipped_in_snapshots() {
    let store = Store::new();
    store.add("graph", Value::from_json(json!({"name": "root"}))).unwrap();
    store.add("count", 1).unwrap();
    let dom = mount(&store);
    let name = dom.append(dom.root(), El::new("span").bind("graph.name"));
    let notice = dom.append(dom.root(), El::new("p").show_if("count > 5"));

    let node = store.peek("graph").and_then(|v| v.as_object().cloned()).unwrap();
    node.set("me", node.clone());
    node.set("name", "loop");
    store.set("count", 2).unwrap();
    store.run_until_idle();

    assert_eq!(dom.content(name), "loop");
    assert!(store.peek("graph").unwrap().to_json().is_err());
    assert_eq!(store.snapshot(), json!({"count": 2}));
    assert!(!dom.is_visible(notice));
    assert!(
        store
            .get_path("graph.me.me.name")
            .is_some_and(|v| v.as_str() == Some("loop"))
    );
}
