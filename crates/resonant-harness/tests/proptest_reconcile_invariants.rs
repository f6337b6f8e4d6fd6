//! Property-based invariant tests for keyed list reconciliation.
//!
//! 1. A plan reuses each rendered node at most once.
//! 2. A node is reused only for an unchanged item with the node's key.
//! 3. Every rendered node is either reused or discarded, never both.
//! 4. Identical keys with no changes create and discard nothing.
//! 5. After any sequence of list edits, the rendered items show the list
//!    in order, with render indices `0..len`.
//! 6. Items untouched by a tick keep their nodes.

use std::collections::HashSet;

use proptest::prelude::*;
use resonant_core::{ObservableObject, Value};
use resonant_harness::{TodoApp, todo_items};
use resonant_runtime::{ItemSpec, NodeId, Placement, ViewProvider, plan};

// ── Strategies ──────────────────────────────────────────────────────────

fn rendered_keys() -> impl Strategy<Value = Vec<(String, NodeId)>> {
    proptest::collection::vec(0u8..12, 0..12).prop_map(|keys| {
        keys.into_iter()
            .enumerate()
            .map(|(i, k)| (format!("k{k}"), NodeId(i as u64 + 1)))
            .collect()
    })
}

fn item_specs() -> impl Strategy<Value = Vec<ItemSpec>> {
    proptest::collection::vec((0u8..12, proptest::bool::weighted(0.2)), 0..12).prop_map(|items| {
        items
            .into_iter()
            .map(|(k, changed)| ItemSpec {
                key: format!("k{k}"),
                changed,
            })
            .collect()
    })
}

#[derive(Debug, Clone)]
enum Edit {
    Push(String),
    Pop,
    Shift,
    Unshift(String),
    Rename(usize, String),
    Remove(usize),
    Toggle(usize),
    Tick,
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        "[a-z]{1,6}".prop_map(Edit::Push),
        Just(Edit::Pop),
        Just(Edit::Shift),
        "[a-z]{1,6}".prop_map(Edit::Unshift),
        (0usize..8, "[a-z]{1,6}").prop_map(|(i, t)| Edit::Rename(i, t)),
        (0usize..8).prop_map(Edit::Remove),
        (0usize..8).prop_map(Edit::Toggle),
        Just(Edit::Tick),
    ]
}

fn todo(title: &str) -> ObservableObject {
    ObservableObject::from_pairs([("title", Value::from(title)), ("done", Value::from(false))])
}

fn apply(app: &TodoApp, edit: &Edit) {
    let list = app.todos();
    let object_at = |i: usize| list.get(i).and_then(|v| v.as_object().cloned());
    match edit {
        Edit::Push(title) => {
            list.push(todo(title));
        }
        Edit::Pop => {
            list.pop();
        }
        Edit::Shift => {
            list.shift();
        }
        Edit::Unshift(title) => {
            list.unshift([todo(title)]);
        }
        Edit::Rename(i, title) => {
            if let Some(obj) = object_at(*i) {
                obj.set("title", title.as_str());
            }
        }
        Edit::Remove(i) => {
            list.splice(*i, 1, Vec::<Value>::new());
        }
        Edit::Toggle(i) => {
            if let Some(obj) = object_at(*i) {
                let done = obj.get("done").is_some_and(|d| d.is_truthy());
                obj.set("done", !done);
            }
        }
        Edit::Tick => {
            app.store.tick();
        }
    }
}

fn expected_titles(app: &TodoApp) -> Vec<String> {
    app.todos()
        .iter()
        .filter_map(|item| item.as_object()?.get("title"))
        .map(|title| title.display_text())
        .collect()
}

// ═════════════════════════════════════════════════════════════════════════
// 1–4. Plan invariants
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn plan_partitions_rendered_nodes(existing in rendered_keys(), items in item_specs()) {
        let plan = plan(&existing, &items);
        prop_assert_eq!(plan.placements.len(), items.len());

        let reused: Vec<NodeId> = plan
            .placements
            .iter()
            .filter_map(|p| match p {
                Placement::Reuse(node) => Some(*node),
                Placement::Fresh => None,
            })
            .collect();
        let unique: HashSet<NodeId> = reused.iter().copied().collect();
        prop_assert_eq!(unique.len(), reused.len());

        for node in &plan.discard {
            prop_assert!(!unique.contains(node));
        }
        prop_assert_eq!(reused.len() + plan.discard.len(), existing.len());
    }

    #[test]
    fn reuse_requires_matching_key_and_no_change(
        existing in rendered_keys(),
        items in item_specs(),
    ) {
        let plan = plan(&existing, &items);
        for (item, placement) in items.iter().zip(&plan.placements) {
            if let Placement::Reuse(node) = placement {
                prop_assert!(!item.changed);
                let key = existing.iter().find(|(_, n)| n == node).map(|(k, _)| k);
                prop_assert_eq!(key, Some(&item.key));
            }
        }
    }

    #[test]
    fn identical_unchanged_lists_are_stable(count in 0usize..20) {
        let existing: Vec<(String, NodeId)> =
            (0..count).map(|i| (format!("k{i}"), NodeId(i as u64))).collect();
        let items: Vec<ItemSpec> = (0..count)
            .map(|i| ItemSpec { key: format!("k{i}"), changed: false })
            .collect();
        let stats = plan(&existing, &items).stats();
        prop_assert_eq!(stats.created, 0);
        prop_assert_eq!(stats.discarded, 0);
        prop_assert_eq!(stats.reused, count);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Rendered view tracks the list
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn rendered_items_follow_any_edit_sequence(
        initial in 0usize..6,
        edits in proptest::collection::vec(edit(), 0..25),
    ) {
        let app = TodoApp::new(todo_items(initial)).unwrap();
        for e in &edits {
            apply(&app, e);
        }
        app.store.run_until_idle();

        prop_assert_eq!(app.titles(), expected_titles(&app));
        for (i, node) in app.items().into_iter().enumerate() {
            prop_assert_eq!(app.dom.render_meta(node).map(|m| m.index), Some(i));
            prop_assert!(app.dom.is_attached(node));
        }
        let remaining = app.todos().len() - app
            .todos()
            .iter()
            .filter(|t| t.as_object().and_then(|o| o.get("done")).is_some_and(|d| d.is_truthy()))
            .count();
        prop_assert_eq!(app.dom.content(app.remaining), remaining.to_string());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Untouched items keep their nodes
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn renames_rebuild_only_renamed_items(
        len in 1usize..8,
        renamed in proptest::collection::btree_set(0usize..8, 0..4),
    ) {
        let app = TodoApp::new(todo_items(len)).unwrap();
        let before = app.items();
        for &i in renamed.iter().filter(|&&i| i < len) {
            apply(&app, &Edit::Rename(i, format!("renamed {i}")));
        }
        app.store.tick();

        let after = app.items();
        for i in 0..len {
            let renamed_here = renamed.contains(&i);
            prop_assert_eq!(after[i] == before[i], !renamed_here, "item {}", i);
        }
    }
}
