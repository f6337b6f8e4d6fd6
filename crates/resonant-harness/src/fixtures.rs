#![forbid(unsafe_code)]

//! A todo-list application wired to a [`MockDom`].
//!
//! ```text
//! root
//! ├── ul                              list
//! │   └── li  bind=todos              source (hidden once rendered)
//! │           class="done ? 'done' : ''"
//! │       ├── span   prop=title
//! │       ├── input  prop=done (checkbox)
//! │       └── button remove-by=title
//! ├── span bind=remaining             computed
//! ├── input bind=draft (text)
//! ├── button on-click=add
//! └── p   show-if="todos.length == 0"
//! ```

use std::rc::Rc;

use resonant_core::{ObservableArray, ObservableObject, Value};
use resonant_runtime::{InputKind, NodeId, Store};
use serde_json::{Value as Json, json};
use tracing::warn;

use crate::dom::{El, MockDom};

/// `n` todos titled `"task {i}"`, every third one done.
#[must_use]
pub fn todo_items(n: usize) -> Json {
    Json::Array(
        (0..n)
            .map(|i| json!({ "title": format!("task {i}"), "done": i % 3 == 2 }))
            .collect(),
    )
}

/// Number of todos not marked done.
#[must_use]
pub fn remaining(store: &Store) -> usize {
    store
        .get("todos")
        .and_then(|v| v.as_array().cloned())
        .map_or(0, |list| {
            list.iter()
                .filter(|todo| {
                    !todo
                        .as_object()
                        .and_then(|o| o.get("done"))
                        .is_some_and(|done| done.is_truthy())
                })
                .count()
        })
}

pub struct TodoApp {
    pub store: Store,
    pub dom: Rc<MockDom>,
    pub list: NodeId,
    pub source: NodeId,
    pub remaining: NodeId,
    pub draft: NodeId,
    pub add_button: NodeId,
    pub empty_notice: NodeId,
}

impl TodoApp {
    /// Build the view, register the state, and attach.
    pub fn new(items: Json) -> resonant_runtime::Result<Self> {
        Self::with_store(Store::new(), items)
    }

    pub fn with_store(store: Store, items: Json) -> resonant_runtime::Result<Self> {
        let dom = Rc::new(MockDom::new());
        let root = dom.root();
        let list = dom.append(root, El::new("ul"));
        let source = dom.append(list, El::new("li").bind("todos").class("done ? 'done' : ''"));
        dom.append(source, El::new("span").prop("title"));
        dom.append(source, El::new("input").prop("done").input(InputKind::Checkbox));
        dom.append(source, El::new("button").remove_by("title").text("x"));
        let remaining_label = dom.append(root, El::new("span").bind("remaining"));
        let draft = dom.append(root, El::new("input").bind("draft").input(InputKind::Text));
        let add_button = dom.append(root, El::new("button").on_click("add").text("Add"));
        let empty_notice = dom.append(
            root,
            El::new("p").show_if("todos.length == 0").text("Nothing to do"),
        );

        store.add("todos", Value::from_json(items))?;
        store.add("draft", "")?;
        store.computed("remaining", |s| Value::from(remaining(s)))?;
        store.register_action("add", |s, _| {
            let title = s.peek("draft").map(|v| v.display_text()).unwrap_or_default();
            if title.trim().is_empty() {
                return;
            }
            if let Some(list) = s.peek("todos").and_then(|v| v.as_array().cloned()) {
                list.push(ObservableObject::from_pairs([
                    ("title", Value::from(title)),
                    ("done", Value::from(false)),
                ]));
            }
            if let Err(err) = s.set("draft", "") {
                warn!(error = %err, "could not clear the draft");
            }
        });
        store.attach_view(dom.clone());

        Ok(Self {
            store,
            dom,
            list,
            source,
            remaining: remaining_label,
            draft,
            add_button,
            empty_notice,
        })
    }

    /// Rendered todo items, in order.
    #[must_use]
    pub fn items(&self) -> Vec<NodeId> {
        self.dom.rendered(self.list)
    }

    #[must_use]
    pub fn titles(&self) -> Vec<String> {
        self.dom.item_texts(self.list, "title")
    }

    /// The live `todos` array.
    #[must_use]
    pub fn todos(&self) -> ObservableArray {
        self.store
            .peek("todos")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default()
    }
}
