#![forbid(unsafe_code)]

//! Projection of store values onto a [`ViewProvider`].
//!
//! For a variable, every attached node bound to it (or to a path under it)
//! is rendered according to the value's shape:
//!
//! - **array**: the node is a list source. The first time, it is cloned into a
//!   template and hidden; items are rendered as clones in the source's parent,
//!   matched to existing clones by key (see [`crate::reconcile`]);
//! - **object**: prop descendants receive the matching property values;
//! - **scalar**: the node's content (or input value) is written when it
//!   differs.
//!
//! Rendered items and object-bound nodes become *contexts*: the qualified
//! path of their value is remembered so that prop inputs, click actions and
//! expressions inside them can find their item.
//!
//! Reused items keep their scalar content; only nested arrays and objects
//! are re-rendered. Nested lists are reconciled inside their prop node with
//! the prop node's first child as template, keyed by
//! `{parent key}{separator}{item key}`.
//!
//! After the nodes, display conditions and class expressions are evaluated
//! for nodes whose context belongs to the variable or whose expressions
//! mention it.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use resonant_core::{ExpressionEvaluator, ItemScope, ObservableArray, ObservableObject, Value, path};
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::reconcile::{self, ItemSpec, Placement};
use crate::view::{InputKind, InputValue, NodeId, RenderMeta, ViewProvider, ancestors};

/// What the projector reads from the store.
pub(crate) trait Model {
    /// Value at a fully-qualified path.
    fn lookup(&self, qualified: &str) -> Option<Value>;
    /// JSON object of every root variable, for expression scopes.
    fn state(&self) -> Json;
    fn evaluator(&self) -> Rc<dyn ExpressionEvaluator>;
    fn key_separator(&self) -> &str;
}

#[derive(Default)]
struct ProjectionState {
    /// List source node to its detached template.
    templates: AHashMap<NodeId, NodeId>,
    /// Nested list node to its detached item template.
    nested_templates: AHashMap<NodeId, NodeId>,
    /// Rendered items and object-bound nodes to their qualified path.
    contexts: AHashMap<NodeId, String>,
    /// Prop inputs to `(context node, path relative to it)`.
    inputs: AHashMap<NodeId, (NodeId, String)>,
    applied_classes: AHashMap<NodeId, Vec<String>>,
}

pub(crate) struct Projector {
    view: Rc<dyn ViewProvider>,
    state: RefCell<ProjectionState>,
}

impl Projector {
    pub(crate) fn new(view: Rc<dyn ViewProvider>) -> Self {
        Self {
            view,
            state: RefCell::default(),
        }
    }

    pub(crate) fn view(&self) -> &dyn ViewProvider {
        self.view.as_ref()
    }

    /// Render `variable` given the relative paths changed this tick.
    pub(crate) fn project(&self, model: &dyn Model, variable: &str, changed: &[String]) {
        let mut state = self.state.borrow_mut();
        let mut pass = Pass {
            view: self.view.as_ref(),
            model,
            state: &mut state,
            changed,
        };
        for node in self.view.bound_nodes(variable) {
            pass.project_node(node);
        }
        pass.evaluate_expressions(variable);
    }

    /// Qualified path of the nearest context at or above `node`.
    pub(crate) fn context_of(&self, node: NodeId) -> Option<String> {
        let state = self.state.borrow();
        ancestors(self.view(), node).find_map(|n| state.contexts.get(&n).cloned())
    }

    /// Qualified path a prop input writes to.
    pub(crate) fn input_path(&self, node: NodeId) -> Option<String> {
        let state = self.state.borrow();
        let (base, rel) = state.inputs.get(&node)?;
        let base_path = state.contexts.get(base)?;
        Some(if rel.is_empty() {
            base_path.clone()
        } else {
            path::join(base_path, rel)
        })
    }
}

struct Pass<'a> {
    view: &'a dyn ViewProvider,
    model: &'a dyn Model,
    state: &'a mut ProjectionState,
    changed: &'a [String],
}

impl Pass<'_> {
    fn project_node(&mut self, node: NodeId) {
        if self.view.render_meta(node).is_some() {
            return;
        }
        let Some(binding) = self.view.binding(node) else {
            return;
        };
        let is_source = self.state.templates.contains_key(&node);
        match self.model.lookup(&binding) {
            Some(Value::Array(list)) => self.render_list(node, &binding, &list),
            // A list source whose value stopped being a list renders nothing.
            _ if is_source => self.render_list(node, &binding, &ObservableArray::new()),
            None => {}
            Some(Value::Object(obj)) => {
                self.state.contexts.insert(node, binding.clone());
                let key = obj
                    .key()
                    .map_or_else(|| binding.clone(), |k| k.to_string());
                self.render_props(node, &obj, node, &binding, "", true, &key);
            }
            Some(scalar) => self.write_scalar(node, &scalar),
        }
    }

    fn write_scalar(&self, node: NodeId, value: &Value) {
        match self.view.input_kind(node) {
            Some(kind) => {
                let next = input_value(kind, value);
                if self.view.input_value(node).as_ref() != Some(&next) {
                    self.view.set_input_value(node, next);
                }
            }
            None => {
                let text = value.display_text();
                if self.view.content(node) != text {
                    self.view.set_content(node, &text);
                }
            }
        }
    }

    // -- lists ---------------------------------------------------------------

    fn render_list(&mut self, source: NodeId, list_path: &str, list: &ObservableArray) {
        let Some(container) = self.view.parent(source) else {
            debug!(list = list_path, "list source is detached; skipped");
            return;
        };
        let template = match self.state.templates.get(&source) {
            Some(template) => *template,
            None => {
                let template = self.view.clone_node(source);
                self.view.set_visible(source, false);
                self.state.templates.insert(source, template);
                template
            }
        };
        let existing: Vec<(String, NodeId)> = self
            .view
            .children(container)
            .into_iter()
            .filter(|n| *n != source && self.view.binding(*n).as_deref() == Some(list_path))
            .filter_map(|n| self.view.render_meta(n).map(|meta| (meta.key, n)))
            .collect();
        let items = list.to_vec();
        let keys = items
            .iter()
            .enumerate()
            .map(|(i, item)| item_key(item, i))
            .collect();
        self.reconcile(container, template, list_path, &items, keys, &existing);
    }

    fn render_nested(
        &mut self,
        node: NodeId,
        list: &ObservableArray,
        list_path: &str,
        parent_key: &str,
    ) {
        let template = match self.state.nested_templates.get(&node) {
            Some(template) => *template,
            None => {
                let children = self.view.children(node);
                let Some(first) = children.first() else {
                    return;
                };
                let template = self.view.clone_node(*first);
                for child in children {
                    self.view.remove(child);
                }
                self.state.nested_templates.insert(node, template);
                template
            }
        };
        let existing: Vec<(String, NodeId)> = self
            .view
            .children(node)
            .into_iter()
            .filter_map(|n| self.view.render_meta(n).map(|meta| (meta.key, n)))
            .collect();
        let separator = self.model.key_separator().to_owned();
        let items = list.to_vec();
        let keys = items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{parent_key}{separator}{}", item_key(item, i)))
            .collect();
        self.reconcile(node, template, list_path, &items, keys, &existing);
    }

    fn reconcile(
        &mut self,
        container: NodeId,
        template: NodeId,
        list_path: &str,
        items: &[Value],
        keys: Vec<String>,
        existing: &[(String, NodeId)],
    ) {
        let specs: Vec<ItemSpec> = keys
            .into_iter()
            .enumerate()
            .map(|(i, key)| ItemSpec {
                key,
                changed: self.item_changed(&path::join_index(list_path, i)),
            })
            .collect();
        let plan = reconcile::plan(existing, &specs);

        for (i, (item, placement)) in items.iter().zip(&plan.placements).enumerate() {
            let (node, fresh) = match placement {
                Placement::Reuse(node) => (*node, false),
                Placement::Fresh => (self.view.clone_node(template), true),
            };
            let item_path = path::join_index(list_path, i);
            let key = &specs[i].key;
            self.view.set_render_meta(
                node,
                RenderMeta {
                    key: key.clone(),
                    index: i,
                },
            );
            self.state.contexts.insert(node, item_path.clone());
            self.render_item(node, item, &item_path, fresh, key);
            self.view.append_child(container, node);
        }
        for node in &plan.discard {
            self.forget(*node);
            self.view.remove(*node);
        }

        let stats = plan.stats();
        debug!(
            list = list_path,
            reused = stats.reused,
            created = stats.created,
            discarded = stats.discarded,
            "list reconciled"
        );
    }

    /// Whether a change this tick touches the item at `item_path`.
    fn item_changed(&self, item_path: &str) -> bool {
        let (_, rel) = path::split_root(item_path);
        self.changed
            .iter()
            .any(|c| path::is_within(c, rel) || path::is_within(rel, c))
    }

    fn render_item(&mut self, node: NodeId, item: &Value, item_path: &str, fresh: bool, key: &str) {
        match item {
            Value::Object(obj) => self.render_props(node, obj, node, item_path, "", fresh, key),
            _ if !fresh => {}
            Value::Array(_) => self.write_scalar(node, item),
            scalar => {
                let target = self
                    .view
                    .prop_nodes(node)
                    .into_iter()
                    .find(|n| self.view.prop(*n).as_deref() == Some(""))
                    .unwrap_or(node);
                if self.view.input_kind(target).is_some() {
                    self.state.inputs.insert(target, (node, String::new()));
                }
                self.write_scalar(target, scalar);
            }
        }
    }

    /// Render the props under `scope` from `obj`.
    ///
    /// `base`/`base_path` is the enclosing context and `prefix` the path of
    /// `obj` relative to it. Scalars are written only when `rewrite` is set.
    #[allow(clippy::too_many_arguments)]
    fn render_props(
        &mut self,
        scope: NodeId,
        obj: &ObservableObject,
        base: NodeId,
        base_path: &str,
        prefix: &str,
        rewrite: bool,
        key: &str,
    ) {
        for node in self.view.prop_nodes(scope) {
            let Some(prop) = self.view.prop(node) else {
                continue;
            };
            if prop.is_empty() {
                continue;
            }
            let Some(value) = obj.get(&prop) else {
                continue;
            };
            let rel = path::join(prefix, &prop);
            match &value {
                Value::Array(list) => {
                    let list_path = path::join(base_path, &rel);
                    self.render_nested(node, list, &list_path, key);
                }
                Value::Object(inner) => {
                    self.render_props(node, inner, base, base_path, &rel, true, key);
                }
                scalar => {
                    if self.view.input_kind(node).is_some() {
                        self.state.inputs.insert(node, (base, rel));
                    }
                    if rewrite {
                        self.write_scalar(node, scalar);
                    }
                }
            }
        }
    }

    /// Drop projection state for a discarded subtree.
    fn forget(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            self.state.contexts.remove(&n);
            self.state.inputs.remove(&n);
            self.state.applied_classes.remove(&n);
            self.state.nested_templates.remove(&n);
            stack.extend(self.view.children(n));
        }
    }

    // -- expressions ---------------------------------------------------------

    fn under_template_source(&self, node: NodeId) -> bool {
        ancestors(self.view, node).any(|n| self.state.templates.contains_key(&n))
    }

    fn evaluate_expressions(&mut self, variable: &str) {
        let nodes = self.view.expression_nodes();
        if nodes.is_empty() {
            return;
        }
        let evaluator = self.model.evaluator();
        let mut state: Option<Json> = None;

        for node in nodes {
            if self.under_template_source(node) {
                continue;
            }
            let context =
                ancestors(self.view, node).find_map(|n| self.state.contexts.get(&n).cloned());
            let root = context.as_deref().map(|p| path::split_root(p).0);
            let display = self.view.display_condition(node);
            let classes = self.view.class_expression(node);
            let relevant = root == Some(variable)
                || display
                    .iter()
                    .chain(classes.iter())
                    .any(|src| mentions(evaluator.as_ref(), src, variable));
            if !relevant {
                continue;
            }

            let state = state.get_or_insert_with(|| self.model.state());
            let item = context
                .as_deref()
                .and_then(|p| self.model.lookup(p))
                .map(|v| v.to_json().unwrap_or(Json::Null));
            let scope = match &item {
                Some(item) => ItemScope::new(state).with_item(item, root),
                None => ItemScope::new(state),
            };

            if let Some(source) = &display {
                let visible = evaluator.condition(source, &scope).unwrap_or_else(|e| {
                    warn!(
                        node = %node,
                        expression = %source,
                        error = %e,
                        "display condition failed; hiding node"
                    );
                    false
                });
                self.view.set_visible(node, visible);
            }

            if let Some(source) = &classes {
                let next = evaluator.classes(source, &scope).unwrap_or_else(|e| {
                    warn!(
                        node = %node,
                        expression = %source,
                        error = %e,
                        "class expression failed"
                    );
                    Vec::new()
                });
                let previous = self.state.applied_classes.remove(&node).unwrap_or_default();
                for class in previous.iter().filter(|c| !next.contains(c)) {
                    self.view.remove_class(node, class);
                }
                for class in next.iter().filter(|c| !previous.contains(c)) {
                    self.view.add_class(node, class);
                }
                self.state.applied_classes.insert(node, next);
            }
        }
    }
}

/// Whether `source` reads `variable`. Unparsable sources count as reading
/// everything so their failure is reported.
fn mentions(evaluator: &dyn ExpressionEvaluator, source: &str, variable: &str) -> bool {
    evaluator
        .identifiers(source)
        .map_or(true, |ids| ids.iter().any(|id| id == variable || id == "state"))
}

/// Reconciliation key: the object's identity key, else the position.
fn item_key(item: &Value, index: usize) -> String {
    item.as_object()
        .and_then(ObservableObject::key)
        .map_or_else(|| index.to_string(), |k| k.to_string())
}

fn input_value(kind: InputKind, value: &Value) -> InputValue {
    match kind {
        InputKind::Text => InputValue::Text(value.display_text()),
        InputKind::Number => InputValue::Number(
            value
                .as_f64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok())),
        ),
        InputKind::Checkbox => InputValue::Checked(value.is_truthy()),
    }
}
