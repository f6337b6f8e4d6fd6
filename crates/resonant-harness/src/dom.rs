#![forbid(unsafe_code)]

//! In-memory node tree implementing [`ViewProvider`].
//!
//! Nodes live in an arena and are never freed; a removed node is simply
//! detached. The tree keeps counters of the writes the store makes, so
//! tests can assert that a reconcile rebuilt only what it had to.
//!
//! ```
//! use resonant_harness::{El, MockDom};
//!
//! let dom = MockDom::new();
//! let list = dom.append(dom.root(), El::new("ul"));
//! let item = dom.append(list, El::new("li").bind("todos"));
//! dom.append(item, El::new("span").prop("title"));
//! assert_eq!(dom.bound(item).as_deref(), Some("todos"));
//! ```

use std::cell::{Cell, RefCell};

use resonant_core::path;
use resonant_runtime::{ClickAction, InputKind, InputValue, NodeId, RenderMeta, ViewProvider};
use tracing::trace;

/// Declarative description of a node to append.
#[derive(Debug, Clone, Default)]
pub struct El {
    tag: String,
    binding: Option<String>,
    prop: Option<String>,
    input: Option<InputKind>,
    show_if: Option<String>,
    class_expr: Option<String>,
    click: Option<ClickAction>,
    text: String,
}

impl El {
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn bind(mut self, path: &str) -> Self {
        self.binding = Some(path.to_owned());
        self
    }

    #[must_use]
    pub fn prop(mut self, prop: &str) -> Self {
        self.prop = Some(prop.to_owned());
        self
    }

    #[must_use]
    pub fn input(mut self, kind: InputKind) -> Self {
        self.input = Some(kind);
        self
    }

    #[must_use]
    pub fn show_if(mut self, expression: &str) -> Self {
        self.show_if = Some(expression.to_owned());
        self
    }

    #[must_use]
    pub fn class(mut self, expression: &str) -> Self {
        self.class_expr = Some(expression.to_owned());
        self
    }

    #[must_use]
    pub fn on_click(mut self, action: &str) -> Self {
        self.click = Some(ClickAction::Handler(action.to_owned()));
        self
    }

    #[must_use]
    pub fn remove_by(mut self, prop: &str) -> Self {
        self.click = Some(ClickAction::RemoveBy(prop.to_owned()));
        self
    }

    #[must_use]
    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_owned();
        self
    }
}

/// Writes the store made into the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomCounters {
    pub clones: usize,
    pub content_writes: usize,
    pub input_writes: usize,
    pub removals: usize,
}

#[derive(Debug, Clone)]
struct Node {
    spec: El,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    content: String,
    input_value: Option<InputValue>,
    classes: Vec<String>,
    visible: bool,
    meta: Option<RenderMeta>,
}

impl Node {
    fn new(spec: El) -> Self {
        let input_value = spec.input.map(|kind| match kind {
            InputKind::Text => InputValue::Text(String::new()),
            InputKind::Number => InputValue::Number(None),
            InputKind::Checkbox => InputValue::Checked(false),
        });
        Self {
            content: spec.text.clone(),
            spec,
            parent: None,
            children: Vec::new(),
            input_value,
            classes: Vec::new(),
            visible: true,
            meta: None,
        }
    }
}

/// Arena-backed view tree with a single root.
#[derive(Debug)]
pub struct MockDom {
    nodes: RefCell<Vec<Node>>,
    counters: Cell<DomCounters>,
}

impl Default for MockDom {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDom {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: RefCell::new(vec![Node::new(El::new("root"))]),
            counters: Cell::default(),
        }
    }

    #[must_use]
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Create a node from `spec` as the last child of `parent`.
    pub fn append(&self, parent: NodeId, spec: El) -> NodeId {
        let id = {
            let mut nodes = self.nodes.borrow_mut();
            nodes.push(Node::new(spec));
            NodeId(nodes.len() as u64 - 1)
        };
        self.attach(parent, id);
        id
    }

    #[must_use]
    pub fn counters(&self) -> DomCounters {
        self.counters.get()
    }

    pub fn reset_counters(&self) {
        self.counters.set(DomCounters::default());
    }

    // -- user actions --------------------------------------------------------

    /// Overwrite a node's content as a user script would, bypassing the
    /// counters.
    pub fn edit_content(&self, node: NodeId, text: &str) {
        self.with_node(node, |n| n.content = text.to_owned());
    }

    /// Type into an input, bypassing the counters.
    pub fn type_into(&self, node: NodeId, value: InputValue) {
        self.with_node(node, |n| n.input_value = Some(value));
    }

    // -- inspection ----------------------------------------------------------

    #[must_use]
    pub fn bound(&self, node: NodeId) -> Option<String> {
        self.read(node, |n| n.spec.binding.clone()).flatten()
    }

    #[must_use]
    pub fn tag(&self, node: NodeId) -> String {
        self.read(node, |n| n.spec.tag.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn classes(&self, node: NodeId) -> Vec<String> {
        self.read(node, |n| n.classes.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_visible(&self, node: NodeId) -> bool {
        self.read(node, |n| n.visible).unwrap_or(false)
    }

    /// Whether the node is reachable from the root.
    #[must_use]
    pub fn is_attached(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == self.root() {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    /// Children of `container` that are rendered list items, in order.
    #[must_use]
    pub fn rendered(&self, container: NodeId) -> Vec<NodeId> {
        self.children(container)
            .into_iter()
            .filter(|n| self.render_meta(*n).is_some())
            .collect()
    }

    /// First descendant of `scope` (in document order) showing `prop`.
    #[must_use]
    pub fn find_prop(&self, scope: NodeId, prop: &str) -> Option<NodeId> {
        self.descendants(scope)
            .into_iter()
            .find(|n| self.prop(*n).as_deref() == Some(prop))
    }

    /// Content of the first descendant of `scope` showing `prop`.
    #[must_use]
    pub fn prop_text(&self, scope: NodeId, prop: &str) -> Option<String> {
        self.find_prop(scope, prop).map(|n| self.content(n))
    }

    /// Content of `prop` in each rendered item of `container`.
    #[must_use]
    pub fn item_texts(&self, container: NodeId, prop: &str) -> Vec<String> {
        self.rendered(container)
            .into_iter()
            .filter_map(|item| self.prop_text(item, prop))
            .collect()
    }

    /// Descendants of `scope` in document order, excluding `scope`.
    #[must_use]
    pub fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).into_iter().rev().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n).into_iter().rev());
        }
        out
    }

    /// Indented outline of the attached tree, for assertion messages.
    #[must_use]
    pub fn outline(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(self.root(), 0usize)];
        while let Some((n, depth)) = stack.pop() {
            let hidden = if self.is_visible(n) { "" } else { " hidden" };
            let key = self
                .render_meta(n)
                .map(|m| format!(" key={}", m.key))
                .unwrap_or_default();
            out.push_str(&format!(
                "{:indent$}<{}{}{}> {}\n",
                "",
                self.tag(n),
                key,
                hidden,
                self.content(n),
                indent = depth * 2
            ));
            for child in self.children(n).into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }

    // -- internals -----------------------------------------------------------

    fn read<R>(&self, node: NodeId, f: impl FnOnce(&Node) -> R) -> Option<R> {
        self.nodes.borrow().get(node.0 as usize).map(f)
    }

    fn with_node(&self, node: NodeId, f: impl FnOnce(&mut Node)) {
        if let Some(n) = self.nodes.borrow_mut().get_mut(node.0 as usize) {
            f(n);
        }
    }

    fn bump(&self, f: impl FnOnce(&mut DomCounters)) {
        let mut counters = self.counters.get();
        f(&mut counters);
        self.counters.set(counters);
    }

    fn detach(&self, node: NodeId) -> bool {
        let Some(parent) = self.parent(node) else {
            return false;
        };
        self.with_node(parent, |p| p.children.retain(|c| *c != node));
        self.with_node(node, |n| n.parent = None);
        true
    }

    fn attach(&self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.with_node(parent, |p| p.children.push(child));
        self.with_node(child, |n| n.parent = Some(parent));
    }

    /// Attached nodes in document order.
    fn attached(&self) -> Vec<NodeId> {
        let mut all = vec![self.root()];
        all.extend(self.descendants(self.root()));
        all
    }

    fn copy_subtree(&self, node: NodeId) -> Option<NodeId> {
        let mut copy = self.read(node, Node::clone)?;
        copy.parent = None;
        let children = std::mem::take(&mut copy.children);
        let id = {
            let mut nodes = self.nodes.borrow_mut();
            nodes.push(copy);
            NodeId(nodes.len() as u64 - 1)
        };
        for child in children {
            if let Some(child_copy) = self.copy_subtree(child) {
                self.attach(id, child_copy);
            }
        }
        Some(id)
    }
}

impl ViewProvider for MockDom {
    fn bound_nodes(&self, root: &str) -> Vec<NodeId> {
        self.attached()
            .into_iter()
            .filter(|n| {
                self.bound(*n)
                    .is_some_and(|b| path::is_within(&b, root) && !root.is_empty())
            })
            .collect()
    }

    fn expression_nodes(&self) -> Vec<NodeId> {
        self.attached()
            .into_iter()
            .filter(|n| {
                self.read(*n, |node| node.spec.show_if.is_some() || node.spec.class_expr.is_some())
                    .unwrap_or(false)
            })
            .collect()
    }

    fn prop_nodes(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).into_iter().rev().collect();
        while let Some(n) = stack.pop() {
            if self.prop(n).is_some() {
                out.push(n);
            } else {
                stack.extend(self.children(n).into_iter().rev());
            }
        }
        out
    }

    fn binding(&self, node: NodeId) -> Option<String> {
        self.bound(node)
    }

    fn prop(&self, node: NodeId) -> Option<String> {
        self.read(node, |n| n.spec.prop.clone()).flatten()
    }

    fn input_kind(&self, node: NodeId) -> Option<InputKind> {
        self.read(node, |n| n.spec.input).flatten()
    }

    fn display_condition(&self, node: NodeId) -> Option<String> {
        self.read(node, |n| n.spec.show_if.clone()).flatten()
    }

    fn class_expression(&self, node: NodeId) -> Option<String> {
        self.read(node, |n| n.spec.class_expr.clone()).flatten()
    }

    fn click_action(&self, node: NodeId) -> Option<ClickAction> {
        self.read(node, |n| n.spec.click.clone()).flatten()
    }

    fn content(&self, node: NodeId) -> String {
        self.read(node, |n| n.content.clone()).unwrap_or_default()
    }

    fn set_content(&self, node: NodeId, text: &str) {
        self.bump(|c| c.content_writes += 1);
        self.with_node(node, |n| n.content = text.to_owned());
    }

    fn input_value(&self, node: NodeId) -> Option<InputValue> {
        self.read(node, |n| n.input_value.clone()).flatten()
    }

    fn set_input_value(&self, node: NodeId, value: InputValue) {
        self.bump(|c| c.input_writes += 1);
        self.with_node(node, |n| n.input_value = Some(value));
    }

    fn add_class(&self, node: NodeId, class: &str) {
        self.with_node(node, |n| {
            if !n.classes.iter().any(|c| c == class) {
                n.classes.push(class.to_owned());
            }
        });
    }

    fn remove_class(&self, node: NodeId, class: &str) {
        self.with_node(node, |n| n.classes.retain(|c| c != class));
    }

    fn set_visible(&self, node: NodeId, visible: bool) {
        self.with_node(node, |n| n.visible = visible);
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.read(node, |n| n.parent).flatten()
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.read(node, |n| n.children.clone()).unwrap_or_default()
    }

    fn clone_node(&self, node: NodeId) -> NodeId {
        self.bump(|c| c.clones += 1);
        let copy = self.copy_subtree(node);
        trace!(source = %node, copy = ?copy, "node cloned");
        // Cloning an unknown node yields a fresh empty one.
        copy.unwrap_or_else(|| {
            let mut nodes = self.nodes.borrow_mut();
            nodes.push(Node::new(El::new("div")));
            NodeId(nodes.len() as u64 - 1)
        })
    }

    fn append_child(&self, parent: NodeId, child: NodeId) {
        self.attach(parent, child);
    }

    fn remove(&self, node: NodeId) {
        if self.detach(node) {
            self.bump(|c| c.removals += 1);
        }
    }

    fn render_meta(&self, node: NodeId) -> Option<RenderMeta> {
        self.read(node, |n| n.meta.clone()).flatten()
    }

    fn set_render_meta(&self, node: NodeId, meta: RenderMeta) {
        self.with_node(node, |n| n.meta = Some(meta));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_move() {
        let dom = MockDom::new();
        let a = dom.append(dom.root(), El::new("a"));
        let b = dom.append(dom.root(), El::new("b"));
        let c = dom.append(a, El::new("c"));
        dom.append_child(b, c);
        assert!(dom.children(a).is_empty());
        assert_eq!(dom.children(b), vec![c]);
        assert_eq!(dom.parent(c), Some(b));
    }

    #[test]
    fn clones_are_deep_and_detached() {
        let dom = MockDom::new();
        let li = dom.append(dom.root(), El::new("li").bind("todos"));
        dom.append(li, El::new("span").prop("title").text("x"));
        let copy = dom.clone_node(li);
        assert!(!dom.is_attached(copy));
        assert_eq!(dom.prop_text(copy, "title").as_deref(), Some("x"));
        assert_ne!(dom.find_prop(copy, "title"), dom.find_prop(li, "title"));
        assert_eq!(dom.counters().clones, 1);
    }

    #[test]
    fn bound_nodes_are_attached_and_scoped() {
        let dom = MockDom::new();
        let user = dom.append(dom.root(), El::new("div").bind("user"));
        let name = dom.append(dom.root(), El::new("span").bind("user.name"));
        dom.append(dom.root(), El::new("span").bind("username"));
        let detached = dom.clone_node(user);
        assert_eq!(dom.bound_nodes("user"), vec![user, name]);
        assert!(!dom.bound_nodes("user").contains(&detached));
    }

    #[test]
    fn prop_nodes_stop_at_props() {
        let dom = MockDom::new();
        let item = dom.append(dom.root(), El::new("li"));
        let wrapper = dom.append(item, El::new("div"));
        let title = dom.append(wrapper, El::new("span").prop("title"));
        let tags = dom.append(item, El::new("ul").prop("tags"));
        dom.append(tags, El::new("li").prop(""));
        assert_eq!(dom.prop_nodes(item), vec![title, tags]);
    }

    #[test]
    fn remove_counts_only_attached_nodes() {
        let dom = MockDom::new();
        let a = dom.append(dom.root(), El::new("a"));
        dom.remove(a);
        dom.remove(a);
        assert_eq!(dom.counters().removals, 1);
        assert!(!dom.is_attached(a));
    }

    #[test]
    fn inputs_start_empty() {
        let dom = MockDom::new();
        let n = dom.append(dom.root(), El::new("input").input(InputKind::Number));
        assert_eq!(dom.input_value(n), Some(InputValue::Number(None)));
    }
}
