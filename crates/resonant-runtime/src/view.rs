#![forbid(unsafe_code)]

//! The view a store projects into.
//!
//! A [`ViewProvider`] is a mutable node tree addressed by opaque [`NodeId`]s.
//! Nodes may carry:
//!
//! - a *binding*: the fully-qualified path of the value they show
//!   (`"count"`, `"user.name"`, `"todos"`);
//! - a *prop*: the property of the enclosing object they show (`"title"`;
//!   the empty prop `""` stands for a primitive list item);
//! - a display condition and a class expression;
//! - a click action.
//!
//! Rendered list items carry [`RenderMeta`] (identity key and index), which
//! is how the reconciler finds nodes it can reuse.
//!
//! Implementations must not call back into the store from any method.

use std::fmt;

/// Opaque node handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Text,
    Number,
    Checkbox,
}

/// Value held by an input node.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Text(String),
    /// `None` is an empty or unparsable number field.
    Number(Option<f64>),
    Checked(bool),
}

/// Reconciliation metadata stamped on rendered list items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderMeta {
    pub key: String,
    pub index: usize,
}

/// What clicking a node does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
    /// Invoke the named action registered on the store.
    Handler(String),
    /// Remove the first item of the enclosing list whose `prop` equals the
    /// clicked item's.
    RemoveBy(String),
}

pub trait ViewProvider {
    // -- discovery -----------------------------------------------------------

    /// Attached nodes bound to `root` or to a path under it.
    fn bound_nodes(&self, root: &str) -> Vec<NodeId>;

    /// Attached nodes with a display condition or class expression.
    fn expression_nodes(&self) -> Vec<NodeId>;

    /// Nearest descendants of `scope` that carry a prop. Does not descend
    /// into a prop node.
    fn prop_nodes(&self, scope: NodeId) -> Vec<NodeId>;

    // -- attributes ----------------------------------------------------------

    fn binding(&self, node: NodeId) -> Option<String>;
    fn prop(&self, node: NodeId) -> Option<String>;
    fn input_kind(&self, node: NodeId) -> Option<InputKind>;
    fn display_condition(&self, node: NodeId) -> Option<String>;
    fn class_expression(&self, node: NodeId) -> Option<String>;
    fn click_action(&self, node: NodeId) -> Option<ClickAction>;

    // -- content -------------------------------------------------------------

    fn content(&self, node: NodeId) -> String;
    fn set_content(&self, node: NodeId, text: &str);
    fn input_value(&self, node: NodeId) -> Option<InputValue>;
    fn set_input_value(&self, node: NodeId, value: InputValue);
    fn add_class(&self, node: NodeId, class: &str);
    fn remove_class(&self, node: NodeId, class: &str);
    fn set_visible(&self, node: NodeId, visible: bool);

    // -- structure -----------------------------------------------------------

    fn parent(&self, node: NodeId) -> Option<NodeId>;
    fn children(&self, node: NodeId) -> Vec<NodeId>;
    /// Deep copy, detached from the tree.
    fn clone_node(&self, node: NodeId) -> NodeId;
    /// Append `child` as the last child of `parent`, moving it if attached.
    fn append_child(&self, parent: NodeId, child: NodeId);
    /// Detach `node` from its parent.
    fn remove(&self, node: NodeId);

    fn render_meta(&self, node: NodeId) -> Option<RenderMeta>;
    fn set_render_meta(&self, node: NodeId, meta: RenderMeta);
}

/// `node` and its ancestors, innermost first.
pub(crate) fn ancestors(
    view: &dyn ViewProvider,
    node: NodeId,
) -> impl Iterator<Item = NodeId> + '_ {
    std::iter::successors(Some(node), move |n| view.parent(*n))
}
