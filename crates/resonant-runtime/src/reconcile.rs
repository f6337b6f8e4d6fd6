#![forbid(unsafe_code)]

//! Keyed list reconciliation.
//!
//! [`plan`] matches the current items of a list against the nodes rendered
//! last time, by key. It is pure: the projector applies the plan to the
//! view.
//!
//! # Invariants
//!
//! 1. A rendered node is reused for at most one item.
//! 2. A node is reused only when its key matches and the item is unchanged.
//! 3. Every rendered node is either reused or listed in `discard`.
//! 4. With no changes and identical keys, nothing is created or discarded.

use ahash::AHashMap;

use crate::view::NodeId;

/// One item of the current list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSpec {
    pub key: String,
    /// Whether the item's path was changed this tick.
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Reuse(NodeId),
    Fresh,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub reused: usize,
    pub created: usize,
    pub discarded: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// One entry per item, in item order.
    pub placements: Vec<Placement>,
    /// Rendered nodes no item claimed.
    pub discard: Vec<NodeId>,
}

impl Plan {
    #[must_use]
    pub fn stats(&self) -> PlanStats {
        let reused = self
            .placements
            .iter()
            .filter(|p| matches!(p, Placement::Reuse(_)))
            .count();
        PlanStats {
            reused,
            created: self.placements.len() - reused,
            discarded: self.discard.len(),
        }
    }
}

/// Match `items` against `existing` `(key, node)` pairs.
///
/// When several rendered nodes share a key, the first one is the candidate
/// and the rest are discarded.
#[must_use]
pub fn plan(existing: &[(String, NodeId)], items: &[ItemSpec]) -> Plan {
    let mut by_key: AHashMap<&str, NodeId> = AHashMap::with_capacity(existing.len());
    let mut discard = Vec::new();
    for (key, node) in existing {
        if by_key.contains_key(key.as_str()) {
            discard.push(*node);
        } else {
            by_key.insert(key.as_str(), *node);
        }
    }

    let placements = items
        .iter()
        .map(|item| {
            if item.changed {
                return Placement::Fresh;
            }
            match by_key.remove(item.key.as_str()) {
                Some(node) => Placement::Reuse(node),
                None => Placement::Fresh,
            }
        })
        .collect();

    discard.extend(
        existing
            .iter()
            .filter(|(key, node)| by_key.get(key.as_str()) == Some(node))
            .map(|(_, node)| *node),
    );

    Plan {
        placements,
        discard,
    }
}
