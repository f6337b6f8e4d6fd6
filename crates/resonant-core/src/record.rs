#![forbid(unsafe_code)]

//! Mutation records emitted by the observation layer.
//!
//! Every intercepted mutation produces one [`MutationRecord`]. Records are
//! queued per root variable and deduplicated by [`RecordKey`] before they
//! are delivered.

use std::fmt;

use crate::path;
use crate::value::Value;

/// What happened to the variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// An item was inserted into a root array.
    Added,
    /// An item or property was removed.
    Removed,
    /// A property, index, or the variable itself was reassigned.
    Modified,
    /// A root array's contents were replaced in bulk.
    Updated,
    /// A notifying, non-mutating filter ran over a root array.
    Filtered,
}

impl Action {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
            Self::Updated => "updated",
            Self::Filtered => "filtered",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplication key: `(action, property, index, path)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub action: Action,
    pub property: Option<String>,
    pub index: Option<usize>,
    pub path: String,
}

/// One pending update for a root variable.
#[derive(Debug, Clone)]
pub struct MutationRecord {
    /// Root variable the mutation belongs to.
    pub variable: String,
    pub action: Action,
    /// The container or value the mutation produced, when there is one.
    pub item: Option<Value>,
    /// Property name for object mutations.
    pub property: Option<String>,
    /// Value before the mutation.
    pub old_value: Option<Value>,
    /// Array index for array mutations.
    pub index: Option<usize>,
    /// Dot-path relative to the root variable.
    pub path: String,
}

impl MutationRecord {
    #[must_use]
    pub fn new(variable: impl Into<String>, action: Action) -> Self {
        Self {
            variable: variable.into(),
            action,
            item: None,
            property: None,
            old_value: None,
            index: None,
            path: String::new(),
        }
    }

    #[must_use]
    pub fn with_item(mut self, item: Value) -> Self {
        self.item = Some(item);
        self
    }

    #[must_use]
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    #[must_use]
    pub fn with_old_value(mut self, old: Option<Value>) -> Self {
        self.old_value = old;
        self
    }

    #[must_use]
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Key used to collapse repeated records within one batch.
    #[must_use]
    pub fn dedupe_key(&self) -> RecordKey {
        RecordKey {
            action: self.action,
            property: self.property.clone(),
            index: self.index,
            path: self.path.clone(),
        }
    }

    /// Relative path whose view nodes this record invalidates.
    ///
    /// Array records extend the array path by the index; a notifying filter
    /// changes nothing.
    #[must_use]
    pub fn changed_path(&self) -> Option<String> {
        if self.action == Action::Filtered {
            return None;
        }
        Some(match self.index {
            Some(index) => path::join_index(&self.path, index),
            None => self.path.clone(),
        })
    }

    /// The value a subscriber sees as "the item": the new item, or the old
    /// value for removals.
    #[must_use]
    pub fn subject(&self) -> Option<&Value> {
        self.item.as_ref().or(self.old_value.as_ref())
    }
}
