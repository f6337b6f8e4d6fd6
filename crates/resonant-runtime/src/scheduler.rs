#![forbid(unsafe_code)]

//! Per-variable batching of mutation records.
//!
//! # Invariants
//!
//! 1. A variable is armed at most once at a time: the first record queued for
//!    it arms a flush, later records only append.
//! 2. Flushes run in arming order.
//! 3. A tick flushes only the variables armed when it started; records queued
//!    during the tick arm a flush for the next one.
//! 4. Deduplication keeps one record per [`RecordKey`], at the position of the
//!    key's first occurrence, carrying its latest payload.

use std::collections::VecDeque;

use ahash::AHashMap;
use indexmap::IndexMap;
use resonant_core::{MutationRecord, RecordKey, path};
use tracing::trace;

/// Records drained for one variable.
#[derive(Debug)]
pub(crate) struct Batch {
    pub(crate) variable: String,
    pub(crate) records: Vec<MutationRecord>,
    /// Relative paths invalidated by the batch.
    pub(crate) changed: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    pending: AHashMap<String, Vec<MutationRecord>>,
    armed: VecDeque<String>,
}

impl Scheduler {
    /// Queue a record. Returns `true` when this armed a new flush.
    pub(crate) fn enqueue(&mut self, record: MutationRecord) -> bool {
        let variable = record.variable.clone();
        match self.pending.get_mut(&variable) {
            Some(records) => {
                records.push(record);
                trace!(variable = %variable, queued = records.len(), "record appended");
                false
            }
            None => {
                self.pending.insert(variable.clone(), vec![record]);
                trace!(variable = %variable, "flush armed");
                self.armed.push_back(variable);
                true
            }
        }
    }

    /// Number of flushes currently armed.
    pub(crate) fn armed(&self) -> usize {
        self.armed.len()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.armed.is_empty()
    }

    /// Disarm the oldest armed variable and hand over its records.
    pub(crate) fn next_batch(&mut self) -> Option<Batch> {
        let variable = self.armed.pop_front()?;
        let records = self.pending.remove(&variable).unwrap_or_default();
        let changed = changed_paths(&records);
        Some(Batch {
            variable,
            records,
            changed,
        })
    }
}

/// Relative paths invalidated by `records`, in first-seen order.
///
/// A record queued before an index operation on an enclosing list may name
/// its item by a stale index, so that list is invalidated whole.
fn changed_paths(records: &[MutationRecord]) -> Vec<String> {
    fn add(changed: &mut Vec<String>, path: String) {
        if !changed.contains(&path) {
            changed.push(path);
        }
    }

    let mut changed = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if let Some(path) = record.changed_path() {
            add(&mut changed, path);
        }
        let stale = record.index.is_some()
            && records[..i].iter().any(|earlier| {
                earlier.changed_path().is_some()
                    && earlier.path != record.path
                    && path::is_within(&earlier.path, &record.path)
            });
        if stale {
            add(&mut changed, record.path.clone());
        }
    }
    changed
}

/// Collapse records sharing a [`RecordKey`].
///
/// The surviving record sits where the key first appeared and carries the
/// payload of its last occurrence.
#[must_use]
pub fn dedupe(records: Vec<MutationRecord>) -> Vec<MutationRecord> {
    let mut seen: IndexMap<RecordKey, MutationRecord> = IndexMap::with_capacity(records.len());
    for record in records {
        seen.insert(record.dedupe_key(), record);
    }
    seen.into_values().collect()
}
