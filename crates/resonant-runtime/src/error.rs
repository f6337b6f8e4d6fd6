use resonant_core::{MutationError, ValueError};
use thiserror::Error;

use crate::view::NodeId;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown variable: {name}")]
    UnknownVariable { name: String },

    #[error("computed property is read-only: {name}")]
    ComputedReadOnly { name: String },

    #[error("node is not bound to an input: {node:?}")]
    UnboundNode { node: NodeId },

    #[error("no view attached")]
    NoView,

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("invalid store config: {message}")]
    Config { message: String },
}

impl StoreError {
    #[must_use]
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::UnknownVariable { name: name.into() }
    }

    #[must_use]
    pub fn read_only(name: impl Into<String>) -> Self {
        Self::ComputedReadOnly { name: name.into() }
    }
}

/// Storage adapter failure. Always recoverable: the store keeps the
/// in-memory value and logs.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage quota exceeded writing {key} ({size} bytes, limit {limit})")]
    QuotaExceeded { key: String, size: usize, limit: usize },

    #[error("storage unavailable: {reason}")]
    Unavailable { reason: String },
}

/// A deferred source failed to produce a value.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source rejected: {0}")]
    Rejected(String),

    #[error("source produced invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("source was dropped before resolving")]
    Canceled,
}

impl From<String> for SourceError {
    fn from(message: String) -> Self {
        Self::Rejected(message)
    }
}

impl From<&str> for SourceError {
    fn from(message: &str) -> Self {
        Self::Rejected(message.to_owned())
    }
}
