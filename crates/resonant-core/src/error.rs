use thiserror::Error;

/// A mutation the observation layer refused to apply.
///
/// A rejected mutation leaves the container untouched and emits no record.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MutationError {
    #[error("invalid array length: {0}")]
    InvalidLength(f64),

    #[error("path does not name a container: {path}")]
    NotAContainer { path: String },

    #[error("invalid array index {segment:?} in path {path}")]
    InvalidIndex { path: String, segment: String },
}

/// Failure while snapshotting a value graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("cyclic reference at {path:?}")]
    Cycle { path: String },
}

/// Failure to parse or evaluate a view expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("parse error at offset {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("unknown identifier {0:?}")]
    UnknownIdentifier(String),

    #[error("cannot read property {0:?} of null")]
    NullAccess(String),
}

impl ExprError {
    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }
}
