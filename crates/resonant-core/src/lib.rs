#![forbid(unsafe_code)]

//! Core: observable values, identity keys, mutation records, dot-paths, and
//! the view expression language.
//!
//! Nothing in this crate knows about stores or views. Observable containers
//! report to a [`MutationSink`], which the runtime implements.

pub mod array;
pub mod binding;
pub mod error;
pub mod expr;
pub mod key;
pub mod object;
pub mod path;
pub mod record;
pub mod value;

pub use array::ObservableArray;
pub use binding::{Binding, MutationSink, detach, wrap};
pub use error::{ExprError, MutationError, ValueError};
pub use expr::{ExpressionEvaluator, ItemScope, RestrictedEvaluator, Scope};
pub use key::{ItemKey, KeyAllocator};
pub use object::ObservableObject;
pub use record::{Action, MutationRecord, RecordKey};
pub use value::Value;
