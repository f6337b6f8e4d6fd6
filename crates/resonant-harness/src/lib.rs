#![forbid(unsafe_code)]

//! Test harness for Resonant: an in-memory [`ViewProvider`] and a small
//! application fixture for end-to-end tests and benchmarks.
//!
//! [`ViewProvider`]: resonant_runtime::ViewProvider

pub mod dom;
pub mod fixtures;

pub use dom::{DomCounters, El, MockDom};
pub use fixtures::{TodoApp, todo_items};
