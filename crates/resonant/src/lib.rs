#![forbid(unsafe_code)]

//! Resonant public facade crate.
//!
//! Re-exports the observable values of `resonant-core` and the store of
//! `resonant-runtime`.
//!
//! ```
//! use resonant::prelude::*;
//!
//! let store = Store::new();
//! store.add("todos", ObservableArray::new()).unwrap();
//! let todos = store.get("todos").and_then(|v| v.as_array().cloned()).unwrap();
//! todos.push("write docs");
//! assert_eq!(store.tick(), 1);
//! ```

pub mod prelude {
    pub use resonant_core as core;
    pub use resonant_runtime as runtime;

    pub use resonant_core::{
        Action, ExpressionEvaluator, MutationRecord, ObservableArray, ObservableObject,
        RestrictedEvaluator, Value,
    };
    #[cfg(feature = "state-persistence")]
    pub use resonant_runtime::FileStorage;
    pub use resonant_runtime::{
        InputValue, MemoryStorage, NodeId, Storage, Store, StoreConfig, StoreError, Subscription,
        ViewProvider,
    };
}
