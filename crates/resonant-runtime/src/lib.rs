#![forbid(unsafe_code)]

//! Runtime: the store, its update scheduler, and view reconciliation.
//!
//! A [`Store`] holds named root variables. Mutating a bound value queues a
//! record; [`Store::tick`] delivers queued records to subscribers,
//! recomputes affected computed properties, and projects the variable onto
//! an attached [`ViewProvider`].
//!
//! ```
//! use resonant_runtime::Store;
//! use resonant_core::Value;
//!
//! let store = Store::new();
//! store.add("a", 1).unwrap();
//! store.add("b", 2).unwrap();
//! store
//!     .computed("sum", |s| {
//!         let n = |name| s.get(name).and_then(|v| v.as_f64()).unwrap_or(0.0);
//!         Value::from(n("a") + n("b"))
//!     })
//!     .unwrap();
//!
//! store.set("a", 5).unwrap();
//! store.tick();
//! assert_eq!(store.peek("sum").and_then(|v| v.as_f64()), Some(7.0));
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod persist;
mod project;
pub mod reconcile;
pub mod scheduler;
mod source;
pub mod store;
mod tracker;
pub mod view;

pub use bus::{Callback, Subscription};
pub use config::StoreConfig;
pub use error::{PersistError, Result, SourceError, StoreError};
#[cfg(feature = "state-persistence")]
pub use persist::FileStorage;
pub use persist::{MemoryStorage, Storage};
pub use reconcile::{ItemSpec, Placement, Plan, PlanStats, plan};
pub use scheduler::dedupe;
pub use store::{Handler, Store, WeakStore};
pub use tracker::Derivation;
pub use view::{ClickAction, InputKind, InputValue, NodeId, RenderMeta, ViewProvider};
