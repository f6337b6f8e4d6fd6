#![forbid(unsafe_code)]

//! Persistence of root variables.
//!
//! A persisted variable is stored as a JSON string under
//! `{storage_prefix}{name}`. On registration a stored snapshot wins over the
//! supplied value; otherwise the supplied value is written. After each flush
//! of a persisted variable its current value is written back.
//!
//! Storage failures never reach the caller: they are logged with `warn!`
//! and the store keeps working on the in-memory value.
//!
//! # Backends
//!
//! - [`MemoryStorage`]: shared in-process map, with optional quota and an
//!   availability switch for exercising failure paths.
//! - [`FileStorage`] (feature `state-persistence`): one `<key>.json` file per
//!   key under a base directory.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ahash::AHashMap;
use tracing::warn;

use crate::error::PersistError;

/// String-keyed storage of serialized snapshots.
pub trait Storage {
    fn get_item(&self, key: &str) -> Result<Option<String>, PersistError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), PersistError>;
    fn remove_item(&self, key: &str) -> Result<(), PersistError>;
}

/// In-memory storage. Clones share the same map.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    items: Rc<RefCell<AHashMap<String, String>>>,
    quota: Rc<Cell<Option<usize>>>,
    available: Rc<Cell<bool>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self {
            items: Rc::default(),
            quota: Rc::new(Cell::new(None)),
            available: Rc::new(Cell::new(true)),
        }
    }
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes whose value is longer than `limit` bytes.
    #[must_use]
    pub fn with_quota(self, limit: usize) -> Self {
        self.quota.set(Some(limit));
        self
    }

    /// Make every operation fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    fn check(&self) -> Result<(), PersistError> {
        if self.available.get() {
            Ok(())
        } else {
            Err(PersistError::Unavailable {
                reason: "storage disabled".to_owned(),
            })
        }
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, PersistError> {
        self.check()?;
        Ok(self.items.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), PersistError> {
        self.check()?;
        if let Some(limit) = self.quota.get() {
            if value.len() > limit {
                return Err(PersistError::QuotaExceeded {
                    key: key.to_owned(),
                    size: value.len(),
                    limit,
                });
            }
        }
        self.items
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), PersistError> {
        self.check()?;
        self.items.borrow_mut().remove(key);
        Ok(())
    }
}

#[cfg(feature = "state-persistence")]
pub use file::FileStorage;

#[cfg(feature = "state-persistence")]
mod file {
    use std::fs;
    use std::io::ErrorKind;
    use std::path::{Path, PathBuf};

    use super::Storage;
    use crate::error::PersistError;

    /// One `<key>.json` file per key under a base directory.
    #[derive(Debug, Clone)]
    pub struct FileStorage {
        base_path: PathBuf,
    }

    impl FileStorage {
        #[must_use]
        pub fn new(base_path: impl Into<PathBuf>) -> Self {
            Self {
                base_path: base_path.into(),
            }
        }

        #[must_use]
        pub fn base_path(&self) -> &Path {
            &self.base_path
        }

        /// Percent-encode every byte outside `[A-Za-z0-9_-]`, so distinct
        /// keys never share a file.
        fn path_for(&self, key: &str) -> PathBuf {
            let mut name = String::with_capacity(key.len());
            for byte in key.bytes() {
                if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-') {
                    name.push(char::from(byte));
                } else {
                    name.push_str(&format!("%{byte:02X}"));
                }
            }
            self.base_path.join(format!("{name}.json"))
        }
    }

    impl Storage for FileStorage {
        fn get_item(&self, key: &str) -> Result<Option<String>, PersistError> {
            match fs::read_to_string(self.path_for(key)) {
                Ok(contents) => Ok(Some(contents)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        }

        fn set_item(&self, key: &str, value: &str) -> Result<(), PersistError> {
            fs::create_dir_all(&self.base_path)?;
            // Atomic replace.
            let path = self.path_for(key);
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, value)?;
            fs::rename(&tmp, &path)?;
            Ok(())
        }

        fn remove_item(&self, key: &str) -> Result<(), PersistError> {
            match fs::remove_file(self.path_for(key)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }

}

/// Store-side persistence policy around a [`Storage`] backend.
pub(crate) struct Persistence {
    storage: Rc<dyn Storage>,
    prefix: String,
}

impl Persistence {
    pub(crate) fn new(storage: Rc<dyn Storage>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
        }
    }

    pub(crate) fn set_storage(&mut self, storage: Rc<dyn Storage>) {
        self.storage = storage;
    }

    pub(crate) fn key(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    /// Stored snapshot for `name` if one exists and parses; otherwise write
    /// `initial` and return `None`.
    pub(crate) fn restore_or_seed(
        &self,
        name: &str,
        initial: Option<&serde_json::Value>,
    ) -> Option<serde_json::Value> {
        let key = self.key(name);
        match self.storage.get_item(&key) {
            Ok(Some(stored)) => match serde_json::from_str(&stored) {
                Ok(json) => return Some(json),
                Err(e) => {
                    warn!(variable = name, %key, error = %e, "discarding unreadable snapshot");
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(variable = name, %key, error = %e, "persistence read failed");
                return None;
            }
        }
        if let Some(initial) = initial {
            self.write(name, initial);
        }
        None
    }

    /// Write the current snapshot. Failures are logged.
    pub(crate) fn write(&self, name: &str, value: &serde_json::Value) {
        let key = self.key(name);
        let result = serde_json::to_string(value)
            .map_err(PersistError::from)
            .and_then(|text| self.storage.set_item(&key, &text));
        if let Err(e) = result {
            warn!(
                variable = name,
                %key,
                error = %e,
                "persistence write failed; keeping in-memory value"
            );
        }
    }
}
