#![forbid(unsafe_code)]

//! Store configuration.
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```
//! use resonant_runtime::StoreConfig;
//!
//! let config = StoreConfig::from_json(r#"{ "storage_prefix": "app_" }"#).unwrap();
//! assert_eq!(config.storage_prefix, "app_");
//! assert_eq!(config.max_drain_ticks, 1024);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Default prefix for persisted keys.
pub const DEFAULT_STORAGE_PREFIX: &str = "res_";
/// Default bound on [`Store::run_until_idle`](crate::Store::run_until_idle).
pub const DEFAULT_MAX_DRAIN_TICKS: usize = 1024;
/// Default separator between parent and child keys of nested list items.
pub const DEFAULT_NESTED_KEY_SEPARATOR: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Prefix prepended to variable names to form storage keys.
    pub storage_prefix: String,
    /// Upper bound on ticks per `run_until_idle` call.
    pub max_drain_ticks: usize,
    /// Joins a parent item key and a nested item key.
    pub nested_key_separator: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_owned(),
            max_drain_ticks: DEFAULT_MAX_DRAIN_TICKS,
            nested_key_separator: DEFAULT_NESTED_KEY_SEPARATOR.to_owned(),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn with_storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_max_drain_ticks(mut self, ticks: usize) -> Self {
        self.max_drain_ticks = ticks;
        self
    }

    #[must_use]
    pub fn with_nested_key_separator(mut self, separator: impl Into<String>) -> Self {
        self.nested_key_separator = separator.into();
        self
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let config: Self = serde_json::from_str(json).map_err(|e| StoreError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.max_drain_ticks == 0 {
            return Err(StoreError::Config {
                message: "max_drain_ticks must be at least 1".to_owned(),
            });
        }
        if self.nested_key_separator.is_empty() {
            return Err(StoreError::Config {
                message: "nested_key_separator must not be empty".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.storage_prefix, "res_");
        assert_eq!(config.max_drain_ticks, 1024);
        assert_eq!(config.nested_key_separator, "/");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = StoreConfig::from_json(r#"{"max_drain_ticks": 8}"#).unwrap();
        assert_eq!(config.max_drain_ticks, 8);
        assert_eq!(config.storage_prefix, "res_");
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            StoreConfig::from_json(r#"{"max_drain_ticks": 0}"#),
            Err(StoreError::Config { .. })
        ));
        assert!(StoreConfig::from_json(r#"{"nested_key_separator": ""}"#).is_err());
        assert!(StoreConfig::from_json("not json").is_err());
    }

    #[test]
    fn builders_chain() {
        let config = StoreConfig::default()
            .with_storage_prefix("app_")
            .with_max_drain_ticks(3)
            .with_nested_key_separator(":");
        assert_eq!(config.storage_prefix, "app_");
        assert_eq!(config.max_drain_ticks, 3);
        assert_eq!(config.nested_key_separator, ":");
    }

    #[test]
    fn serializes_round_trip() {
        let config = StoreConfig::default().with_storage_prefix("x_");
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(StoreConfig::from_json(&json).unwrap(), config);
    }
}
