//! Read-only configuration store.
//!
//! A [`ConfigStore`] holds the merged configuration tree produced by the
//! [`ConfigLoader`](crate::ConfigLoader) and resolves dotted key paths such
//! as `bundles.client.webPath` to typed values.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::ConfigError;

/// Immutable configuration tree addressed by dotted key paths.
///
/// Cloning is cheap; all clones share the same tree.
///
/// # Example
///
/// ```
/// use meridian_config::ConfigStore;
/// use serde_json::json;
///
/// let store = ConfigStore::from_value(json!({
///     "serviceWorker": { "enabled": true, "fileName": "sw.js" }
/// }));
///
/// let file: String = store.get("serviceWorker.fileName").unwrap();
/// assert_eq!(file, "sw.js");
/// assert!(store.get::<bool>("serviceWorker.missing").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: Arc<Value>,
}

impl ConfigStore {
    /// Wraps an already-merged configuration tree.
    #[must_use]
    pub fn from_value(root: Value) -> Self {
        Self {
            root: Arc::new(root),
        }
    }

    /// Returns the raw value at `path`, if present and not null.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut current = self.root.as_ref();
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }

    /// Returns `true` if `path` resolves to a non-null value.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    /// Resolves `path` and deserializes it into `T`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingKey`] if the path does not resolve
    /// - [`ConfigError::InvalidKey`] if the value has the wrong shape
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ConfigError> {
        let value = self
            .lookup(path)
            .ok_or_else(|| ConfigError::missing_key(path))?;
        T::deserialize(value).map_err(|e| ConfigError::invalid_key(path, e.to_string()))
    }

    /// Like [`get`](Self::get), but an absent path yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidKey`] if the value has the wrong shape.
    pub fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ConfigError> {
        match self.get(path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_missing_key() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns the whole tree.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.root
    }
}
