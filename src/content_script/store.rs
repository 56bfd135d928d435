//! Key/value bag filled by the worker, read by the pilot.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::Result;

/// Data relayed from the worker through `storeFromWorker`.
///
/// Writers merge whole objects; readers must await the worker call that
/// fills a key before reading it.
#[derive(Debug, Default)]
pub struct Store {
    values: RwLock<Map<String, Value>>,
}

impl Store {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges top-level keys of `object`, replacing existing ones.
    pub fn merge(&self, object: Map<String, Value>) {
        self.values.write().extend(object);
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Deserializes the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the value has the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Returns a copy of everything stored.
    #[must_use]
    pub fn snapshot(&self) -> Map<String, Value> {
        self.values.read().clone()
    }

    /// Removes everything.
    pub fn clear(&self) {
        self.values.write().clear();
    }
}
