//! Key/value store abstraction for persisted state.

use crate::error::StoreError;
use parking_lot::RwLock;
use std::collections::HashMap;

/// String key/value persistence.
///
/// Values are string-serialized (integers as decimal, maps as JSON), the
/// same shape a browser's local storage would hold.
pub trait StateStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key was never written.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Overwrite a value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Volatile store, lost with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `pairs`.
    pub fn with_values<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        MemoryStore {
            values: RwLock::new(values),
        }
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
