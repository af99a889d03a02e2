//! File store - JSON object file for persisted state.
//!
//! The whole key/value map is kept in memory and rewritten on every `set`
//! through a temp file and an atomic rename, so a crash mid-write leaves
//! the previous file intact.
//!
//! # File Format
//! ```text
//! {"interactionCounters":"{\"resetCount\":0,\"rewriteCount\":3}","userId":"42"}
//! ```

use crate::error::StoreError;
use crate::storage::{MemoryStore, StateStore};
use log::warn;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// JSON-file-backed state store.
pub struct FileStore {
    /// Path to state file
    path: PathBuf,

    /// Current contents; the file mirrors this after every `set`
    values: Mutex<BTreeMap<String, String>>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("keys", &self.values.lock().len())
            .finish()
    }
}

impl FileStore {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let values = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(FileStore {
            path,
            values: Mutex::new(values),
        })
    }

    /// Open the state file, or fall back to an in-memory store.
    ///
    /// An unreadable or corrupt file is logged and left untouched; state then
    /// lives for this process only.
    ///
    /// # Example
    /// ```rust,no_run
    /// use beacon::FileStore;
    ///
    /// let store = FileStore::open_or_memory("./var/beacon/state.json");
    /// ```
    pub fn open_or_memory<P: AsRef<Path>>(path: P) -> Arc<dyn StateStore> {
        let path = path.as_ref();
        match FileStore::open(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(
                    "State file {} unusable, keeping state in memory: {}",
                    path.display(),
                    e
                );
                Arc::new(MemoryStore::new())
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let json = serde_json::to_vec(values)?;

        let tmp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl StateStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock();
        let previous = values.insert(key.to_string(), value.to_string());

        if let Err(e) = self.persist(&values) {
            // Keep memory and disk in agreement
            match previous {
                Some(old) => values.insert(key.to_string(), old),
                None => values.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}
