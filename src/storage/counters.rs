//! Durable interaction counters.

use crate::storage::StateStore;
use log::warn;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Persisted key holding the JSON counter map.
pub const COUNTERS_KEY: &str = "interactionCounters";

pub const REWRITE_COUNT: &str = "rewriteCount";
pub const RESET_COUNT: &str = "resetCount";
pub const ITEM_COUNT: &str = "itemCount";

/// Named non-negative counters, persisted as a whole after every mutation.
///
/// The persisted map is overwritten, never merged, so the full map is
/// loaded once at construction.
pub struct CounterState {
    store: Arc<dyn StateStore>,
    counters: Mutex<BTreeMap<String, u64>>,
    degraded: AtomicBool,
}

impl CounterState {
    /// Load the persisted counter map, or start from zeroed defaults.
    pub fn load(store: Arc<dyn StateStore>) -> Self {
        let mut degraded = false;
        let counters = match store.get(COUNTERS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<BTreeMap<String, u64>>(&raw) {
                Ok(counters) => counters,
                Err(e) => {
                    warn!("Persisted counters unreadable, starting from zero: {}", e);
                    default_counters()
                }
            },
            Ok(None) => default_counters(),
            Err(e) => {
                warn!("Counter store unavailable, counters kept in memory only: {}", e);
                degraded = true;
                default_counters()
            }
        };

        CounterState {
            store,
            counters: Mutex::new(counters),
            degraded: AtomicBool::new(degraded),
        }
    }

    /// Add one to `name` and return the new value.
    pub fn increment(&self, name: &str) -> u64 {
        let mut counters = self.counters.lock();
        let value = counters.entry(name.to_string()).or_insert(0);
        *value = value.saturating_add(1);
        let new_value = *value;
        self.persist(&counters);
        new_value
    }

    pub fn set(&self, name: &str, value: u64) {
        let mut counters = self.counters.lock();
        counters.insert(name.to_string(), value);
        self.persist(&counters);
    }

    /// Current value; unknown counters read as zero.
    pub fn get(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters.lock().clone()
    }

    /// True once any load or save has failed in this process.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn persist(&self, counters: &BTreeMap<String, u64>) {
        let result = serde_json::to_string(counters)
            .map_err(crate::error::StoreError::from)
            .and_then(|json| self.store.set(COUNTERS_KEY, &json));

        if let Err(e) = result {
            if !self.degraded.swap(true, Ordering::Relaxed) {
                warn!("Failed to persist counters, continuing in memory: {}", e);
            }
        }
    }
}

fn default_counters() -> BTreeMap<String, u64> {
    let mut counters = BTreeMap::new();
    counters.insert(REWRITE_COUNT.to_string(), 0);
    counters.insert(RESET_COUNT.to_string(), 0);
    counters
}
