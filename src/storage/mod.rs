//! Persisted participant state.
//!
//! Two pieces of state outlive a session:
//! - **Identity**: the participant's integer user id (`userId`)
//! - **Counters**: the interaction counter map (`interactionCounters`)
//!
//! Both sit on top of a [`StateStore`], a string key/value store with three
//! backends: in-memory, JSON file and SQLite. Store failures never reach the
//! caller; identity and counters fall back to in-memory state instead.

pub mod counters;
pub mod file_store;
pub mod identity;
pub mod sqlite_store;
pub mod store;

pub use counters::{CounterState, COUNTERS_KEY, ITEM_COUNT, RESET_COUNT, REWRITE_COUNT};
pub use file_store::FileStore;
pub use identity::{IdentityStore, USER_ID_KEY};
pub use sqlite_store::SqliteStore;
pub use store::{MemoryStore, StateStore};
