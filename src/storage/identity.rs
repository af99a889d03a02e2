//! Participant identity.
//!
//! The user id is generated once, persisted under [`USER_ID_KEY`], and then
//! returned unchanged for as long as the persisted value exists.

use crate::storage::StateStore;
use log::{info, warn};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;

/// Persisted key holding the decimal user id.
pub const USER_ID_KEY: &str = "userId";

/// Inclusive upper bound of generated user ids.
pub const MAX_GENERATED_USER_ID: u64 = 500;

/// Resolves and persists the participant's user id.
pub struct IdentityStore {
    store: Arc<dyn StateStore>,
    resolved: Mutex<Option<u64>>,
    ephemeral: Mutex<bool>,
}

impl IdentityStore {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        IdentityStore {
            store,
            resolved: Mutex::new(None),
            ephemeral: Mutex::new(false),
        }
    }

    /// Return the persisted user id, generating and persisting one on first use.
    ///
    /// Never fails: if the store cannot be read or written the id is kept for
    /// this process only.
    pub fn get_or_create_user_id(&self) -> u64 {
        let mut resolved = self.resolved.lock();
        if let Some(user_id) = *resolved {
            return user_id;
        }

        let user_id = match self.store.get(USER_ID_KEY) {
            Ok(Some(raw)) => match raw.trim().parse::<u64>() {
                Ok(user_id) => user_id,
                Err(_) => {
                    warn!("Persisted user id '{}' is not an integer, replacing it", raw);
                    self.generate_and_persist()
                }
            },
            Ok(None) => self.generate_and_persist(),
            Err(e) => {
                warn!("Identity store unreadable, using ephemeral user id: {}", e);
                *self.ephemeral.lock() = true;
                generate_user_id()
            }
        };

        *resolved = Some(user_id);
        user_id
    }

    /// Persist an externally assigned participant id, replacing any other.
    pub fn assign(&self, user_id: u64) -> u64 {
        let mut resolved = self.resolved.lock();
        if let Err(e) = self.store.set(USER_ID_KEY, &user_id.to_string()) {
            warn!("Failed to persist assigned user id {}: {}", user_id, e);
            *self.ephemeral.lock() = true;
        }
        *resolved = Some(user_id);
        user_id
    }

    /// True when the current id could not be persisted.
    pub fn is_ephemeral(&self) -> bool {
        *self.ephemeral.lock()
    }

    fn generate_and_persist(&self) -> u64 {
        let user_id = generate_user_id();
        match self.store.set(USER_ID_KEY, &user_id.to_string()) {
            Ok(()) => info!("Generated new user id {}", user_id),
            Err(e) => {
                warn!("Failed to persist user id, it will not survive restart: {}", e);
                *self.ephemeral.lock() = true;
            }
        }
        user_id
    }
}

fn generate_user_id() -> u64 {
    rand::thread_rng().gen_range(0..=MAX_GENERATED_USER_ID)
}
