//! ============================================================================
//! MemLedgerStore - In-memory ledger store
//! ============================================================================
//! Map-backed adapter with the same transaction semantics as the redb store:
//! the mutation closure runs against a copy and the copy replaces the stored
//! state only on success. Used by tests and ephemeral ledgers.
//! ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;

use super::{LedgerStore, UserState};
use crate::types::{LedgerError, Result};

/// In-memory ledger store.
#[derive(Default)]
pub struct MemLedgerStore {
    users: Mutex<HashMap<String, UserState>>,
}

impl MemLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemLedgerStore {
    fn read_user(&self, user_id: &str) -> Result<Option<UserState>> {
        let users = self
            .users
            .lock()
            .map_err(|_| LedgerError::Storage("ledger map lock poisoned".into()))?;
        Ok(users.get(user_id).cloned())
    }

    fn mutate_user<R>(
        &self,
        user_id: &str,
        op: impl FnOnce(&mut UserState) -> Result<R>,
    ) -> Result<R> {
        // The lock is held across the whole mutation, serializing concurrent
        // operations on the same user exactly like the redb writer lock.
        let mut users = self
            .users
            .lock()
            .map_err(|_| LedgerError::Storage("ledger map lock poisoned".into()))?;
        let mut state = users
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserState::new(user_id));
        let result = op(&mut state)?;
        users.insert(user_id.to_string(), state);
        Ok(result)
    }

    fn user_ids(&self) -> Result<Vec<String>> {
        let users = self
            .users
            .lock()
            .map_err(|_| LedgerError::Storage("ledger map lock poisoned".into()))?;
        let mut ids: Vec<String> = users.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
