//! ============================================================================
//! RedbLedgerStore - Embedded Database (redb)
//! ============================================================================
//! Persistent ledger storage for accounts and entries.
//! Default path: ~/.tierledger/ledger.redb (override via TIERLEDGER_DB_PATH)
//! ============================================================================

use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{LedgerStore, UserState};
use crate::ledger::{Account, LedgerEntry};
use crate::types::{LedgerError, Result};

// Table definitions
const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");
const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// Embedded ledger store backed by redb.
pub struct RedbLedgerStore {
    db: Database,
    path: PathBuf,
}

impl RedbLedgerStore {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses TIERLEDGER_DB_PATH env var or
    /// ~/.tierledger/ledger.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("TIERLEDGER_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir()
                .ok_or_else(|| LedgerError::Storage("cannot determine home directory".into()))?;
            let ledger_dir = home.join(".tierledger");
            std::fs::create_dir_all(&ledger_dir).map_err(|e| {
                LedgerError::Storage(format!("failed to create .tierledger directory: {}", e))
            })?;
            ledger_dir.join("ledger.redb")
        };

        info!("Opening ledger database at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| LedgerError::Storage(format!("failed to open database: {}", e)))?;

        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| LedgerError::Storage(format!("failed to begin write: {}", e)))?;
        {
            let _ = write_txn
                .open_table(ACCOUNTS)
                .map_err(|e| LedgerError::Storage(format!("failed to create accounts table: {}", e)))?;
            let _ = write_txn
                .open_table(ENTRIES)
                .map_err(|e| LedgerError::Storage(format!("failed to create entries table: {}", e)))?;
        }
        write_txn
            .commit()
            .map_err(|e| LedgerError::Storage(format!("failed to commit init: {}", e)))?;

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry keys are "{user}:{index}" so one range scan loads a user's
    /// history in creation order. ':' is reserved as the separator.
    fn entry_key(user_id: &str, index: usize) -> String {
        format!("{}:{:010}", user_id, index)
    }

    fn check_user_id(user_id: &str) -> Result<()> {
        if user_id.is_empty() || user_id.contains(':') {
            return Err(LedgerError::Storage(format!(
                "invalid user id {:?}: must be non-empty and must not contain ':'",
                user_id
            )));
        }
        Ok(())
    }

    fn load_state<A, E>(accounts: &A, entries: &E, user_id: &str) -> Result<Option<UserState>>
    where
        A: ReadableTable<&'static str, &'static [u8]>,
        E: ReadableTable<&'static str, &'static [u8]>,
    {
        let account = match accounts
            .get(user_id)
            .map_err(|e| LedgerError::Storage(format!("failed to get account: {}", e)))?
        {
            Some(value) => bincode::deserialize::<Account>(value.value())
                .map_err(|e| LedgerError::Storage(format!("failed to deserialize account: {}", e)))?,
            None => return Ok(None),
        };

        // ';' is the byte after ':', so this range covers exactly the
        // "{user}:" prefix
        let start = format!("{}:", user_id);
        let end = format!("{};", user_id);
        let mut loaded = Vec::new();
        let iter = entries
            .range(start.as_str()..end.as_str())
            .map_err(|e| LedgerError::Storage(format!("failed to iterate entries: {}", e)))?;
        for item in iter {
            let (_key, value) =
                item.map_err(|e| LedgerError::Storage(format!("failed to read entry: {}", e)))?;
            let entry: LedgerEntry = bincode::deserialize(value.value())
                .map_err(|e| LedgerError::Storage(format!("failed to deserialize entry: {}", e)))?;
            loaded.push(entry);
        }

        Ok(Some(UserState {
            account,
            entries: loaded,
        }))
    }
}

impl LedgerStore for RedbLedgerStore {
    fn read_user(&self, user_id: &str) -> Result<Option<UserState>> {
        Self::check_user_id(user_id)?;

        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| LedgerError::Storage(format!("failed to begin read: {}", e)))?;
        let accounts = read_txn
            .open_table(ACCOUNTS)
            .map_err(|e| LedgerError::Storage(format!("failed to open accounts table: {}", e)))?;
        let entries = read_txn
            .open_table(ENTRIES)
            .map_err(|e| LedgerError::Storage(format!("failed to open entries table: {}", e)))?;

        Self::load_state(&accounts, &entries, user_id)
    }

    fn mutate_user<R>(
        &self,
        user_id: &str,
        op: impl FnOnce(&mut UserState) -> Result<R>,
    ) -> Result<R> {
        Self::check_user_id(user_id)?;

        // Dropping the write transaction without committing rolls everything
        // back, so any `?` below leaves the store untouched.
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| LedgerError::Storage(format!("failed to begin write: {}", e)))?;
        let result = {
            let mut accounts = write_txn
                .open_table(ACCOUNTS)
                .map_err(|e| LedgerError::Storage(format!("failed to open accounts table: {}", e)))?;
            let mut entries = write_txn
                .open_table(ENTRIES)
                .map_err(|e| LedgerError::Storage(format!("failed to open entries table: {}", e)))?;

            let mut state = Self::load_state(&accounts, &entries, user_id)?
                .unwrap_or_else(|| UserState::new(user_id));

            let result = op(&mut state)?;

            let account_buf = bincode::serialize(&state.account)
                .map_err(|e| LedgerError::Storage(format!("failed to serialize account: {}", e)))?;
            accounts
                .insert(user_id, account_buf.as_slice())
                .map_err(|e| LedgerError::Storage(format!("failed to insert account: {}", e)))?;

            for (index, entry) in state.entries.iter().enumerate() {
                let key = Self::entry_key(user_id, index);
                let entry_buf = bincode::serialize(entry).map_err(|e| {
                    LedgerError::Storage(format!("failed to serialize entry: {}", e))
                })?;
                entries
                    .insert(key.as_str(), entry_buf.as_slice())
                    .map_err(|e| LedgerError::Storage(format!("failed to insert entry: {}", e)))?;
            }

            result
        };
        write_txn
            .commit()
            .map_err(|e| LedgerError::Storage(format!("failed to commit: {}", e)))?;

        debug!("Committed ledger state for user {}", user_id);
        Ok(result)
    }

    fn user_ids(&self) -> Result<Vec<String>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| LedgerError::Storage(format!("failed to begin read: {}", e)))?;
        let accounts = read_txn
            .open_table(ACCOUNTS)
            .map_err(|e| LedgerError::Storage(format!("failed to open accounts table: {}", e)))?;

        let mut ids = Vec::new();
        let iter = accounts
            .range::<&str>(..)
            .map_err(|e| LedgerError::Storage(format!("failed to iterate accounts: {}", e)))?;
        for item in iter {
            let (key, _value) =
                item.map_err(|e| LedgerError::Storage(format!("failed to read account: {}", e)))?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::EntryType;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    struct TempDb {
        path: PathBuf,
    }

    impl TempDb {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "tierledger-test-{}-{}.redb",
                name,
                std::process::id()
            ));
            let _ = std::fs::remove_file(&path);
            Self { path }
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_round_trip_persists_account_and_entries() {
        let tmp = TempDb::new("roundtrip");
        let store = RedbLedgerStore::open(Some(tmp.path.to_str().unwrap())).unwrap();

        store
            .mutate_user("u1", |state| {
                for i in 0..3 {
                    state.entries.push(LedgerEntry::credit(
                        "u1",
                        EntryType::Purchase,
                        &format!("purchase {}", i),
                        10 + i,
                        None,
                        date(2024, 1, 1),
                        Some(date(2024, 6, 30)),
                    ));
                }
                state.recompute_balance();
                Ok(())
            })
            .unwrap();

        let state = store.read_user("u1").unwrap().unwrap();
        assert_eq!(state.account.balance, 33);
        let amounts: Vec<i64> = state.entries.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![10, 11, 12]);
        assert_eq!(state.entries[0].end_date, Some(date(2024, 6, 30)));
        assert_eq!(store.user_ids().unwrap(), vec!["u1".to_string()]);

        // reopening sees the committed state
        drop(store);
        let store = RedbLedgerStore::open(Some(tmp.path.to_str().unwrap())).unwrap();
        let state = store.read_user("u1").unwrap().unwrap();
        assert_eq!(state.account.balance, 33);
        assert_eq!(state.entries.len(), 3);
    }

    #[test]
    fn test_failed_mutation_rolls_back() {
        let tmp = TempDb::new("rollback");
        let store = RedbLedgerStore::open(Some(tmp.path.to_str().unwrap())).unwrap();

        store
            .mutate_user("u1", |state| {
                state.account.balance = 7;
                Ok(())
            })
            .unwrap();

        let result: Result<()> = store.mutate_user("u1", |state| {
            state.account.balance = 99;
            Err(LedgerError::Storage("boom".into()))
        });
        assert!(result.is_err());

        let state = store.read_user("u1").unwrap().unwrap();
        assert_eq!(state.account.balance, 7);
    }

    #[test]
    fn test_user_id_with_separator_is_rejected() {
        let tmp = TempDb::new("badid");
        let store = RedbLedgerStore::open(Some(tmp.path.to_str().unwrap())).unwrap();

        let result = store.mutate_user("a:b", |_state| Ok(()));
        assert!(matches!(result, Err(LedgerError::Storage(_))));
        assert!(store.read_user("").is_err());
    }
}
