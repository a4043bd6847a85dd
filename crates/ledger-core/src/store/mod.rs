//! ============================================================================
//! Ledger Store - Transactional per-user persistence
//! ============================================================================
//! The engine algorithms are storage-agnostic: they load a [`UserState`]
//! snapshot, mutate it, and the store commits or rolls back the whole thing.
//! Two adapters are provided:
//! - [`RedbLedgerStore`]: embedded redb database (production)
//! - [`MemLedgerStore`]: in-memory map (tests, ephemeral ledgers)
//!
//! Concurrency: every mutation runs inside one storage transaction scoped to
//! a single user. redb's single-writer lock (and the memory adapter's mutex)
//! serializes concurrent mutations, so two exchanges for the same user can
//! never interleave and double-spend a credit.
//! ============================================================================

mod memory;
mod redb_store;

pub use memory::MemLedgerStore;
pub use redb_store::RedbLedgerStore;

use crate::ledger::{Account, EntryStatus, LedgerEntry};
use crate::types::Result;

/// Snapshot of one user's account and full entry history. Entry order is
/// creation order (entries are append-only), which supplies the FIFO
/// tie-break for credits with equal end dates.
#[derive(Debug, Clone)]
pub struct UserState {
    pub account: Account,
    pub entries: Vec<LedgerEntry>,
}

impl UserState {
    /// Fresh state for a user with no history.
    pub fn new(user_id: &str) -> Self {
        Self {
            account: Account::new(user_id),
            entries: Vec::new(),
        }
    }

    /// Recompute the cached balance from the non-deleted credit entries and
    /// store it on the account. Returns the recomputed value.
    pub fn recompute_balance(&mut self) -> i64 {
        let balance: i64 = self
            .entries
            .iter()
            .filter(|e| e.counts_toward_balance())
            .map(|e| e.amount - e.used)
            .sum();
        self.account.balance = balance;
        balance
    }

    /// Index of the tier entry currently being consumed, if any.
    pub fn running_exchange(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.status == EntryStatus::InProgress && e.entry_type.is_exchange())
    }
}

/// Storage interface for the ledger engine.
///
/// `mutate_user` is the transaction boundary: the closure runs against a
/// loaded snapshot, and an `Err` from the closure (or a failed commit)
/// discards every change. Implementations must make the load-mutate-commit
/// sequence atomic with respect to other mutations of the same user.
pub trait LedgerStore: Send + Sync {
    /// Load a user's state, `None` if the user has no account yet.
    fn read_user(&self, user_id: &str) -> Result<Option<UserState>>;

    /// Run `op` against the user's state (created on first touch) inside one
    /// transaction, committing on `Ok` and rolling back on `Err`.
    fn mutate_user<R>(
        &self,
        user_id: &str,
        op: impl FnOnce(&mut UserState) -> Result<R>,
    ) -> Result<R>;

    /// All user ids with an account, for the reconciliation sweep.
    fn user_ids(&self) -> Result<Vec<String>>;
}
