//! ============================================================================
//! Ledger Model - Accounts and token ledger entries
//! ============================================================================
//! The shared schema every engine component works against:
//! - [`Account`]: per-user balance + tier end-date projection
//! - [`LedgerEntry`]: immutable-once-settled credit/debit records
//! ============================================================================

mod account;
mod entry;

pub use account::Account;
pub use entry::{EntryStatus, EntryType, LedgerEntry};
