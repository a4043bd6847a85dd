//! ============================================================================
//! LEDGER-CORE: TierLedger's Engine
//! ============================================================================
//! This crate handles all ledger and entitlement logic for TierLedger:
//! - Token ledger storage (redb) with per-user transaction discipline
//! - Idempotent award grants and purchase-event ingestion
//! - FIFO token exchange into standard/premium tier time
//! - Daily reconciliation with freeze/thaw date arithmetic
//! - Administrative VIP override with audited toggles
//! ============================================================================

pub mod award;
pub mod config;
pub mod exchange;
pub mod ledger;
pub mod purchase;
pub mod reconcile;
pub mod store;
pub mod types;
pub mod vip;

// Re-export main types for convenience
pub use award::{AwardEngine, AwardOutcome, AwardRequest};
pub use config::{AwardConfig, ConfigProvider, StaticConfig};
pub use exchange::{ExchangeEngine, ExchangeReceipt};
pub use ledger::{Account, EntryStatus, EntryType, LedgerEntry};
pub use purchase::{PurchaseEvent, PurchaseIngest, PurchaseOutcome};
pub use reconcile::{ReconcileSummary, ReconciliationJob, UserFailure};
pub use store::{LedgerStore, MemLedgerStore, RedbLedgerStore, UserState};
pub use types::{AwardKind, ExchangePeriod, LedgerError, Tier};
pub use vip::{AuditRecord, AuditSink, MemoryAuditSink, TracingAuditSink, VipToggle};
