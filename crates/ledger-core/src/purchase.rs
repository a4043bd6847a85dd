//! ============================================================================
//! Purchase Ingest - Completed-purchase events from the payment gateway
//! ============================================================================
//! The gateway settles payments upstream and delivers completed-purchase
//! events; this path converts them into non-expiring purchase credits at the
//! configured token rate. Gateways redeliver events, so ingestion is
//! idempotent on the external trade id.
//! ============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ConfigProvider;
use crate::ledger::{EntryStatus, EntryType, LedgerEntry};
use crate::store::LedgerStore;
use crate::types::Result;

/// Completed-purchase event as delivered by the payment gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseEvent {
    pub user_id: String,
    /// Gateway-side transaction id (idempotency key)
    pub external_trade_id: String,
    /// Amount paid in external currency units
    pub amount_paid: i64,
    pub currency: String,
}

/// Result of ingesting one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// Tokens were credited
    Credited { trade_no: String, tokens: i64 },
    /// The external trade id was already ingested
    Duplicate,
}

/// Converts gateway events into purchase credit entries.
pub struct PurchaseIngest<'a, S, C> {
    store: &'a S,
    config: &'a C,
}

impl<'a, S: LedgerStore, C: ConfigProvider> PurchaseIngest<'a, S, C> {
    pub fn new(store: &'a S, config: &'a C) -> Self {
        Self { store, config }
    }

    /// Ingest one completed-purchase event as a single transaction.
    pub fn ingest(&self, event: &PurchaseEvent, today: NaiveDate) -> Result<PurchaseOutcome> {
        let tokens = event.amount_paid * self.config.purchase_rate();

        self.store.mutate_user(&event.user_id, |state| {
            let duplicate = state.entries.iter().any(|e| {
                e.status != EntryStatus::Deleted
                    && e.entry_type == EntryType::Purchase
                    && e.out_trade_no.as_deref() == Some(event.external_trade_id.as_str())
            });
            if duplicate {
                debug!(
                    "Purchase {} for user {} already ingested",
                    event.external_trade_id, event.user_id
                );
                return Ok(PurchaseOutcome::Duplicate);
            }

            let mut entry = LedgerEntry::credit(
                &event.user_id,
                EntryType::Purchase,
                &format!("Token purchase ({} {})", event.amount_paid, event.currency),
                tokens,
                Some(event.external_trade_id.clone()),
                today,
                None,
            );
            entry.pay_amount = event.amount_paid;
            let trade_no = entry.trade_no.clone();
            state.entries.push(entry);
            state.recompute_balance();
            state.account.touch();

            info!(
                "Credited {} tokens to user {} for purchase {}",
                tokens, event.user_id, event.external_trade_id
            );
            Ok(PurchaseOutcome::Credited { trade_no, tokens })
        })
    }
}
