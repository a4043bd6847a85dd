//! ============================================================================
//! VIP Toggle - Administrative expiry override
//! ============================================================================
//! VIP suspends normal expiry accounting: turning it on banks the remaining
//! days of the active entitlement and freezes the running entry; turning it
//! off restores exactly the banked length from that day forward. Every
//! toggle writes an audit record through an explicit [`AuditSink`] inside
//! the same transaction.
//! ============================================================================

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

use crate::ledger::EntryStatus;
use crate::reconcile::{promote_after_completion, thaw_entry};
use crate::store::{LedgerStore, UserState};
use crate::types::{LedgerError, Result, Tier};

/// Append-only record of one VIP change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub actor: String,
    pub user_id: String,
    pub was_vip: bool,
    pub now_vip: bool,
    pub at: i64,
}

/// Destination for VIP audit records. A sink failure aborts the toggle.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> Result<()>;
}

/// Sink that emits audit records to the log stream.
#[derive(Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<()> {
        info!(
            "VIP change: user {} {} -> {} by {}",
            record.user_id, record.was_vip, record.now_vip, record.actor
        );
        Ok(())
    }
}

/// Sink that buffers records in memory (tests, local inspection).
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| LedgerError::Storage("audit buffer lock poisoned".into()))?
            .push(record.clone());
        Ok(())
    }
}

/// Admin-driven freeze/thaw of the active entitlement.
pub struct VipToggle<'a, S, A> {
    store: &'a S,
    audit: &'a A,
}

impl<'a, S: LedgerStore, A: AuditSink> VipToggle<'a, S, A> {
    pub fn new(store: &'a S, audit: &'a A) -> Self {
        Self { store, audit }
    }

    /// Set a user's VIP flag. Returns false when the flag already had the
    /// requested value (no-op, no audit record). One atomic transaction;
    /// a storage or sink failure leaves no partial state.
    pub fn set_vip(
        &self,
        user_id: &str,
        is_vip: bool,
        actor: &str,
        today: NaiveDate,
    ) -> Result<bool> {
        self.store.mutate_user(user_id, |state| {
            if state.account.is_vip == is_vip {
                return Ok(false);
            }

            let was_vip = state.account.is_vip;
            if is_vip {
                freeze_active(state, today);
            } else {
                resume_entitlements(state, today);
            }
            state.account.is_vip = is_vip;
            state.account.touch();

            // The audit write is part of the transaction; if the sink fails
            // the toggle rolls back
            self.audit.record(&AuditRecord {
                actor: actor.to_string(),
                user_id: user_id.to_string(),
                was_vip,
                now_vip: is_vip,
                at: chrono::Utc::now().timestamp(),
            })?;
            Ok(true)
        })
    }
}

/// Bank the active entry's remaining days and pause it.
fn freeze_active(state: &mut UserState, today: NaiveDate) {
    if let Some(idx) = state.running_exchange() {
        if let Some(tier) = state.entries[idx].entry_type.tier() {
            if let Some(end) = state.account.tier_end_date(tier) {
                let remain = (end - today).num_days() + 1;
                if remain > 0 {
                    state.account.set_remain_days(tier, remain);
                }
            }
        }
        state.entries[idx].status = EntryStatus::Freezing;
        state.entries[idx].freezing_date = Some(today);
    }
}

/// Restore the entitlement paused by the VIP freeze. The VIP freeze paused
/// the most recently frozen entry; its tier gets its banked days back from
/// today. Days banked for the other tier (a cross-tier pause predating the
/// VIP period) stay banked until reconciliation resumes them.
fn resume_entitlements(state: &mut UserState, today: NaiveDate) {
    let yesterday = today - Duration::days(1);

    let vip_frozen = state
        .entries
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            e.status == EntryStatus::Freezing
                && e.entry_type.is_exchange()
                && e.freezing_date.is_some()
        })
        .max_by_key(|(i, e)| (e.freezing_date, *i))
        .map(|(i, _)| i);

    if let Some(idx) = vip_frozen {
        if let Some(tier) = state.entries[idx].entry_type.tier() {
            restore_banked(state, tier, today);
        }
        thaw_entry(&mut state.entries, idx, yesterday);
    } else {
        // Nothing paused: restore whatever is banked and promote a plain
        // queued entry if one exists
        restore_banked(state, Tier::Standard, today);
        restore_banked(state, Tier::Premium, today);
        promote_after_completion(&mut state.entries, yesterday, None);
    }
}

fn restore_banked(state: &mut UserState, tier: Tier, today: NaiveDate) {
    let banked = state.account.remain_days(tier);
    if banked > 0 {
        state
            .account
            .set_tier_end_date(tier, Some(today + Duration::days(banked - 1)));
        state.account.set_remain_days(tier, 0);
    }
}
