//! ============================================================================
//! Reconciliation Job - Daily expiry and promotion batch
//! ============================================================================
//! Once per day the job completes tier entries whose period ran out
//! yesterday, promotes the next queued entry (shifting paused entries so no
//! entitlement length is lost), forfeits tokens on expired credits, and
//! resumes banked standard time once premium access ends. Every user is
//! processed in its own transaction; one user's failure never blocks the
//! sweep. Re-running on the same day is a no-op.
//! ============================================================================

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ledger::{EntryStatus, EntryType, LedgerEntry};
use crate::store::{LedgerStore, UserState};
use crate::types::{Result, Tier};

/// Aggregate result of one reconciliation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileSummary {
    pub users_processed: usize,
    pub users_skipped_vip: usize,
    pub entries_completed: usize,
    pub entries_promoted: usize,
    pub credits_expired: usize,
    pub failures: Vec<UserFailure>,
}

/// A user whose batch failed; the rest of the sweep continued.
#[derive(Debug, Clone, Serialize)]
pub struct UserFailure {
    pub user_id: String,
    pub error: String,
}

#[derive(Debug, Default)]
struct UserOutcome {
    skipped_vip: bool,
    completed: bool,
    promoted: bool,
    expired: usize,
}

impl UserOutcome {
    fn changed(&self) -> bool {
        self.completed || self.promoted || self.expired > 0
    }
}

/// Daily batch advancing ledger entries between states.
pub struct ReconciliationJob<'a, S> {
    store: &'a S,
}

impl<'a, S: LedgerStore> ReconciliationJob<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Run the batch for `today`, targeting entries that ended yesterday.
    pub fn run(&self, today: NaiveDate) -> Result<ReconcileSummary> {
        let yesterday = today - Duration::days(1);
        let mut summary = ReconcileSummary::default();

        for user_id in self.store.user_ids()? {
            let result = self
                .store
                .mutate_user(&user_id, |state| Ok(reconcile_user(state, today, yesterday)));
            match result {
                Ok(outcome) => {
                    summary.users_processed += 1;
                    if outcome.skipped_vip {
                        summary.users_skipped_vip += 1;
                    }
                    if outcome.completed {
                        summary.entries_completed += 1;
                    }
                    if outcome.promoted {
                        summary.entries_promoted += 1;
                    }
                    summary.credits_expired += outcome.expired;
                }
                Err(e) => {
                    warn!("Reconciliation failed for user {}: {}", user_id, e);
                    summary.failures.push(UserFailure {
                        user_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Reconciliation for {}: {} users, {} completed, {} promoted, {} credits expired, {} failures",
            today,
            summary.users_processed,
            summary.entries_completed,
            summary.entries_promoted,
            summary.credits_expired,
            summary.failures.len()
        );
        Ok(summary)
    }

    /// Run forever, invoking [`run`](Self::run) once per calendar day. The
    /// poll interval only controls how quickly a day rollover is noticed;
    /// a failed run is retried on the next tick.
    pub async fn run_daily(&self, poll_interval: std::time::Duration) {
        let mut last_run: Option<NaiveDate> = None;
        loop {
            let today = chrono::Utc::now().date_naive();
            if last_run != Some(today) {
                match self.run(today) {
                    Ok(summary) => {
                        last_run = Some(today);
                        if !summary.failures.is_empty() {
                            warn!(
                                "Daily reconciliation finished with {} failed users",
                                summary.failures.len()
                            );
                        }
                    }
                    Err(e) => warn!("Daily reconciliation could not start: {}", e),
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

fn reconcile_user(state: &mut UserState, today: NaiveDate, yesterday: NaiveDate) -> UserOutcome {
    let mut outcome = UserOutcome::default();

    // VIP suspends expiry accounting entirely
    if state.account.is_vip {
        outcome.skipped_vip = true;
        return outcome;
    }

    outcome.expired = expire_credits(state, today);

    let ended = state.entries.iter().position(|e| {
        e.status == EntryStatus::InProgress
            && e.entry_type.is_exchange()
            && e.end_date == Some(yesterday)
    });
    if let Some(idx) = ended {
        let completed_type = state.entries[idx].entry_type;
        state.entries[idx].status = EntryStatus::Completed;
        outcome.completed = true;
        debug!(
            "Completed {} entry {} for user {}",
            completed_type
                .tier()
                .map(|t| t.display_name())
                .unwrap_or("tier"),
            state.entries[idx].trade_no,
            state.account.user_id
        );

        outcome.promoted = promote_after_completion(&mut state.entries, yesterday, Some(completed_type));

        // Premium ran out: resume the banked standard time
        if completed_type.tier() == Some(Tier::Premium) && state.account.standard_remain_days > 0 {
            state.account.standard_end_date =
                Some(yesterday + Duration::days(state.account.standard_remain_days));
            state.account.standard_remain_days = 0;
        }
    }

    if outcome.changed() {
        state.recompute_balance();
        state.account.touch();
    }
    outcome
}

/// Forfeit unspent tokens on credits whose validity ended before `today`.
/// Each forfeiture consumes the credit's remainder and records an
/// `Expiration` debit entry referencing it.
fn expire_credits(state: &mut UserState, today: NaiveDate) -> usize {
    let mut expired = 0;
    for idx in 0..state.entries.len() {
        let entry = &state.entries[idx];
        let lapsed = entry.is_spendable_credit()
            && entry.end_date.is_some_and(|end| end < today);
        if !lapsed {
            continue;
        }

        let forfeited = state.entries[idx].remaining();
        state.entries[idx].used = state.entries[idx].amount;
        let source_user = state.entries[idx].user_id.clone();
        let source_trade = state.entries[idx].trade_no.clone();
        let source_end = state.entries[idx].end_date;
        state.entries.push(LedgerEntry {
            user_id: source_user,
            trade_no: Uuid::new_v4().to_string(),
            title: "Expired tokens".to_string(),
            amount: -forfeited,
            pay_amount: 0,
            used: 0,
            entry_type: EntryType::Expiration,
            out_trade_no: Some(source_trade),
            start_date: source_end,
            end_date: source_end,
            freezing_date: None,
            status: EntryStatus::Completed,
            created_at: chrono::Utc::now().timestamp(),
        });
        expired += 1;
    }
    expired
}

/// Promote the next queued tier entry after one completed (or after a VIP
/// thaw, with `completed_type = None`). Returns whether anything was
/// promoted.
pub(crate) fn promote_after_completion(
    entries: &mut Vec<LedgerEntry>,
    yesterday: NaiveDate,
    completed_type: Option<EntryType>,
) -> bool {
    let mut frozen: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.status == EntryStatus::Freezing && e.entry_type.is_exchange())
        .map(|(i, _)| i)
        .collect();
    frozen.sort_by_key(|&i| (entries[i].start_date, i));
    if frozen.is_empty() {
        return false;
    }

    // (a) a same-type successor was queued to start exactly where the prior
    // one ended; it needs no date shift. Queued entries are exactly those
    // without a freezing date; a paused same-type entry takes rule (b).
    if let Some(ct) = completed_type {
        if let Some(&i) = frozen
            .iter()
            .find(|&&i| entries[i].entry_type == ct && entries[i].freezing_date.is_none())
        {
            entries[i].status = EntryStatus::InProgress;
            return true;
        }
    }

    // (b) an entry paused mid-flight resumes with its unused length intact
    let paused = frozen
        .iter()
        .copied()
        .find(|&i| entries[i].freezing_date.is_some() && entries[i].end_date.is_some());
    if let Some(i) = paused {
        thaw_entry(entries, i, yesterday);
        return true;
    }

    // (c) plain queue: promote the earliest as-is
    let first = frozen[0];
    entries[first].status = EntryStatus::InProgress;
    true
}

/// Thaw `entries[idx]` so it resumes the day after `yesterday` with exactly
/// the days it had left when it was paused, shifting the queued freezing
/// entries by the same delta so the queue moves together. An entry paused
/// independently (its own `freezing_date` set) keeps its dates: its clock is
/// already stopped and its unused length is anchored to that date.
pub(crate) fn thaw_entry(entries: &mut [LedgerEntry], idx: usize, yesterday: NaiveDate) {
    if let (Some(frozen_on), Some(end)) = (entries[idx].freezing_date, entries[idx].end_date) {
        let remain_days = (end - frozen_on).num_days() + 1;
        let shift = ((yesterday + Duration::days(remain_days)) - end).num_days();
        let frozen: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(i, e)| {
                e.status == EntryStatus::Freezing
                    && e.entry_type.is_exchange()
                    && (*i == idx || e.freezing_date.is_none())
            })
            .map(|(i, _)| i)
            .collect();
        for &j in &frozen {
            if let Some(start) = entries[j].start_date {
                entries[j].start_date = Some(start + Duration::days(shift));
            }
            if let Some(entry_end) = entries[j].end_date {
                entries[j].end_date = Some(entry_end + Duration::days(shift));
            }
        }
    }
    entries[idx].freezing_date = None;
    entries[idx].status = EntryStatus::InProgress;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfig;
    use crate::exchange::ExchangeEngine;
    use crate::store::MemLedgerStore;
    use crate::types::{ExchangePeriod, LedgerError};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seed_credit(store: &MemLedgerStore, user_id: &str, amount: i64, end: Option<NaiveDate>) {
        store
            .mutate_user(user_id, |state| {
                state.entries.push(LedgerEntry::credit(
                    user_id,
                    EntryType::Purchase,
                    "seed",
                    amount,
                    None,
                    date(2024, 1, 1),
                    end,
                ));
                state.recompute_balance();
                Ok(())
            })
            .unwrap();
    }

    fn cheap_config() -> StaticConfig {
        let mut config = StaticConfig::default();
        config.standard.days_30 = Some(10);
        config.premium.days_30 = Some(10);
        config.premium.days_90 = Some(10);
        config
    }

    #[test]
    fn test_completes_entry_and_is_idempotent_same_day() {
        let store = MemLedgerStore::new();
        seed_credit(&store, "u1", 100, None);
        let config = cheap_config();
        ExchangeEngine::new(&store, &config)
            .exchange("u1", Tier::Standard, ExchangePeriod::Days30, date(2024, 6, 1))
            .unwrap();

        let job = ReconciliationJob::new(&store);
        // the entry covers June 1-30, so July 1 completes it
        let first = job.run(date(2024, 7, 1)).unwrap();
        assert_eq!(first.entries_completed, 1);

        let state = store.read_user("u1").unwrap().unwrap();
        let entry = state
            .entries
            .iter()
            .find(|e| e.entry_type.is_exchange())
            .unwrap();
        assert_eq!(entry.status, EntryStatus::Completed);

        let second = job.run(date(2024, 7, 1)).unwrap();
        assert_eq!(second.entries_completed, 0);
        assert_eq!(second.entries_promoted, 0);
    }

    #[test]
    fn test_same_type_successor_promoted_without_date_shift() {
        let store = MemLedgerStore::new();
        seed_credit(&store, "u1", 100, None);
        let config = cheap_config();
        let engine = ExchangeEngine::new(&store, &config);
        engine
            .exchange("u1", Tier::Standard, ExchangePeriod::Days30, date(2024, 6, 1))
            .unwrap();
        // renewal queued for July 1-30
        engine
            .exchange("u1", Tier::Standard, ExchangePeriod::Days30, date(2024, 6, 1))
            .unwrap();

        let job = ReconciliationJob::new(&store);
        let summary = job.run(date(2024, 7, 1)).unwrap();
        assert_eq!(summary.entries_completed, 1);
        assert_eq!(summary.entries_promoted, 1);

        let state = store.read_user("u1").unwrap().unwrap();
        let running = state
            .entries
            .iter()
            .find(|e| e.status == EntryStatus::InProgress)
            .unwrap();
        assert_eq!(running.start_date, Some(date(2024, 7, 1)));
        assert_eq!(running.end_date, Some(date(2024, 7, 30)));
    }

    // Freeze/thaw length preservation: standard paused with 10 days left
    // must get exactly 10 days back whenever premium ends, regardless of
    // how long the freeze lasted.
    fn run_freeze_thaw(premium_period: ExchangePeriod, premium_end: NaiveDate) {
        let store = MemLedgerStore::new();
        seed_credit(&store, "u1", 100, None);
        let config = cheap_config();
        let engine = ExchangeEngine::new(&store, &config);

        // standard June 1-30; premium bought June 21 pauses it with 10 days left
        engine
            .exchange("u1", Tier::Standard, ExchangePeriod::Days30, date(2024, 6, 1))
            .unwrap();
        engine
            .exchange("u1", Tier::Premium, premium_period, date(2024, 6, 21))
            .unwrap();

        let state = store.read_user("u1").unwrap().unwrap();
        assert_eq!(state.account.standard_remain_days, 10);

        let job = ReconciliationJob::new(&store);
        let day_after_premium = premium_end + Duration::days(1);
        let summary = job.run(day_after_premium).unwrap();
        assert_eq!(summary.entries_completed, 1);
        assert_eq!(summary.entries_promoted, 1);

        let state = store.read_user("u1").unwrap().unwrap();
        // exactly 10 days remain from the thaw date
        assert_eq!(
            state.account.standard_end_date,
            Some(premium_end + Duration::days(10))
        );
        assert_eq!(state.account.standard_remain_days, 0);

        let standard = state
            .entries
            .iter()
            .find(|e| e.entry_type.tier() == Some(Tier::Standard))
            .unwrap();
        assert_eq!(standard.status, EntryStatus::InProgress);
        assert_eq!(standard.freezing_date, None);
        assert_eq!(standard.end_date, Some(premium_end + Duration::days(10)));
    }

    #[test]
    fn test_thaw_preserves_length_after_30_day_freeze() {
        run_freeze_thaw(ExchangePeriod::Days30, date(2024, 7, 20));
    }

    #[test]
    fn test_thaw_preserves_length_after_90_day_freeze() {
        run_freeze_thaw(ExchangePeriod::Days90, date(2024, 9, 18));
    }

    #[test]
    fn test_vip_user_is_skipped() {
        let store = MemLedgerStore::new();
        seed_credit(&store, "u1", 100, None);
        let config = cheap_config();
        ExchangeEngine::new(&store, &config)
            .exchange("u1", Tier::Standard, ExchangePeriod::Days30, date(2024, 6, 1))
            .unwrap();
        store
            .mutate_user("u1", |state| {
                state.account.is_vip = true;
                Ok(())
            })
            .unwrap();

        let summary = ReconciliationJob::new(&store).run(date(2024, 7, 1)).unwrap();
        assert_eq!(summary.users_skipped_vip, 1);
        assert_eq!(summary.entries_completed, 0);

        let state = store.read_user("u1").unwrap().unwrap();
        let entry = state
            .entries
            .iter()
            .find(|e| e.entry_type.is_exchange())
            .unwrap();
        assert_eq!(entry.status, EntryStatus::InProgress);
    }

    #[test]
    fn test_expired_credit_forfeits_remainder() {
        let store = MemLedgerStore::new();
        seed_credit(&store, "u1", 50, Some(date(2024, 6, 30)));
        store
            .mutate_user("u1", |state| {
                state.entries[0].used = 20;
                state.recompute_balance();
                Ok(())
            })
            .unwrap();

        let job = ReconciliationJob::new(&store);
        let summary = job.run(date(2024, 7, 1)).unwrap();
        assert_eq!(summary.credits_expired, 1);

        let state = store.read_user("u1").unwrap().unwrap();
        assert_eq!(state.account.balance, 0);
        assert_eq!(state.entries[0].used, 50);
        let expiration = state
            .entries
            .iter()
            .find(|e| e.entry_type == EntryType::Expiration)
            .unwrap();
        assert_eq!(expiration.amount, -30);
        assert_eq!(
            expiration.out_trade_no.as_deref(),
            Some(state.entries[0].trade_no.as_str())
        );

        // forfeiture is not repeated
        let second = job.run(date(2024, 7, 1)).unwrap();
        assert_eq!(second.credits_expired, 0);
        let state = store.read_user("u1").unwrap().unwrap();
        assert_eq!(state.entries.len(), 2);
    }

    #[test]
    fn test_balance_stays_conserved_through_a_full_lifecycle() {
        use crate::award::{AwardEngine, AwardRequest};
        use crate::purchase::{PurchaseEvent, PurchaseIngest};
        use crate::types::AwardKind;
        use crate::vip::{MemoryAuditSink, VipToggle};

        fn assert_conserved(store: &MemLedgerStore, user: &str) {
            let state = store.read_user(user).unwrap().unwrap();
            let computed: i64 = state
                .entries
                .iter()
                .filter(|e| e.counts_toward_balance())
                .map(|e| e.amount - e.used)
                .sum();
            assert_eq!(state.account.balance, computed);
        }

        let store = MemLedgerStore::new();
        let config = cheap_config();
        let audit = MemoryAuditSink::new();

        AwardEngine::new(&store, &config)
            .grant("u1", &AwardRequest::new(AwardKind::NewUser), date(2024, 6, 1))
            .unwrap();
        assert_conserved(&store, "u1");

        PurchaseIngest::new(&store, &config)
            .ingest(
                &PurchaseEvent {
                    user_id: "u1".into(),
                    external_trade_id: "ext-1".into(),
                    amount_paid: 1,
                    currency: "USD".into(),
                },
                date(2024, 6, 1),
            )
            .unwrap();
        assert_conserved(&store, "u1");

        let engine = ExchangeEngine::new(&store, &config);
        engine
            .exchange("u1", Tier::Standard, ExchangePeriod::Days30, date(2024, 6, 1))
            .unwrap();
        engine
            .exchange("u1", Tier::Premium, ExchangePeriod::Days30, date(2024, 6, 11))
            .unwrap();
        assert_conserved(&store, "u1");

        // premium (June 11 - July 10) paused by VIP on June 15, resumed
        // June 20 with its 26 banked days -> runs through July 15
        let toggle = VipToggle::new(&store, &audit);
        toggle.set_vip("u1", true, "admin", date(2024, 6, 15)).unwrap();
        toggle.set_vip("u1", false, "admin", date(2024, 6, 20)).unwrap();
        assert_conserved(&store, "u1");

        let state = store.read_user("u1").unwrap().unwrap();
        assert_eq!(state.account.premium_end_date, Some(date(2024, 7, 15)));
        // the standard pause from June 11 is untouched by the VIP thaw
        assert_eq!(state.account.standard_remain_days, 20);

        // premium completes; the banked 20 standard days resume on July 16
        ReconciliationJob::new(&store).run(date(2024, 7, 16)).unwrap();
        assert_conserved(&store, "u1");

        let state = store.read_user("u1").unwrap().unwrap();
        assert_eq!(state.account.standard_end_date, Some(date(2024, 8, 4)));
        assert_eq!(state.account.standard_remain_days, 0);
        let standard = state
            .entries
            .iter()
            .find(|e| e.entry_type.tier() == Some(Tier::Standard))
            .unwrap();
        assert_eq!(standard.status, EntryStatus::InProgress);
        assert_eq!(standard.end_date, Some(date(2024, 8, 4)));
    }

    #[test]
    fn test_one_failing_user_does_not_block_the_sweep() {
        struct FlakyStore {
            inner: MemLedgerStore,
        }

        impl LedgerStore for FlakyStore {
            fn read_user(&self, user_id: &str) -> Result<Option<UserState>> {
                self.inner.read_user(user_id)
            }
            fn mutate_user<R>(
                &self,
                user_id: &str,
                op: impl FnOnce(&mut UserState) -> Result<R>,
            ) -> Result<R> {
                if user_id == "bad" {
                    return Err(LedgerError::Storage("disk on fire".into()));
                }
                self.inner.mutate_user(user_id, op)
            }
            fn user_ids(&self) -> Result<Vec<String>> {
                self.inner.user_ids()
            }
        }

        let store = FlakyStore {
            inner: MemLedgerStore::new(),
        };
        seed_credit(&store.inner, "bad", 100, None);
        seed_credit(&store.inner, "good", 100, None);
        let config = cheap_config();
        ExchangeEngine::new(&store.inner, &config)
            .exchange("good", Tier::Standard, ExchangePeriod::Days30, date(2024, 6, 1))
            .unwrap();

        let summary = ReconciliationJob::new(&store).run(date(2024, 7, 1)).unwrap();
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].user_id, "bad");
        assert_eq!(summary.entries_completed, 1);
    }
}
