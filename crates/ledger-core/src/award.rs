//! ============================================================================
//! Award Engine - Idempotent token grants
//! ============================================================================
//! Awards are non-purchase credits driven by promotional or lifecycle events
//! (new user, invite, bot subscription, usage duration). Grants keyed by a
//! related entity are idempotent: replaying the same event never creates a
//! second entry.
//! ============================================================================

use chrono::{Duration, NaiveDate};
use tracing::{debug, info};

use crate::config::ConfigProvider;
use crate::ledger::{EntryStatus, EntryType, LedgerEntry};
use crate::store::LedgerStore;
use crate::types::{AwardKind, LedgerError, Result};

/// One award grant request.
#[derive(Debug, Clone)]
pub struct AwardRequest {
    pub kind: AwardKind,
    /// Explicit token amount; None resolves from configuration
    pub amount: Option<i64>,
    /// Related entity id (bot id, invited user id) used as idempotency key
    pub related_id: Option<String>,
    /// Days the tokens stay spendable; None resolves from configuration
    pub validity_days: Option<i64>,
}

impl AwardRequest {
    pub fn new(kind: AwardKind) -> Self {
        Self {
            kind,
            amount: None,
            related_id: None,
            validity_days: None,
        }
    }
}

/// Result of a grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardOutcome {
    /// A credit entry was created (amount may be 0 at the lifetime cap)
    Granted { trade_no: String, amount: i64 },
    /// An entry for the same (kind, related id) already exists
    Duplicate,
}

/// Issues award credits into the ledger.
pub struct AwardEngine<'a, S, C> {
    store: &'a S,
    config: &'a C,
}

impl<'a, S: LedgerStore, C: ConfigProvider> AwardEngine<'a, S, C> {
    pub fn new(store: &'a S, config: &'a C) -> Self {
        Self { store, config }
    }

    /// Grant an award to a user. The whole operation is one transaction: a
    /// storage error creates no entry and leaves the balance untouched.
    pub fn grant(
        &self,
        user_id: &str,
        request: &AwardRequest,
        today: NaiveDate,
    ) -> Result<AwardOutcome> {
        // Config resolution happens before the transaction begins
        let award_config = self.config.award_config(request.kind);
        if request.amount.is_none() && award_config.is_none() {
            return Err(LedgerError::ConfigurationMissing(format!(
                "award config for {}",
                request.kind
            )));
        }

        let entry_type = EntryType::award(request.kind);

        self.store.mutate_user(user_id, |state| {
            if let Some(related) = &request.related_id {
                let duplicate = state.entries.iter().any(|e| {
                    e.status != EntryStatus::Deleted
                        && e.entry_type == entry_type
                        && e.out_trade_no.as_deref() == Some(related.as_str())
                });
                if duplicate {
                    debug!(
                        "Award {} for user {} related {} already granted",
                        request.kind, user_id, related
                    );
                    return Ok(AwardOutcome::Duplicate);
                }
            }

            let amount = match request.amount {
                Some(amount) => amount,
                None => {
                    let cfg = award_config.as_ref().ok_or_else(|| {
                        LedgerError::ConfigurationMissing(format!(
                            "award config for {}",
                            request.kind
                        ))
                    })?;
                    match cfg.limit {
                        // At the lifetime cap the grant is still recorded,
                        // with a resolved amount of 0
                        Some(limit) => {
                            let prior = state
                                .entries
                                .iter()
                                .filter(|e| {
                                    e.status != EntryStatus::Deleted && e.entry_type == entry_type
                                })
                                .count() as u32;
                            if prior >= limit {
                                0
                            } else {
                                cfg.per
                            }
                        }
                        None => cfg.per,
                    }
                }
            };

            let validity = request
                .validity_days
                .or_else(|| award_config.as_ref().and_then(|c| c.period_of_validity));
            let end_date = validity.map(|days| today + Duration::days(days - 1));

            let entry = LedgerEntry::credit(
                user_id,
                entry_type,
                request.kind.display_name(),
                amount,
                request.related_id.clone(),
                today,
                end_date,
            );
            let trade_no = entry.trade_no.clone();
            state.entries.push(entry);
            state.recompute_balance();
            state.account.touch();

            info!(
                "Granted {} tokens to user {} ({})",
                amount, user_id, request.kind
            );
            Ok(AwardOutcome::Granted { trade_no, amount })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfig;
    use crate::store::MemLedgerStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_award_is_idempotent_per_related_entity() {
        let store = MemLedgerStore::new();
        let config = StaticConfig::default();
        let engine = AwardEngine::new(&store, &config);
        let today = date(2024, 5, 1);

        let mut request = AwardRequest::new(AwardKind::SubscribedBot);
        request.related_id = Some("bot-42".into());

        let first = engine.grant("u1", &request, today).unwrap();
        let second = engine.grant("u1", &request, today).unwrap();
        assert!(matches!(first, AwardOutcome::Granted { amount: 50, .. }));
        assert_eq!(second, AwardOutcome::Duplicate);

        let state = store.read_user("u1").unwrap().unwrap();
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.account.balance, 50);
    }

    #[test]
    fn test_award_cap_records_zero_amount_grant() {
        let store = MemLedgerStore::new();
        let config = StaticConfig::default(); // new_user limit = 1
        let engine = AwardEngine::new(&store, &config);
        let today = date(2024, 5, 1);

        let request = AwardRequest::new(AwardKind::NewUser);
        let first = engine.grant("u1", &request, today).unwrap();
        let second = engine.grant("u1", &request, today).unwrap();

        assert!(matches!(first, AwardOutcome::Granted { amount: 100, .. }));
        assert!(matches!(second, AwardOutcome::Granted { amount: 0, .. }));

        let state = store.read_user("u1").unwrap().unwrap();
        assert_eq!(state.entries.len(), 2);
        assert_eq!(state.account.balance, 100);
    }

    #[test]
    fn test_award_validity_sets_inclusive_end_date() {
        let store = MemLedgerStore::new();
        let config = StaticConfig::default();
        let engine = AwardEngine::new(&store, &config);
        let today = date(2024, 5, 1);

        let mut request = AwardRequest::new(AwardKind::Duration);
        request.validity_days = Some(10);
        engine.grant("u1", &request, today).unwrap();

        let state = store.read_user("u1").unwrap().unwrap();
        assert_eq!(state.entries[0].start_date, Some(today));
        assert_eq!(state.entries[0].end_date, Some(date(2024, 5, 10)));
    }

    #[test]
    fn test_unconfigured_award_without_amount_fails() {
        let store = MemLedgerStore::new();
        let mut config = StaticConfig::default();
        config.awards.duration = None;
        let engine = AwardEngine::new(&store, &config);

        let request = AwardRequest::new(AwardKind::Duration);
        let result = engine.grant("u1", &request, date(2024, 5, 1));
        assert!(matches!(
            result,
            Err(LedgerError::ConfigurationMissing(_))
        ));
        assert!(store.read_user("u1").unwrap().is_none());
    }

    #[test]
    fn test_explicit_amount_overrides_config() {
        let store = MemLedgerStore::new();
        let mut config = StaticConfig::default();
        config.awards.duration = None;
        let engine = AwardEngine::new(&store, &config);

        let mut request = AwardRequest::new(AwardKind::Duration);
        request.amount = Some(25);
        let outcome = engine.grant("u1", &request, date(2024, 5, 1)).unwrap();
        assert!(matches!(outcome, AwardOutcome::Granted { amount: 25, .. }));
    }
}
