//! ============================================================================
//! Exchange Engine - Tokens to tier time
//! ============================================================================
//! Converts a user's token balance into a period of standard or premium
//! access. Credits are consumed soonest-to-expire first so value is not lost
//! to expiry; cross-tier purchases pause the running entitlement and bank its
//! unused days.
//! ============================================================================

use chrono::{Duration, NaiveDate};
use tracing::info;

use crate::config::ConfigProvider;
use crate::ledger::{EntryStatus, EntryType, LedgerEntry};
use crate::store::LedgerStore;
use crate::types::{ExchangePeriod, LedgerError, Result, Tier};

/// Details of a completed exchange.
#[derive(Debug, Clone)]
pub struct ExchangeReceipt {
    pub trade_no: String,
    pub cost: i64,
    /// First day covered by the new entry
    pub start_date: NaiveDate,
    /// Last day covered (inclusive)
    pub end_date: NaiveDate,
    /// Whether the entry started running or was queued
    pub status: EntryStatus,
}

/// Exchanges balance for tier entitlement time.
pub struct ExchangeEngine<'a, S, C> {
    store: &'a S,
    config: &'a C,
}

impl<'a, S: LedgerStore, C: ConfigProvider> ExchangeEngine<'a, S, C> {
    pub fn new(store: &'a S, config: &'a C) -> Self {
        Self { store, config }
    }

    /// Exchange tokens for `period` of `tier` access. One atomic
    /// transaction: any failure after the balance check rolls back every
    /// ledger and account mutation.
    pub fn exchange(
        &self,
        user_id: &str,
        tier: Tier,
        period: ExchangePeriod,
        today: NaiveDate,
    ) -> Result<ExchangeReceipt> {
        // Price lookup happens before the transaction begins
        let cost = self.config.exchange_price(tier, period).ok_or_else(|| {
            LedgerError::ConfigurationMissing(format!("exchange price for {} {}", tier, period))
        })?;

        self.store.mutate_user(user_id, |state| {
            // Never trust the cached balance for a spend decision
            let balance = state.recompute_balance();
            if balance < cost {
                return Err(LedgerError::InsufficientBalance {
                    have: balance,
                    need: cost,
                });
            }

            drain_credits(&mut state.entries, cost);

            // New entitlement window: extend a live end date, otherwise the
            // period starts today. First purchase covers `period` days
            // inclusive of today, renewal appends after the current end.
            let (start_date, end_date) = match state.account.tier_end_date(tier) {
                Some(end) if end >= today => (
                    end + Duration::days(1),
                    end + Duration::days(period.days()),
                ),
                _ => (today, today + Duration::days(period.days() - 1)),
            };
            state.account.set_tier_end_date(tier, Some(end_date));

            let status = match state.running_exchange() {
                None => EntryStatus::InProgress,
                Some(idx) => {
                    let running_tier = state.entries[idx].entry_type.tier();
                    if running_tier == Some(tier) {
                        // Queued behind the running same-tier entry; no
                        // freezing date because nothing was interrupted
                        EntryStatus::Freezing
                    } else {
                        // Buying the other tier pauses the running entry and
                        // the new tier takes over consumption
                        state.entries[idx].status = EntryStatus::Freezing;
                        state.entries[idx].freezing_date = Some(today);
                        if running_tier == Some(Tier::Standard) {
                            if let Some(end) = state.account.standard_end_date {
                                let remain = (end - today).num_days() + 1;
                                if remain > 0 {
                                    state.account.standard_remain_days = remain;
                                }
                            }
                        }
                        EntryStatus::InProgress
                    }
                }
            };

            let title = format!("{} membership, {}", tier, period);
            let entry = LedgerEntry::debit(
                user_id,
                EntryType::exchange(tier, period),
                &title,
                cost,
                start_date,
                end_date,
                status,
            );
            let trade_no = entry.trade_no.clone();
            state.entries.push(entry);
            state.recompute_balance();
            state.account.touch();

            info!(
                "User {} exchanged {} tokens for {} {} ({} - {})",
                user_id, cost, tier, period, start_date, end_date
            );
            Ok(ExchangeReceipt {
                trade_no,
                cost,
                start_date,
                end_date,
                status,
            })
        })
    }
}

/// FIFO consumption: walk spendable credits ordered by end date ascending
/// with non-expiring credits last, creation order breaking ties, debiting
/// `used` until `cost` tokens are drained. Callers verify the balance covers
/// `cost` first.
fn drain_credits(entries: &mut [LedgerEntry], cost: i64) {
    let mut order: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_spendable_credit())
        .map(|(i, _)| i)
        .collect();
    order.sort_by_key(|&i| (entries[i].end_date.is_none(), entries[i].end_date, i));

    let mut left = cost;
    for i in order {
        if left == 0 {
            break;
        }
        let take = entries[i].remaining().min(left);
        entries[i].used += take;
        left -= take;
    }
}
