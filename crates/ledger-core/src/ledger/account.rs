//! ============================================================================
//! Account Projection - Per-user balance and tier end-dates
//! ============================================================================
//! The account is a cached projection over the user's ledger entries. It is
//! owned exclusively by the engine: only the award, exchange, reconciliation
//! and VIP components mutate it, always inside the same transaction as the
//! entries it is derived from.
//! ============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::Tier;

/// Per-user account state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    /// Cached token balance; always equals the sum of `amount - used` over
    /// the user's non-deleted credit entries
    pub balance: i64,
    pub standard_end_date: Option<NaiveDate>,
    /// Unused standard days banked while standard access is paused
    pub standard_remain_days: i64,
    pub premium_end_date: Option<NaiveDate>,
    /// Unused premium days banked while premium access is paused
    pub premium_remain_days: i64,
    /// Administrative override suspending expiry accounting
    pub is_vip: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Account {
    /// Create a new account with zero balance and no entitlements.
    pub fn new(user_id: &str) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            user_id: user_id.to_string(),
            balance: 0,
            standard_end_date: None,
            standard_remain_days: 0,
            premium_end_date: None,
            premium_remain_days: 0,
            is_vip: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn tier_end_date(&self, tier: Tier) -> Option<NaiveDate> {
        match tier {
            Tier::Standard => self.standard_end_date,
            Tier::Premium => self.premium_end_date,
        }
    }

    pub fn set_tier_end_date(&mut self, tier: Tier, end: Option<NaiveDate>) {
        match tier {
            Tier::Standard => self.standard_end_date = end,
            Tier::Premium => self.premium_end_date = end,
        }
    }

    pub fn remain_days(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Standard => self.standard_remain_days,
            Tier::Premium => self.premium_remain_days,
        }
    }

    pub fn set_remain_days(&mut self, tier: Tier, days: i64) {
        match tier {
            Tier::Standard => self.standard_remain_days = days,
            Tier::Premium => self.premium_remain_days = days,
        }
    }

    /// Whether the tier's entitlement window covers `today`
    pub fn is_tier_active(&self, tier: Tier, today: NaiveDate) -> bool {
        self.tier_end_date(tier).is_some_and(|end| end >= today)
    }

    /// The highest tier active today, if any
    pub fn current_tier(&self, today: NaiveDate) -> Option<Tier> {
        if self.is_tier_active(Tier::Premium, today) {
            Some(Tier::Premium)
        } else if self.is_tier_active(Tier::Standard, today) {
            Some(Tier::Standard)
        } else {
            None
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
    }
}
