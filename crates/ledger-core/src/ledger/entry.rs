//! ============================================================================
//! Ledger Entries - Immutable-once-settled token credit/debit records
//! ============================================================================
//! Every token movement is one entry: credits (purchases, awards) carry a
//! positive amount and a `used` counter consumed by exchanges; debits (tier
//! purchases, expirations) carry a negative amount. Entries are never
//! physically deleted; `EntryStatus::Deleted` is the tombstone.
//! ============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AwardKind, ExchangePeriod, Tier};

/// Classifies what a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Token purchase through the payment gateway
    Purchase,
    ExchangeStandard30,
    ExchangeStandard90,
    ExchangeStandard360,
    ExchangePremium30,
    ExchangePremium90,
    ExchangePremium360,
    AwardSubscribedBot,
    AwardInviteRegister,
    AwardNewUser,
    AwardDuration,
    /// Forfeiture of unused tokens on an expired credit
    Expiration,
}

impl EntryType {
    /// The debit type for a tier exchange. Direct `{30,90,360}` mapping for
    /// both tier families.
    pub fn exchange(tier: Tier, period: ExchangePeriod) -> Self {
        match (tier, period) {
            (Tier::Standard, ExchangePeriod::Days30) => EntryType::ExchangeStandard30,
            (Tier::Standard, ExchangePeriod::Days90) => EntryType::ExchangeStandard90,
            (Tier::Standard, ExchangePeriod::Days360) => EntryType::ExchangeStandard360,
            (Tier::Premium, ExchangePeriod::Days30) => EntryType::ExchangePremium30,
            (Tier::Premium, ExchangePeriod::Days90) => EntryType::ExchangePremium90,
            (Tier::Premium, ExchangePeriod::Days360) => EntryType::ExchangePremium360,
        }
    }

    /// The credit type for an award grant
    pub fn award(kind: AwardKind) -> Self {
        match kind {
            AwardKind::SubscribedBot => EntryType::AwardSubscribedBot,
            AwardKind::InviteRegister => EntryType::AwardInviteRegister,
            AwardKind::NewUser => EntryType::AwardNewUser,
            AwardKind::Duration => EntryType::AwardDuration,
        }
    }

    /// Credits carry spendable tokens (purchases and all award kinds)
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            EntryType::Purchase
                | EntryType::AwardSubscribedBot
                | EntryType::AwardInviteRegister
                | EntryType::AwardNewUser
                | EntryType::AwardDuration
        )
    }

    /// Tier-exchange debits participate in the active/frozen entry lifecycle
    pub fn is_exchange(&self) -> bool {
        self.tier().is_some()
    }

    /// The tier family of an exchange debit, None for credits/expirations
    pub fn tier(&self) -> Option<Tier> {
        match self {
            EntryType::ExchangeStandard30
            | EntryType::ExchangeStandard90
            | EntryType::ExchangeStandard360 => Some(Tier::Standard),
            EntryType::ExchangePremium30
            | EntryType::ExchangePremium90
            | EntryType::ExchangePremium360 => Some(Tier::Premium),
            _ => None,
        }
    }
}

/// Lifecycle state of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Tombstone; excluded from balance and consumption
    Deleted,
    /// Settled credit, or a tier entry whose period has run out
    Completed,
    /// The tier entry currently being consumed (at most one per user)
    InProgress,
    /// Queued or paused tier entry waiting for promotion
    Freezing,
}

/// One token credit or debit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub user_id: String,
    /// Unique transaction identifier (generated)
    pub trade_no: String,
    /// Human-readable description for statements
    pub title: String,
    /// Signed token amount: positive = credit, negative = debit
    pub amount: i64,
    /// External currency paid (credits from the payment gateway only)
    pub pay_amount: i64,
    /// How much of this credit has been consumed by exchanges
    pub used: i64,
    pub entry_type: EntryType,
    /// External/idempotency key (gateway trade id, awarded entity id)
    pub out_trade_no: Option<String>,
    pub start_date: Option<NaiveDate>,
    /// None means a non-expiring credit
    pub end_date: Option<NaiveDate>,
    /// Set only while a tier entry is paused mid-flight
    pub freezing_date: Option<NaiveDate>,
    pub status: EntryStatus,
    pub created_at: i64,
}

impl LedgerEntry {
    /// Create a settled credit entry (purchase or award).
    pub fn credit(
        user_id: &str,
        entry_type: EntryType,
        title: &str,
        amount: i64,
        out_trade_no: Option<String>,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            trade_no: Uuid::new_v4().to_string(),
            title: title.to_string(),
            amount,
            pay_amount: 0,
            used: 0,
            entry_type,
            out_trade_no,
            start_date: Some(start_date),
            end_date,
            freezing_date: None,
            status: EntryStatus::Completed,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Create a tier-exchange debit entry covering `[start_date, end_date]`.
    pub fn debit(
        user_id: &str,
        entry_type: EntryType,
        title: &str,
        cost: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        status: EntryStatus,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            trade_no: Uuid::new_v4().to_string(),
            title: title.to_string(),
            amount: -cost,
            pay_amount: 0,
            used: 0,
            entry_type,
            out_trade_no: None,
            start_date: Some(start_date),
            end_date: Some(end_date),
            freezing_date: None,
            status,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Unspent tokens on a credit entry
    pub fn remaining(&self) -> i64 {
        self.amount - self.used
    }

    /// Live credit with tokens left to spend
    pub fn is_spendable_credit(&self) -> bool {
        self.status != EntryStatus::Deleted && self.entry_type.is_credit() && self.used < self.amount
    }

    /// Counted toward the account balance
    pub fn counts_toward_balance(&self) -> bool {
        self.status != EntryStatus::Deleted && self.entry_type.is_credit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_exchange_type_mapping() {
        // The premium mapping is direct for every period; the source's
        // duplicated premium case was a defect.
        assert_eq!(
            EntryType::exchange(Tier::Premium, ExchangePeriod::Days30),
            EntryType::ExchangePremium30
        );
        assert_eq!(
            EntryType::exchange(Tier::Premium, ExchangePeriod::Days90),
            EntryType::ExchangePremium90
        );
        assert_eq!(
            EntryType::exchange(Tier::Premium, ExchangePeriod::Days360),
            EntryType::ExchangePremium360
        );
        assert_eq!(
            EntryType::exchange(Tier::Standard, ExchangePeriod::Days90),
            EntryType::ExchangeStandard90
        );
    }

    #[test]
    fn test_entry_classification() {
        assert!(EntryType::Purchase.is_credit());
        assert!(EntryType::AwardNewUser.is_credit());
        assert!(!EntryType::ExchangeStandard30.is_credit());
        assert!(!EntryType::Expiration.is_credit());
        assert_eq!(EntryType::ExchangePremium360.tier(), Some(Tier::Premium));
        assert_eq!(EntryType::Purchase.tier(), None);
    }

    #[test]
    fn test_credit_consumption_helpers() {
        let mut entry = LedgerEntry::credit(
            "u1",
            EntryType::Purchase,
            "Token purchase",
            100,
            None,
            date(2024, 1, 1),
            None,
        );
        assert_eq!(entry.remaining(), 100);
        assert!(entry.is_spendable_credit());

        entry.used = 100;
        assert_eq!(entry.remaining(), 0);
        assert!(!entry.is_spendable_credit());
        assert!(entry.counts_toward_balance());

        entry.status = EntryStatus::Deleted;
        assert!(!entry.counts_toward_balance());
    }
}
