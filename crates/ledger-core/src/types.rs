//! ============================================================================
//! Core Types for TierLedger
//! ============================================================================
//! Membership tiers, exchange periods, award kinds, and the error taxonomy
//! shared by every engine component.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Result alias for engine operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Membership tier granting access for a bounded period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Standard,
    Premium,
}

impl Tier {
    /// The other tier family (used by the cross-tier pause rule)
    pub fn other(&self) -> Tier {
        match self {
            Tier::Standard => Tier::Premium,
            Tier::Premium => Tier::Standard,
        }
    }

    /// Get human-readable tier name
    pub fn display_name(&self) -> &'static str {
        match self {
            Tier::Standard => "Standard",
            Tier::Premium => "Premium",
        }
    }

    /// Get the numeric rank for comparison
    fn rank(&self) -> u8 {
        match self {
            Tier::Standard => 0,
            Tier::Premium => 1,
        }
    }
}

impl PartialOrd for Tier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Entitlement length purchasable in a single exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangePeriod {
    Days30,
    Days90,
    Days360,
}

impl ExchangePeriod {
    /// Length of the period in days
    pub fn days(&self) -> i64 {
        match self {
            ExchangePeriod::Days30 => 30,
            ExchangePeriod::Days90 => 90,
            ExchangePeriod::Days360 => 360,
        }
    }

    /// Parse a day count into a period; only 30/90/360 are sold
    pub fn from_days(days: i64) -> Option<Self> {
        match days {
            30 => Some(ExchangePeriod::Days30),
            90 => Some(ExchangePeriod::Days90),
            360 => Some(ExchangePeriod::Days360),
            _ => None,
        }
    }
}

impl fmt::Display for ExchangePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} days", self.days())
    }
}

/// Non-purchase token grants driven by promotional or lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwardKind {
    /// Per-bot subscription award (capped, keyed by bot id)
    SubscribedBot,
    /// Invite-register award (capped, keyed by invited user)
    InviteRegister,
    /// One-time new-user grant
    NewUser,
    /// Periodic usage-duration grant
    Duration,
}

impl AwardKind {
    /// Get human-readable award name
    pub fn display_name(&self) -> &'static str {
        match self {
            AwardKind::SubscribedBot => "Bot Subscription Award",
            AwardKind::InviteRegister => "Invite Register Award",
            AwardKind::NewUser => "New User Award",
            AwardKind::Duration => "Duration Award",
        }
    }
}

impl fmt::Display for AwardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Error types for the ledger engine
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// No price or award configuration found for the request
    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),

    /// The account balance does not cover the requested exchange
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: i64, need: i64 },

    /// The storage transaction could not complete; no state was changed
    #[error("storage failure: {0}")]
    Storage(String),
}
