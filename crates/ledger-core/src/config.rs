//! ============================================================================
//! Config Provider - Award amounts, caps, and exchange prices
//! ============================================================================
//! The engine never hardcodes token economics: award sizes, lifetime caps,
//! validity windows and tier prices come from a [`ConfigProvider`]. The
//! bundled [`StaticConfig`] deserializes from a JSON document and falls back
//! to built-in defaults (can be customized per deployment).
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{AwardKind, ExchangePeriod, LedgerError, Result, Tier};

/// Configuration for one award kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwardConfig {
    /// Tokens granted per award
    pub per: i64,
    /// Lifetime cap on grants of this kind, None = uncapped
    pub limit: Option<u32>,
    /// Days the granted tokens stay spendable, None = non-expiring
    pub period_of_validity: Option<i64>,
}

/// Supplies award and pricing configuration to the engines.
pub trait ConfigProvider: Send + Sync {
    /// Award amount/cap/validity for a kind, None if unconfigured
    fn award_config(&self, kind: AwardKind) -> Option<AwardConfig>;

    /// Token cost of a tier/period exchange, None if not sold
    fn exchange_price(&self, tier: Tier, period: ExchangePeriod) -> Option<i64>;

    /// Tokens credited per unit of external currency on a purchase
    fn purchase_rate(&self) -> i64;
}

/// Price table for one tier family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierPrices {
    pub days_30: Option<i64>,
    pub days_90: Option<i64>,
    pub days_360: Option<i64>,
}

impl TierPrices {
    fn price(&self, period: ExchangePeriod) -> Option<i64> {
        match period {
            ExchangePeriod::Days30 => self.days_30,
            ExchangePeriod::Days90 => self.days_90,
            ExchangePeriod::Days360 => self.days_360,
        }
    }
}

impl Default for TierPrices {
    fn default() -> Self {
        Self {
            days_30: None,
            days_90: None,
            days_360: None,
        }
    }
}

/// Award table keyed by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwardTable {
    pub subscribed_bot: Option<AwardConfig>,
    pub invite_register: Option<AwardConfig>,
    pub new_user: Option<AwardConfig>,
    pub duration: Option<AwardConfig>,
}

impl Default for AwardTable {
    fn default() -> Self {
        Self {
            subscribed_bot: Some(AwardConfig {
                per: 50,
                limit: Some(10),
                period_of_validity: Some(90),
            }),
            invite_register: Some(AwardConfig {
                per: 100,
                limit: Some(50),
                period_of_validity: None,
            }),
            new_user: Some(AwardConfig {
                per: 100,
                limit: Some(1),
                period_of_validity: None,
            }),
            duration: Some(AwardConfig {
                per: 10,
                limit: None,
                period_of_validity: Some(30),
            }),
        }
    }
}

/// File/default-backed configuration (can be customized per deployment).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticConfig {
    /// Tokens per unit of external currency paid
    pub purchase_rate: i64,
    pub standard: TierPrices,
    pub premium: TierPrices,
    pub awards: AwardTable,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            purchase_rate: 100,
            standard: TierPrices {
                days_30: Some(450),
                days_90: Some(1200),
                days_360: Some(4200),
            },
            premium: TierPrices {
                days_30: Some(900),
                days_90: Some(2400),
                days_360: Some(8400),
            },
            awards: AwardTable::default(),
        }
    }
}

impl StaticConfig {
    /// Load configuration from a JSON file. Missing fields fall back to the
    /// built-in defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Storage(format!("failed to read config file: {}", e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| LedgerError::Storage(format!("failed to parse config file: {}", e)))
    }
}

impl ConfigProvider for StaticConfig {
    fn award_config(&self, kind: AwardKind) -> Option<AwardConfig> {
        match kind {
            AwardKind::SubscribedBot => self.awards.subscribed_bot.clone(),
            AwardKind::InviteRegister => self.awards.invite_register.clone(),
            AwardKind::NewUser => self.awards.new_user.clone(),
            AwardKind::Duration => self.awards.duration.clone(),
        }
    }

    fn exchange_price(&self, tier: Tier, period: ExchangePeriod) -> Option<i64> {
        match tier {
            Tier::Standard => self.standard.price(period),
            Tier::Premium => self.premium.price(period),
        }
    }

    fn purchase_rate(&self) -> i64 {
        self.purchase_rate
    }
}
