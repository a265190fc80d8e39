//! Plan catalog types.
//!
//! Plans are read-only configuration rows. Amounts are integer minor units
//! (paise, cents) of the plan's currency.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

/// Default number of billing cycles requested for monthly subscriptions.
pub const MONTHLY_TOTAL_CYCLES: u32 = 120;

/// Default number of billing cycles requested for yearly subscriptions.
pub const YEARLY_TOTAL_CYCLES: u32 = 10;

/// Subscription tier mirrored onto the user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// No paid features.
    Free,
    /// Paid features unlocked.
    Pro,
}

impl Tier {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            other => Err(ParseEnumError::new("tier", other)),
        }
    }
}

/// How often a plan bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    /// One charge per calendar month.
    Monthly,
    /// One charge per calendar year.
    Yearly,
}

impl BillingPeriod {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Number of billing cycles requested from the gateway when a
    /// subscription is created.
    #[must_use]
    pub const fn total_cycles(&self) -> u32 {
        match self {
            Self::Monthly => MONTHLY_TOTAL_CYCLES,
            Self::Yearly => YEARLY_TOTAL_CYCLES,
        }
    }

    /// End of a billing period that starts at `start`.
    #[must_use]
    pub fn period_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        let (months, fallback_days) = match self {
            Self::Monthly => (1, 30),
            Self::Yearly => (12, 365),
        };
        start
            .checked_add_months(Months::new(months))
            .unwrap_or_else(|| start + Duration::days(fallback_days))
    }
}

impl std::str::FromStr for BillingPeriod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(ParseEnumError::new("billing period", other)),
        }
    }
}

/// A purchasable plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanConfiguration {
    /// Catalog identifier, e.g. `pro_monthly`.
    pub plan_id: String,

    /// Human-readable plan name shown at checkout.
    pub name: String,

    /// Tier granted by the plan.
    pub tier: Tier,

    /// Billing period.
    pub billing_period: BillingPeriod,

    /// Price per billing cycle in minor units.
    pub amount: i64,

    /// ISO 4217 currency code.
    pub currency: String,

    /// The gateway's plan identifier.
    pub external_plan_id: String,

    /// Whether the plan can be purchased at all.
    pub is_active: bool,

    /// Last instant at which the plan can be purchased.
    pub available_until: Option<DateTime<Utc>>,

    /// Sort key for catalog listings.
    pub display_order: i32,
}

impl PlanConfiguration {
    /// Whether the plan can be purchased at `now`.
    #[must_use]
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.available_until.map_or(true, |until| until > now)
    }
}
