//! Subscription records and the subscription state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::ids::{SubscriptionId, UserId};
use crate::plan::{BillingPeriod, PlanConfiguration, Tier};

const SECONDS_PER_DAY: i64 = 86_400;

/// Lifecycle status of a subscription row.
///
/// ```text
/// INACTIVE ──► ACTIVE ──► CANCELLED ──► EXPIRED
///    │           │ ▲          │            ▲
///    │           │ └──resume──┘            │
///    │           └──► INCOMPLETE ──────────┤
///    └─────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created locally and at the gateway, awaiting the first payment.
    Inactive,
    /// Trial access without a captured payment.
    Trial,
    /// Paid and current.
    Active,
    /// Gateway could not collect a renewal charge.
    Incomplete,
    /// Cancelled; may still grant access until the period ends.
    Cancelled,
    /// Terminal.
    Expired,
}

impl SubscriptionStatus {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Trial => "trial",
            Self::Active => "active",
            Self::Incomplete => "incomplete",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Statuses that count toward the one-live-subscription-per-user limit.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Trial)
    }

    /// Whether a row in this status may move to `next`.
    ///
    /// `Active -> Active` is a renewal and is allowed.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        use SubscriptionStatus::{Active, Cancelled, Expired, Inactive, Incomplete, Trial};
        matches!(
            (self, next),
            (Inactive, Active | Expired)
                | (Trial, Active | Cancelled | Expired)
                | (Active, Active | Cancelled | Expired | Incomplete)
                | (Incomplete, Active | Cancelled | Expired)
                | (Cancelled, Active | Expired)
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(Self::Inactive),
            "trial" => Ok(Self::Trial),
            "active" => Ok(Self::Active),
            "incomplete" => Ok(Self::Incomplete),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(ParseEnumError::new("subscription status", other)),
        }
    }
}

/// Client surface that started a checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionSource {
    /// Web application.
    Web,
    /// iOS application.
    Ios,
    /// Android application.
    Android,
}

impl SubscriptionSource {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Ios => "ios",
            Self::Android => "android",
        }
    }
}

impl std::str::FromStr for SubscriptionSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Self::Web),
            "ios" => Ok(Self::Ios),
            "android" => Ok(Self::Android),
            other => Err(ParseEnumError::new("subscription source", other)),
        }
    }
}

/// A subscription row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Local identifier.
    pub id: SubscriptionId,

    /// Owning user.
    pub user_id: UserId,

    /// Gateway customer the subscription was created for.
    pub external_customer_id: String,

    /// Gateway subscription id, set once the gateway accepted the subscription.
    pub external_subscription_id: Option<String>,

    /// Catalog plan id.
    pub plan_type: String,

    /// Price per cycle in minor units, copied from the plan at creation.
    pub plan_amount: i64,

    /// ISO 4217 currency code.
    pub currency: String,

    /// Billing period of the plan.
    pub billing_cycle: BillingPeriod,

    /// Start of the current billing period.
    pub current_period_start: DateTime<Utc>,

    /// End of the current billing period.
    pub current_period_end: DateTime<Utc>,

    /// Current lifecycle status.
    pub status: SubscriptionStatus,

    /// Whether the gateway will charge again at period end.
    pub auto_renew: bool,

    /// Cancellation takes effect when the current period ends.
    pub cancel_at_period_end: bool,

    /// When the cancellation was requested.
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Free-form cancellation reason supplied by the user.
    pub cancel_reason: Option<String>,

    /// First activation time.
    pub activated_at: Option<DateTime<Utc>>,

    /// Most recent successful payment.
    pub last_payment_date: Option<DateTime<Utc>>,

    /// Number of billing cycles paid for.
    pub total_billing_cycles: i32,

    /// Lifetime amount paid in minor units.
    pub total_amount_paid: i64,

    /// When the gateway is expected to charge next.
    pub next_billing_date: Option<DateTime<Utc>>,

    /// Where the checkout started.
    pub source: SubscriptionSource,

    /// Request metadata captured at creation (client IP, user agent).
    pub metadata: serde_json::Value,

    /// When the row was inserted.
    pub created_at: DateTime<Utc>,

    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Build a new INACTIVE row with a provisional period starting at `now`.
    #[must_use]
    pub fn pending(
        user_id: UserId,
        external_customer_id: String,
        plan: &PlanConfiguration,
        source: SubscriptionSource,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SubscriptionId::generate(),
            user_id,
            external_customer_id,
            external_subscription_id: None,
            plan_type: plan.plan_id.clone(),
            plan_amount: plan.amount,
            currency: plan.currency.clone(),
            billing_cycle: plan.billing_period,
            current_period_start: now,
            current_period_end: plan.billing_period.period_end(now),
            status: SubscriptionStatus::Inactive,
            auto_renew: true,
            cancel_at_period_end: false,
            cancelled_at: None,
            cancel_reason: None,
            activated_at: None,
            last_payment_date: None,
            total_billing_cycles: 0,
            total_amount_paid: 0,
            next_billing_date: None,
            source,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this row entitles the user to Pro features at `now`.
    #[must_use]
    pub fn grants_access(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::Trial => true,
            SubscriptionStatus::Cancelled => {
                self.cancel_at_period_end && self.current_period_end > now
            }
            _ => false,
        }
    }

    /// Tier the owning user should have while this row is their current one.
    #[must_use]
    pub fn entitled_tier(&self, now: DateTime<Utc>) -> Tier {
        if self.grants_access(now) {
            Tier::Pro
        } else {
            Tier::Free
        }
    }

    /// Whole days left in the current period, rounded up, never negative.
    #[must_use]
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        let seconds = (self.current_period_end - now).num_seconds();
        if seconds <= 0 {
            0
        } else {
            (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
        }
    }

    /// An ACTIVE row whose period ended without a renewal or a scheduled
    /// cancellation.
    #[must_use]
    pub fn is_silently_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active
            && !self.cancel_at_period_end
            && self.current_period_end < now
    }

    /// A CANCELLED row whose remaining access has run out.
    #[must_use]
    pub fn is_cancellation_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Cancelled && self.current_period_end <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn plan() -> PlanConfiguration {
        PlanConfiguration {
            plan_id: "pro_monthly".into(),
            name: "Pro Monthly".into(),
            tier: Tier::Pro,
            billing_period: BillingPeriod::Monthly,
            amount: 19_900,
            currency: "INR".into(),
            external_plan_id: "plan_ext_1".into(),
            is_active: true,
            available_until: None,
            display_order: 1,
        }
    }

    fn subscription(now: DateTime<Utc>) -> Subscription {
        Subscription::pending(
            UserId::generate(),
            "cust_1".into(),
            &plan(),
            SubscriptionSource::Web,
            serde_json::Value::Null,
            now,
        )
    }

    #[test]
    fn pending_row_copies_plan_price() {
        let now = Utc::now();
        let sub = subscription(now);
        assert_eq!(sub.status, SubscriptionStatus::Inactive);
        assert_eq!(sub.plan_amount, 19_900);
        assert_eq!(sub.current_period_start, now);
        assert!(sub.current_period_end > now);
        assert!(sub.external_subscription_id.is_none());
    }

    #[test]
    fn expired_is_terminal() {
        for next in [
            SubscriptionStatus::Inactive,
            SubscriptionStatus::Trial,
            SubscriptionStatus::Active,
            SubscriptionStatus::Incomplete,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Expired,
        ] {
            assert!(!SubscriptionStatus::Expired.can_transition_to(next));
        }
    }

    #[test]
    fn cancelled_can_only_resume_or_expire() {
        let cancelled = SubscriptionStatus::Cancelled;
        assert!(cancelled.can_transition_to(SubscriptionStatus::Active));
        assert!(cancelled.can_transition_to(SubscriptionStatus::Expired));
        assert!(!cancelled.can_transition_to(SubscriptionStatus::Incomplete));
        assert!(!cancelled.can_transition_to(SubscriptionStatus::Inactive));
    }

    #[test]
    fn inactive_cannot_be_cancelled() {
        assert!(!SubscriptionStatus::Inactive.can_transition_to(SubscriptionStatus::Cancelled));
    }

    #[test]
    fn cancelled_at_period_end_keeps_access_until_period_end() {
        let now = Utc::now();
        let mut sub = subscription(now);
        sub.status = SubscriptionStatus::Cancelled;
        sub.cancel_at_period_end = true;
        sub.current_period_end = now + Duration::days(3);
        assert!(sub.grants_access(now));
        assert_eq!(sub.entitled_tier(now), Tier::Pro);

        sub.current_period_end = now - Duration::seconds(1);
        assert!(!sub.grants_access(now));
        assert!(sub.is_cancellation_elapsed(now));
    }

    #[test]
    fn immediate_cancellation_drops_access() {
        let now = Utc::now();
        let mut sub = subscription(now);
        sub.status = SubscriptionStatus::Cancelled;
        sub.cancel_at_period_end = false;
        assert_eq!(sub.entitled_tier(now), Tier::Free);
    }

    #[test]
    fn days_remaining_rounds_up_and_clamps() {
        let now = Utc::now();
        let mut sub = subscription(now);
        sub.current_period_end = now + Duration::hours(25);
        assert_eq!(sub.days_remaining(now), 2);
        sub.current_period_end = now + Duration::days(1);
        assert_eq!(sub.days_remaining(now), 1);
        sub.current_period_end = now - Duration::days(4);
        assert_eq!(sub.days_remaining(now), 0);
    }

    #[test]
    fn silently_expired_ignores_scheduled_cancellations() {
        let now = Utc::now();
        let mut sub = subscription(now);
        sub.status = SubscriptionStatus::Active;
        sub.current_period_end = now - Duration::minutes(5);
        assert!(sub.is_silently_expired(now));

        sub.cancel_at_period_end = true;
        assert!(!sub.is_silently_expired(now));
    }
}
