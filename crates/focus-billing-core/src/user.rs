//! Billing fields owned on the application's user record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;
use crate::plan::Tier;
use crate::subscription::SubscriptionStatus;

/// The billing view of a user.
///
/// Identity fields (`email`, `name`) are read-only here; they are used to
/// provision the gateway customer and prefill checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBilling {
    /// The user ID.
    pub user_id: UserId,
    /// Email address.
    pub email: String,
    /// Display name.
    pub name: Option<String>,
    /// Current tier.
    pub subscription_tier: Tier,
    /// Status of the user's current subscription, if any.
    pub subscription_status: Option<SubscriptionStatus>,
    /// Start of the paid access window.
    pub subscription_start_date: Option<DateTime<Utc>>,
    /// End of the paid access window.
    pub subscription_end_date: Option<DateTime<Utc>>,
    /// Gateway customer id, cached after first provisioning.
    pub external_customer_id: Option<String>,
}

impl UserBilling {
    /// A free user with no subscription history.
    #[must_use]
    pub fn new(user_id: UserId, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            name: None,
            subscription_tier: Tier::Free,
            subscription_status: None,
            subscription_start_date: None,
            subscription_end_date: None,
            external_customer_id: None,
        }
    }

    /// Name used for the gateway customer and checkout prefill.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }

    /// Apply a tier mirror update.
    pub fn apply(&mut self, update: &UserSubscriptionUpdate) {
        self.subscription_tier = update.tier;
        self.subscription_status = Some(update.status);
        self.subscription_start_date = update.start_date;
        self.subscription_end_date = update.end_date;
    }
}

/// The user-record half of a subscription transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSubscriptionUpdate {
    /// Tier after the transition.
    pub tier: Tier,
    /// Subscription status after the transition.
    pub status: SubscriptionStatus,
    /// Start of the access window.
    pub start_date: Option<DateTime<Utc>>,
    /// End of the access window.
    pub end_date: Option<DateTime<Utc>>,
}
