//! Payment gateway abstraction.
//!
//! The lifecycle core talks to the gateway only through [`PaymentGateway`] and
//! the neutral types in this module. Provider quirks, including how an
//! "already cancelled" or "cannot resume" rejection is spelled, are classified
//! by the provider client into [`GatewayError`] variants.

pub mod razorpay;
pub mod types;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use focus_billing_core::{PaymentStatus, SubscriptionStatus};

pub use razorpay::RazorpayClient;

/// Error type for gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway returned an error response.
    #[error("gateway API error ({status}): {code} - {description}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Provider error code.
        code: String,
        /// Provider error description.
        description: String,
    },

    /// The subscription was already cancelled at the gateway.
    #[error("subscription is already cancelled")]
    AlreadyCancelled,

    /// The provider does not support the requested change.
    #[error("operation not supported by the provider: {0}")]
    Unsupported(String),

    /// The call did not complete within the configured timeout.
    #[error("gateway call timed out: {operation}")]
    Timeout {
        /// The gateway operation.
        operation: &'static str,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// A gateway customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCustomer {
    /// Gateway customer id.
    pub id: String,
    /// Customer name.
    pub name: Option<String>,
    /// Customer email.
    pub email: Option<String>,
}

/// Parameters for creating a gateway subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSubscriptionRequest {
    /// Gateway plan id.
    pub plan_id: String,
    /// Gateway customer id.
    pub customer_id: String,
    /// Number of billing cycles to charge.
    pub total_count: u32,
    /// Plan quantity.
    pub quantity: u32,
    /// First charge time; immediately when absent.
    pub start_at: Option<DateTime<Utc>>,
    /// Deadline for the customer to authenticate.
    pub expire_by: Option<DateTime<Utc>>,
    /// Free-form notes echoed back in webhooks.
    pub notes: BTreeMap<String, String>,
}

/// Changes to apply to an existing gateway subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPatch {
    /// Reactivate a cancelled or paused subscription.
    pub resume: bool,
    /// Switch to another gateway plan.
    pub plan_id: Option<String>,
    /// New plan quantity.
    pub quantity: Option<u32>,
    /// New number of remaining cycles.
    pub remaining_count: Option<u32>,
}

impl SubscriptionPatch {
    /// A patch that only resumes the subscription.
    #[must_use]
    pub fn resume() -> Self {
        Self {
            resume: true,
            ..Self::default()
        }
    }

    /// Whether the patch changes anything besides resumption.
    #[must_use]
    pub const fn has_field_changes(&self) -> bool {
        self.plan_id.is_some() || self.quantity.is_some() || self.remaining_count.is_some()
    }
}

/// Subscription status as the gateway reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteSubscriptionStatus {
    /// Created, customer has not authenticated yet.
    Created,
    /// Mandate authenticated, first charge pending.
    Authenticated,
    /// Charging normally.
    Active,
    /// A charge failed and is being retried.
    Pending,
    /// Retries exhausted.
    Halted,
    /// Cancelled.
    Cancelled,
    /// All cycles charged.
    Completed,
    /// Never authenticated before `expire_by`.
    Expired,
    /// Paused by the merchant.
    Paused,
    /// A status this client does not know.
    #[serde(other)]
    Unknown,
}

impl RemoteSubscriptionStatus {
    /// Local status that corresponds to the remote one, if any.
    #[must_use]
    pub const fn to_local(self) -> Option<SubscriptionStatus> {
        match self {
            Self::Created => Some(SubscriptionStatus::Inactive),
            Self::Authenticated | Self::Active => Some(SubscriptionStatus::Active),
            Self::Pending | Self::Halted => Some(SubscriptionStatus::Incomplete),
            Self::Cancelled => Some(SubscriptionStatus::Cancelled),
            Self::Completed | Self::Expired => Some(SubscriptionStatus::Expired),
            Self::Paused | Self::Unknown => None,
        }
    }

    /// Whether the gateway considers the subscription chargeable.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Authenticated | Self::Active)
    }
}

/// A gateway subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSubscription {
    /// Gateway subscription id.
    pub id: String,
    /// Gateway plan id.
    pub plan_id: String,
    /// Gateway customer id.
    pub customer_id: Option<String>,
    /// Gateway status.
    pub status: RemoteSubscriptionStatus,
    /// Start of the current cycle.
    pub current_start: Option<DateTime<Utc>>,
    /// End of the current cycle.
    pub current_end: Option<DateTime<Utc>>,
    /// Next charge time.
    pub charge_at: Option<DateTime<Utc>>,
    /// Cycles charged so far.
    pub paid_count: u32,
    /// Total cycles requested.
    pub total_count: Option<u32>,
}

/// Payment status as the gateway reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemotePaymentStatus {
    /// Created, not yet attempted.
    Created,
    /// Authorized, capture pending.
    Authorized,
    /// Captured.
    Captured,
    /// Refunded.
    Refunded,
    /// Failed.
    Failed,
    /// A status this client does not know.
    #[serde(other)]
    Unknown,
}

impl RemotePaymentStatus {
    /// Provider spelling, for logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Authorized => "authorized",
            Self::Captured => "captured",
            Self::Refunded => "refunded",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    /// Local payment status, for statuses that can be recorded.
    #[must_use]
    pub const fn to_local(self) -> Option<PaymentStatus> {
        match self {
            Self::Created => Some(PaymentStatus::Pending),
            Self::Authorized => Some(PaymentStatus::Authorized),
            Self::Captured => Some(PaymentStatus::Captured),
            Self::Refunded => Some(PaymentStatus::Refunded),
            Self::Failed | Self::Unknown => None,
        }
    }
}

/// A gateway payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePayment {
    /// Gateway payment id.
    pub id: String,
    /// Amount in minor units.
    pub amount: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Gateway status.
    pub status: RemotePaymentStatus,
    /// Gateway order id.
    pub order_id: Option<String>,
    /// Payment method.
    pub method: Option<String>,
    /// Card network.
    pub card_network: Option<String>,
    /// Last four card digits.
    pub card_last4: Option<String>,
    /// Netbanking bank code.
    pub bank: Option<String>,
    /// Wallet name.
    pub wallet: Option<String>,
    /// Invoice the payment settled, for subscription charges.
    pub invoice_id: Option<String>,
    /// Subscription the gateway links the payment to.
    pub subscription_id: Option<String>,
    /// When the gateway created the payment.
    pub created_at: Option<DateTime<Utc>>,
}

/// Operations the lifecycle core needs from a payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a customer, or return the existing one for the same email.
    async fn create_customer(&self, name: &str, email: &str)
        -> Result<GatewayCustomer, GatewayError>;

    /// Create a subscription.
    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<RemoteSubscription, GatewayError>;

    /// Fetch a subscription.
    async fn fetch_subscription(&self, id: &str) -> Result<RemoteSubscription, GatewayError>;

    /// Fetch a payment.
    async fn fetch_payment(&self, id: &str) -> Result<RemotePayment, GatewayError>;

    /// Cancel a subscription now or at the end of the current cycle.
    ///
    /// Returns `GatewayError::AlreadyCancelled` when there is nothing to cancel.
    async fn cancel_subscription(
        &self,
        id: &str,
        cancel_at_cycle_end: bool,
    ) -> Result<RemoteSubscription, GatewayError>;

    /// Apply a patch.
    ///
    /// Returns `GatewayError::Unsupported` when the provider rejects the change.
    async fn update_subscription(
        &self,
        id: &str,
        patch: &SubscriptionPatch,
    ) -> Result<RemoteSubscription, GatewayError>;

    /// Public key handed to the hosted checkout.
    fn public_key(&self) -> &str;
}
