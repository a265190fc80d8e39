//! Payment records.
//!
//! Payments are append-only. One row is written per gateway payment id; the
//! activation payment and every renewal charge each get their own row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::ids::{PaymentId, SubscriptionId, UserId};

/// Settlement status of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created but not yet authorized.
    Pending,
    /// Authorized by the issuer, capture pending.
    Authorized,
    /// Funds captured.
    Captured,
    /// Refunded, typically an authentication charge.
    Refunded,
}

impl PaymentStatus {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authorized => "authorized",
            Self::Captured => "captured",
            Self::Refunded => "refunded",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "authorized" => Ok(Self::Authorized),
            "captured" => Ok(Self::Captured),
            "refunded" => Ok(Self::Refunded),
            other => Err(ParseEnumError::new("payment status", other)),
        }
    }
}

/// Masked description of the instrument used for a payment.
///
/// Never holds full card numbers; only what the gateway already exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInstrument {
    /// Card network (Visa, `MasterCard`, `RuPay`...).
    pub card_network: Option<String>,
    /// Last four digits of the card.
    pub card_last4: Option<String>,
    /// Bank code for netbanking payments.
    pub bank: Option<String>,
    /// Wallet name for wallet payments.
    pub wallet: Option<String>,
}

/// A payment row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Local identifier.
    pub id: PaymentId,
    /// Paying user.
    pub user_id: UserId,
    /// Subscription the payment belongs to.
    pub subscription_id: SubscriptionId,
    /// Gateway payment id (unique).
    pub external_payment_id: String,
    /// Gateway order id, when the gateway created one.
    pub external_order_id: Option<String>,
    /// Amount in minor units.
    pub amount: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Settlement status at the time of recording.
    pub status: PaymentStatus,
    /// Payment method (card, upi, netbanking, wallet...).
    pub method: Option<String>,
    /// Masked instrument details.
    pub instrument: PaymentInstrument,
    /// When the funds were captured.
    pub captured_at: Option<DateTime<Utc>>,
    /// When the payment was refunded.
    pub refunded_at: Option<DateTime<Utc>>,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Whether this payment moved money that the user keeps paying for.
    ///
    /// Refunded authentication charges do not count toward amounts paid.
    #[must_use]
    pub const fn counts_toward_total(&self) -> bool {
        matches!(self.status, PaymentStatus::Authorized | PaymentStatus::Captured)
    }
}
