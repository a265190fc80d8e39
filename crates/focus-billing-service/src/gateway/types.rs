//! Razorpay API types.
//!
//! Timestamps on the wire are Unix seconds; amounts are integer minor units.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    GatewayCustomer, RemotePayment, RemotePaymentStatus, RemoteSubscription,
    RemoteSubscriptionStatus,
};

/// Convert optional Unix seconds into a UTC timestamp.
fn from_unix(seconds: Option<i64>) -> Option<DateTime<Utc>> {
    seconds.and_then(|s| DateTime::from_timestamp(s, 0))
}

/// Body of `POST /customers`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateCustomerBody<'a> {
    /// Customer name.
    pub name: &'a str,
    /// Customer email.
    pub email: &'a str,
    /// `"0"` returns the existing customer for the same email instead of failing.
    pub fail_existing: &'a str,
}

/// Razorpay customer object.
#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    /// Customer ID (`cust_...`).
    pub id: String,
    /// Customer name.
    #[serde(default)]
    pub name: Option<String>,
    /// Customer email.
    #[serde(default)]
    pub email: Option<String>,
}

impl From<Customer> for GatewayCustomer {
    fn from(customer: Customer) -> Self {
        Self {
            id: customer.id,
            name: customer.name,
            email: customer.email,
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn notes_empty(notes: &&BTreeMap<String, String>) -> bool {
    notes.is_empty()
}

/// Body of `POST /subscriptions`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSubscriptionBody<'a> {
    /// Plan ID (`plan_...`).
    pub plan_id: &'a str,
    /// Customer ID (`cust_...`).
    pub customer_id: &'a str,
    /// Number of billing cycles.
    pub total_count: u32,
    /// Plan quantity.
    pub quantity: u32,
    /// Whether Razorpay emails the customer (0 or 1).
    pub customer_notify: u8,
    /// First charge time (Unix).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_at: Option<i64>,
    /// Authentication deadline (Unix).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_by: Option<i64>,
    /// Notes.
    #[serde(skip_serializing_if = "notes_empty")]
    pub notes: &'a BTreeMap<String, String>,
}

/// Body of `POST /subscriptions/{id}/cancel`.
#[derive(Debug, Clone, Serialize)]
pub struct CancelSubscriptionBody {
    /// 1 to cancel at the end of the current cycle, 0 to cancel now.
    pub cancel_at_cycle_end: u8,
}

/// Body of `POST /subscriptions/{id}/resume`.
#[derive(Debug, Clone, Serialize)]
pub struct ResumeSubscriptionBody {
    /// Always `"now"`.
    pub resume_at: &'static str,
}

/// Body of `PATCH /subscriptions/{id}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateSubscriptionBody<'a> {
    /// New plan ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<&'a str>,
    /// New quantity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    /// New remaining count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_count: Option<u32>,
    /// When the change applies.
    pub schedule_change_at: &'static str,
}

/// Razorpay subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    /// Subscription ID (`sub_...`).
    pub id: String,
    /// Plan ID.
    #[serde(default)]
    pub plan_id: String,
    /// Customer ID.
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Status.
    pub status: RemoteSubscriptionStatus,
    /// Current cycle start (Unix).
    #[serde(default)]
    pub current_start: Option<i64>,
    /// Current cycle end (Unix).
    #[serde(default)]
    pub current_end: Option<i64>,
    /// Next charge (Unix).
    #[serde(default)]
    pub charge_at: Option<i64>,
    /// Cycles charged so far.
    #[serde(default)]
    pub paid_count: u32,
    /// Total cycles.
    #[serde(default)]
    pub total_count: Option<u32>,
    /// Notes.
    #[serde(default)]
    pub notes: serde_json::Value,
}

impl From<Subscription> for RemoteSubscription {
    fn from(sub: Subscription) -> Self {
        Self {
            id: sub.id,
            plan_id: sub.plan_id,
            customer_id: sub.customer_id,
            status: sub.status,
            current_start: from_unix(sub.current_start),
            current_end: from_unix(sub.current_end),
            charge_at: from_unix(sub.charge_at),
            paid_count: sub.paid_count,
            total_count: sub.total_count,
        }
    }
}

/// Card details on a payment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Card {
    /// Network (Visa, `MasterCard`...).
    #[serde(default)]
    pub network: Option<String>,
    /// Last four digits.
    #[serde(default)]
    pub last4: Option<String>,
}

/// Razorpay payment object.
#[derive(Debug, Clone, Deserialize)]
pub struct Payment {
    /// Payment ID (`pay_...`).
    pub id: String,
    /// Amount in minor units.
    pub amount: i64,
    /// Currency.
    pub currency: String,
    /// Status.
    pub status: RemotePaymentStatus,
    /// Order ID.
    #[serde(default)]
    pub order_id: Option<String>,
    /// Method (card, upi, netbanking, wallet, emandate...).
    #[serde(default)]
    pub method: Option<String>,
    /// Card details, when expanded.
    #[serde(default)]
    pub card: Option<Card>,
    /// Bank code.
    #[serde(default)]
    pub bank: Option<String>,
    /// Wallet name.
    #[serde(default)]
    pub wallet: Option<String>,
    /// Invoice ID (`inv_...`), set on subscription charges.
    #[serde(default)]
    pub invoice_id: Option<String>,
    /// Created timestamp (Unix).
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl From<Payment> for RemotePayment {
    fn from(payment: Payment) -> Self {
        let card = payment.card.unwrap_or_default();
        Self {
            id: payment.id,
            amount: payment.amount,
            currency: payment.currency,
            status: payment.status,
            order_id: payment.order_id,
            method: payment.method,
            card_network: card.network,
            card_last4: card.last4,
            bank: payment.bank,
            wallet: payment.wallet,
            invoice_id: payment.invoice_id,
            subscription_id: None,
            created_at: from_unix(payment.created_at),
        }
    }
}

/// Razorpay invoice object, fetched to find a payment's subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    /// Invoice ID (`inv_...`).
    pub id: String,
    /// Subscription the invoice bills.
    #[serde(default)]
    pub subscription_id: Option<String>,
}

/// Razorpay error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetails,
}

/// Error details.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetails {
    /// Error code (e.g. `BAD_REQUEST_ERROR`).
    #[serde(default)]
    pub code: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

/// Webhook delivery envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event name, e.g. `subscription.charged`.
    pub event: String,
    /// Entities carried by the event.
    #[serde(default)]
    pub payload: WebhookPayload,
    /// Delivery time (Unix).
    #[serde(default)]
    pub created_at: Option<i64>,
}

/// Entities in a webhook payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    /// Subscription entity.
    #[serde(default)]
    pub subscription: Option<EntityWrapper<Subscription>>,
    /// Payment entity.
    #[serde(default)]
    pub payment: Option<EntityWrapper<Payment>>,
}

/// Razorpay wraps each payload entity in `{"entity": ...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityWrapper<T> {
    /// The entity.
    pub entity: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charged_webhook_parses() {
        let body = serde_json::json!({
            "entity": "event",
            "event": "subscription.charged",
            "contains": ["subscription", "payment"],
            "payload": {
                "subscription": { "entity": {
                    "id": "sub_1", "plan_id": "plan_1", "customer_id": "cust_1",
                    "status": "active", "current_start": 1_767_225_600,
                    "current_end": 1_769_904_000, "paid_count": 2, "total_count": 120
                }},
                "payment": { "entity": {
                    "id": "pay_2", "amount": 19900, "currency": "INR",
                    "status": "captured", "method": "card",
                    "card": { "network": "Visa", "last4": "1111" }
                }}
            },
            "created_at": 1_767_225_700
        });

        let event: WebhookEvent = serde_json::from_value(body).unwrap();
        assert_eq!(event.event, "subscription.charged");

        let sub: RemoteSubscription = event.payload.subscription.unwrap().entity.into();
        assert_eq!(sub.status, RemoteSubscriptionStatus::Active);
        assert_eq!(sub.current_start.unwrap().timestamp(), 1_767_225_600);

        let payment: RemotePayment = event.payload.payment.unwrap().entity.into();
        assert_eq!(payment.card_last4.as_deref(), Some("1111"));
        assert_eq!(payment.status, RemotePaymentStatus::Captured);
    }

    #[test]
    fn created_subscription_has_no_period() {
        let sub: Subscription = serde_json::from_value(serde_json::json!({
            "id": "sub_1", "plan_id": "plan_1", "status": "created",
            "current_start": null, "current_end": null
        }))
        .unwrap();
        let remote: RemoteSubscription = sub.into();
        assert!(remote.current_start.is_none());
        assert_eq!(remote.paid_count, 0);
    }

    #[test]
    fn empty_notes_are_omitted() {
        let notes = BTreeMap::new();
        let body = CreateSubscriptionBody {
            plan_id: "plan_1",
            customer_id: "cust_1",
            total_count: 120,
            quantity: 1,
            customer_notify: 1,
            start_at: None,
            expire_by: None,
            notes: &notes,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("notes").is_none());
        assert!(json.get("start_at").is_none());
    }
}
