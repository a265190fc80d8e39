//! Razorpay webhook reconciliation.
//!
//! Webhooks drive the same transitions as the user-facing operations. There
//! is no event-id deduplication: a redelivered or out-of-order event either
//! finds the row already in the target state or loses the compare-and-swap,
//! and is acknowledged as a duplicate.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use focus_billing_core::{
    Actor, AuditAction, AuditLogEntry, BillingError, Subscription, SubscriptionStatus,
};
use focus_billing_store::{Store, StoreError, Transition, TransitionOutcome};

use crate::crypto::verify_webhook_signature;
use crate::gateway::types::WebhookEvent;
use crate::gateway::{RemotePayment, RemoteSubscription};
use crate::lifecycle::record_best_effort;
use crate::lifecycle::transitions::{self, ACTIVATABLE};

/// What a delivery did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// A transition was written.
    Applied {
        /// The audit action recorded with it.
        action: AuditAction,
    },
    /// The row already reflects the event.
    Duplicate,
    /// Nothing to do.
    Ignored {
        /// Why.
        reason: String,
    },
    /// Processing failed; logged for follow-up.
    Failed,
}

impl WebhookOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }
}

enum Step {
    Apply(Transition),
    Done(WebhookOutcome),
}

/// Applies gateway webhook deliveries to local state.
pub struct WebhookReconciler {
    store: Arc<dyn Store>,
    webhook_secret: Option<String>,
}

impl WebhookReconciler {
    /// Create a reconciler. Without a secret every delivery is rejected.
    pub fn new(store: Arc<dyn Store>, webhook_secret: Option<String>) -> Self {
        Self {
            store,
            webhook_secret: webhook_secret.filter(|s| !s.is_empty()),
        }
    }

    /// Verify and apply one delivery.
    ///
    /// # Errors
    ///
    /// Only `SignatureInvalid`. Every other failure is logged and reported
    /// as [`WebhookOutcome::Failed`] so the gateway does not redeliver.
    pub async fn handle(
        &self,
        raw_body: &str,
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, BillingError> {
        let verified = match (self.webhook_secret.as_deref(), signature) {
            (Some(secret), Some(signature)) => verify_webhook_signature(secret, raw_body, signature),
            (None, _) => {
                tracing::error!("Webhook received but no webhook secret is configured");
                false
            }
            (Some(_), None) => false,
        };
        if !verified {
            self.record_rejection(raw_body).await;
            return Err(BillingError::SignatureInvalid);
        }

        let event: WebhookEvent = match serde_json::from_str(raw_body) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable webhook payload");
                return Ok(WebhookOutcome::ignored("malformed payload"));
            }
        };

        let Some(entity) = event.payload.subscription else {
            tracing::debug!(event = %event.event, "Webhook without a subscription entity");
            return Ok(WebhookOutcome::ignored("no subscription entity"));
        };
        let remote: RemoteSubscription = entity.entity.into();
        let payment: Option<RemotePayment> = event.payload.payment.map(|p| p.entity.into());

        let sub = match self.store.get_subscription_by_external_id(&remote.id).await {
            Ok(Some(sub)) => sub,
            Ok(None) => {
                tracing::info!(
                    event = %event.event,
                    external_subscription_id = %remote.id,
                    "Webhook for unknown subscription"
                );
                return Ok(WebhookOutcome::ignored("unknown subscription"));
            }
            Err(e) => {
                tracing::error!(
                    event = %event.event,
                    external_subscription_id = %remote.id,
                    error = %e,
                    "Failed to load subscription for webhook"
                );
                return Ok(WebhookOutcome::Failed);
            }
        };

        let step = match self.plan(&event.event, &sub, &remote, payment.as_ref()).await {
            Ok(step) => step,
            Err(e) => {
                tracing::warn!(
                    event = %event.event,
                    subscription_id = %sub.id,
                    status = %sub.status,
                    error = %e,
                    "Webhook could not be applied"
                );
                return Ok(WebhookOutcome::Failed);
            }
        };

        let transition = match step {
            Step::Apply(transition) => transition,
            Step::Done(outcome) => {
                tracing::debug!(
                    event = %event.event,
                    subscription_id = %sub.id,
                    outcome = ?outcome,
                    "Webhook needs no write"
                );
                return Ok(outcome);
            }
        };

        Ok(self.apply(&event.event, &sub, &transition).await)
    }

    async fn plan(
        &self,
        event: &str,
        sub: &Subscription,
        remote: &RemoteSubscription,
        payment: Option<&RemotePayment>,
    ) -> Result<Step, BillingError> {
        let now = Utc::now();
        let step = match event {
            "subscription.authenticated" | "subscription.activated" | "subscription.charged"
                if ACTIVATABLE.contains(&sub.status) =>
            {
                let Some(payment) = payment else {
                    return Ok(Step::Done(WebhookOutcome::ignored(
                        "activation event without a payment entity",
                    )));
                };
                Step::Apply(transitions::activation_for_payment(
                    sub,
                    payment,
                    Some(remote),
                    Actor::System,
                    now,
                )?)
            }
            "subscription.charged" if sub.status == SubscriptionStatus::Active => {
                let Some(payment) = payment else {
                    return Ok(Step::Done(WebhookOutcome::ignored(
                        "charge event without a payment entity",
                    )));
                };
                let seen = self
                    .store
                    .get_payment_by_external_id(&payment.id)
                    .await
                    .map_err(|_| BillingError::Internal {
                        operation: "get_payment",
                    })?;
                if seen.is_some() {
                    return Ok(Step::Done(WebhookOutcome::Duplicate));
                }
                let status = transitions::check_payment(sub, payment)?;
                let row = transitions::payment_row(sub, payment, status, now);
                Step::Apply(transitions::renewal(sub, row, Some(remote), now)?)
            }
            "subscription.authenticated" | "subscription.activated"
                if sub.status == SubscriptionStatus::Active =>
            {
                Step::Done(WebhookOutcome::Duplicate)
            }
            "subscription.cancelled" => match sub.status {
                SubscriptionStatus::Active
                | SubscriptionStatus::Incomplete
                | SubscriptionStatus::Trial => Step::Apply(transitions::cancellation(
                    sub,
                    false,
                    Some("cancelled at the payment gateway".into()),
                    Actor::System,
                    now,
                )?),
                SubscriptionStatus::Cancelled if sub.is_cancellation_elapsed(now) => Step::Apply(
                    transitions::expiry(sub, Actor::System, "gateway cancelled at period end", now)?,
                ),
                SubscriptionStatus::Cancelled | SubscriptionStatus::Expired => {
                    Step::Done(WebhookOutcome::Duplicate)
                }
                SubscriptionStatus::Inactive => {
                    Step::Done(WebhookOutcome::ignored("subscription was never activated"))
                }
            },
            "subscription.completed" | "subscription.expired" => {
                if sub.status == SubscriptionStatus::Expired {
                    Step::Done(WebhookOutcome::Duplicate)
                } else {
                    Step::Apply(transitions::expiry(
                        sub,
                        Actor::System,
                        "gateway ended the subscription",
                        now,
                    )?)
                }
            }
            "subscription.halted" => match sub.status {
                SubscriptionStatus::Active => Step::Apply(transitions::halt(sub, now)?),
                SubscriptionStatus::Incomplete => Step::Done(WebhookOutcome::Duplicate),
                _ => Step::Done(WebhookOutcome::ignored("subscription is not active")),
            },
            "subscription.authenticated" | "subscription.activated" | "subscription.charged" => {
                Step::Done(WebhookOutcome::ignored(format!(
                    "event does not apply to a {} subscription",
                    sub.status
                )))
            }
            other => Step::Done(WebhookOutcome::ignored(format!("unhandled event {other}"))),
        };
        Ok(step)
    }

    async fn apply(&self, event: &str, sub: &Subscription, transition: &Transition) -> WebhookOutcome {
        match self.store.apply_transition(transition).await {
            Ok(TransitionOutcome::Applied) => {
                tracing::info!(
                    event,
                    user_id = %sub.user_id,
                    subscription_id = %sub.id,
                    from = %sub.status,
                    to = %transition.subscription.status,
                    "Webhook applied"
                );
                transition
                    .audit
                    .as_ref()
                    .map_or(WebhookOutcome::Duplicate, |entry| WebhookOutcome::Applied {
                        action: entry.action,
                    })
            }
            Ok(TransitionOutcome::Conflict { current }) => {
                tracing::debug!(
                    event,
                    subscription_id = %sub.id,
                    current = %current,
                    "Row changed before the webhook was applied"
                );
                WebhookOutcome::Duplicate
            }
            Err(StoreError::DuplicatePayment { .. }) => WebhookOutcome::Duplicate,
            Err(e) => {
                tracing::error!(
                    event,
                    user_id = %sub.user_id,
                    subscription_id = %sub.id,
                    error = %e,
                    "Failed to apply webhook; needs manual follow-up"
                );
                WebhookOutcome::Failed
            }
        }
    }

    /// Audit a rejected delivery when the body names a known subscription.
    async fn record_rejection(&self, raw_body: &str) {
        tracing::warn!("Webhook signature verification failed");

        let Ok(event) = serde_json::from_str::<WebhookEvent>(raw_body) else {
            return;
        };
        let Some(entity) = event.payload.subscription else {
            return;
        };
        let Ok(Some(sub)) = self
            .store
            .get_subscription_by_external_id(&entity.entity.id)
            .await
        else {
            return;
        };

        let entry = AuditLogEntry::new(sub.user_id, AuditAction::SignatureInvalid)
            .by_system()
            .subscription(sub.id)
            .reason("webhook signature mismatch")
            .metadata(json!({ "event": event.event }));
        record_best_effort(self.store.as_ref(), &entry).await;
    }
}
