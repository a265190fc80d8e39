//! First-payment verification.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use focus_billing_core::{
    Actor, AuditAction, AuditLogEntry, BillingError, Subscription, SubscriptionId,
    SubscriptionStatus, Tier, UserId,
};
use focus_billing_store::{StoreError, TransitionOutcome};

use super::transitions::{self, ACTIVATABLE};
use super::{record_best_effort, storage_failure, SubscriptionLifecycle};
use crate::crypto::verify_payment_signature;

/// Input to [`SubscriptionLifecycle::verify_payment`].
#[derive(Debug, Clone)]
pub struct VerifyPaymentInput {
    /// The user completing checkout.
    pub user_id: UserId,
    /// Gateway payment id returned by checkout.
    pub external_payment_id: String,
    /// Gateway subscription id returned by checkout.
    pub external_subscription_id: String,
    /// Checkout signature, when the client forwarded one.
    pub signature: Option<String>,
}

/// Result of [`SubscriptionLifecycle::verify_payment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyPaymentResult {
    /// Local subscription id.
    pub subscription_id: SubscriptionId,
    /// Status after verification.
    pub status: SubscriptionStatus,
    /// The subscription was already active; nothing was written.
    pub already_active: bool,
    /// End of the paid period.
    pub current_period_end: DateTime<Utc>,
    /// The user's tier.
    pub tier: Tier,
}

impl VerifyPaymentResult {
    fn from_row(sub: &Subscription, already_active: bool, now: DateTime<Utc>) -> Self {
        Self {
            subscription_id: sub.id,
            status: sub.status,
            already_active,
            current_period_end: sub.current_period_end,
            tier: sub.entitled_tier(now),
        }
    }
}

impl SubscriptionLifecycle {
    /// Verify the first payment of a subscription and activate it.
    ///
    /// Safe to call repeatedly and concurrently with the webhook that reports
    /// the same payment: whichever lands first activates the row and the
    /// other returns the active row.
    ///
    /// # Errors
    ///
    /// `SignatureInvalid`, `SubscriptionNotFound`, `OwnershipMismatch`,
    /// `PaymentSubscriptionMismatch` when the payment is linked to another
    /// subscription or an unsigned request cannot show the link,
    /// `PaymentNotSuccessful`, `AmountMismatch`, `CurrencyMismatch`,
    /// `InvalidTransition`, `Upstream` when the payment cannot be fetched,
    /// and `ActivationFailed` when the activation cannot be written.
    pub async fn verify_payment(
        &self,
        input: VerifyPaymentInput,
    ) -> Result<VerifyPaymentResult, BillingError> {
        const OPERATION: &str = "verify_payment";
        let now = Utc::now();

        if let Some(signature) = &input.signature {
            if !verify_payment_signature(
                &self.config.key_secret,
                &input.external_payment_id,
                &input.external_subscription_id,
                signature,
            ) {
                tracing::warn!(
                    user_id = %input.user_id,
                    external_payment_id = %input.external_payment_id,
                    external_subscription_id = %input.external_subscription_id,
                    "Payment signature mismatch"
                );
                let subscription_id = self
                    .store
                    .get_subscription_by_external_id(&input.external_subscription_id)
                    .await
                    .ok()
                    .flatten()
                    .filter(|s| s.user_id == input.user_id)
                    .map(|s| s.id);
                let mut entry = AuditLogEntry::new(input.user_id, AuditAction::SignatureInvalid)
                    .reason("checkout signature mismatch")
                    .metadata(json!({
                        "external_payment_id": input.external_payment_id,
                        "external_subscription_id": input.external_subscription_id,
                    }))
                    .at(now);
                if let Some(id) = subscription_id {
                    entry = entry.subscription(id);
                }
                record_best_effort(self.store.as_ref(), &entry).await;
                return Err(BillingError::SignatureInvalid);
            }
        }

        let sub = self
            .store
            .get_subscription_by_external_id(&input.external_subscription_id)
            .await
            .map_err(|e| storage_failure(OPERATION, &e))?
            .ok_or_else(|| BillingError::SubscriptionNotFound {
                subscription_id: input.external_subscription_id.clone(),
            })?;
        if sub.user_id != input.user_id {
            tracing::warn!(
                user_id = %input.user_id,
                owner_id = %sub.user_id,
                subscription_id = %sub.id,
                "Verification for another user's subscription"
            );
            return Err(BillingError::OwnershipMismatch);
        }

        if sub.status == SubscriptionStatus::Active {
            return Ok(VerifyPaymentResult::from_row(&sub, true, now));
        }

        let payment = self
            .gateway_call("fetch_payment", self.gateway.fetch_payment(&input.external_payment_id))
            .await
            .map_err(|e| BillingError::upstream("fetch_payment", e))?;
        if let Err(e) = transitions::check_payment_link(
            &payment,
            &input.external_subscription_id,
            input.signature.is_some(),
        ) {
            tracing::warn!(
                user_id = %input.user_id,
                subscription_id = %sub.id,
                external_payment_id = %input.external_payment_id,
                linked_subscription_id = ?payment.subscription_id,
                "Payment is not linked to the subscription being verified"
            );
            return Err(e);
        }

        let remote = if self.config.verify_remote_subscription {
            match self
                .gateway_call(
                    "fetch_subscription",
                    self.gateway.fetch_subscription(&input.external_subscription_id),
                )
                .await
            {
                Ok(remote) => {
                    if !remote.status.is_active() {
                        tracing::warn!(
                            subscription_id = %sub.id,
                            remote_status = ?remote.status,
                            "Gateway does not report the subscription as active yet"
                        );
                    }
                    Some(remote)
                }
                Err(e) => {
                    tracing::warn!(
                        subscription_id = %sub.id,
                        error = %e,
                        "Could not cross-check gateway subscription; continuing"
                    );
                    None
                }
            }
        } else {
            None
        };

        if !ACTIVATABLE.contains(&sub.status) {
            return Err(BillingError::InvalidTransition {
                from: sub.status,
                to: SubscriptionStatus::Active,
            });
        }

        let transition =
            transitions::activation_for_payment(&sub, &payment, remote.as_ref(), Actor::User, now)?;

        match self.store.apply_transition(&transition).await {
            Ok(TransitionOutcome::Applied) => {
                tracing::info!(
                    user_id = %input.user_id,
                    subscription_id = %sub.id,
                    external_payment_id = %input.external_payment_id,
                    amount = payment.amount,
                    "Subscription activated"
                );
                Ok(VerifyPaymentResult::from_row(
                    &transition.subscription,
                    false,
                    now,
                ))
            }
            Ok(TransitionOutcome::Conflict { current }) => {
                self.settle_activation_race(&sub.id, current, now).await
            }
            Err(StoreError::LiveSubscriptionExists { .. }) => Err(BillingError::AlreadyActive),
            Err(StoreError::DuplicatePayment { .. }) => {
                self.settle_activation_race(&sub.id, sub.status, now).await
            }
            Err(e) => {
                tracing::error!(
                    user_id = %input.user_id,
                    subscription_id = %sub.id,
                    error = %e,
                    "Activation transaction failed"
                );
                Err(BillingError::ActivationFailed)
            }
        }
    }

    /// Another writer touched the row first. Succeed if it left it ACTIVE.
    async fn settle_activation_race(
        &self,
        id: &SubscriptionId,
        observed: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> Result<VerifyPaymentResult, BillingError> {
        let current = self
            .store
            .get_subscription(id)
            .await
            .map_err(|e| storage_failure("verify_payment", &e))?;
        match current {
            Some(row) if row.status == SubscriptionStatus::Active => {
                tracing::debug!(subscription_id = %id, "Activation already applied");
                Ok(VerifyPaymentResult::from_row(&row, true, now))
            }
            _ => {
                tracing::error!(
                    subscription_id = %id,
                    observed = %observed,
                    "Activation lost a race and the row is not active"
                );
                Err(BillingError::ActivationFailed)
            }
        }
    }
}
