//! Cancellation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use focus_billing_core::{
    Actor, AuditAction, AuditLogEntry, BillingError, Subscription, SubscriptionId,
    SubscriptionStatus, Tier, UserId,
};
use focus_billing_store::TransitionOutcome;

use super::transitions;
use super::{record_best_effort, storage_failure, SubscriptionLifecycle};
use crate::gateway::GatewayError;

/// Input to [`SubscriptionLifecycle::cancel_subscription`].
#[derive(Debug, Clone)]
pub struct CancelSubscriptionInput {
    /// The cancelling user.
    pub user_id: UserId,
    /// Keep access until the current period ends.
    pub cancel_at_period_end: bool,
    /// Free-form reason.
    pub reason: Option<String>,
}

impl CancelSubscriptionInput {
    /// Cancel at period end with no reason.
    #[must_use]
    pub const fn at_period_end(user_id: UserId) -> Self {
        Self {
            user_id,
            cancel_at_period_end: true,
            reason: None,
        }
    }
}

/// Result of [`SubscriptionLifecycle::cancel_subscription`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelSubscriptionResult {
    /// Local subscription id.
    pub subscription_id: SubscriptionId,
    /// Status after cancellation.
    pub status: SubscriptionStatus,
    /// Access continues until period end.
    pub cancel_at_period_end: bool,
    /// When access stops.
    pub access_until: DateTime<Utc>,
    /// The user's tier right now.
    pub tier: Tier,
}

impl SubscriptionLifecycle {
    /// Cancel the user's subscription at the gateway and locally.
    ///
    /// # Errors
    ///
    /// `NoActiveSubscription`, `AlreadyCancelled`, `SubscriptionExpired`,
    /// `Upstream` when the gateway refuses, and `CriticalDivergence` when the
    /// gateway cancelled but the local write failed.
    pub async fn cancel_subscription(
        &self,
        input: CancelSubscriptionInput,
    ) -> Result<CancelSubscriptionResult, BillingError> {
        const OPERATION: &str = "cancel_subscription";
        let now = Utc::now();

        let rows = self
            .store
            .list_subscriptions_for_user(&input.user_id)
            .await
            .map_err(|e| storage_failure(OPERATION, &e))?;

        let Some(sub) = rows
            .iter()
            .find(|s| {
                matches!(
                    s.status,
                    SubscriptionStatus::Active
                        | SubscriptionStatus::Trial
                        | SubscriptionStatus::Incomplete
                )
            })
            .cloned()
        else {
            // Unpaid checkouts say nothing about what happened to the last
            // real subscription.
            let latest = rows
                .iter()
                .find(|s| s.status != SubscriptionStatus::Inactive)
                .map(|s| s.status);
            return Err(match latest {
                Some(SubscriptionStatus::Cancelled) => BillingError::AlreadyCancelled,
                Some(SubscriptionStatus::Expired) => BillingError::SubscriptionExpired,
                _ => BillingError::NoActiveSubscription,
            });
        };

        let transition = transitions::cancellation(
            &sub,
            input.cancel_at_period_end,
            input.reason.clone(),
            Actor::User,
            now,
        )?;

        if let Some(external_id) = &sub.external_subscription_id {
            match self
                .gateway_call(
                    OPERATION,
                    self.gateway
                        .cancel_subscription(external_id, input.cancel_at_period_end),
                )
                .await
            {
                Ok(_) => {}
                Err(GatewayError::AlreadyCancelled) => tracing::info!(
                    subscription_id = %sub.id,
                    external_subscription_id = %external_id,
                    "Gateway subscription was already cancelled"
                ),
                Err(e) => return Err(BillingError::upstream(OPERATION, e)),
            }
        }

        let outcome = self.store.apply_transition(&transition).await;
        match outcome {
            Ok(TransitionOutcome::Applied) => {}
            Ok(TransitionOutcome::Conflict {
                current: SubscriptionStatus::Cancelled,
            }) => {
                tracing::info!(subscription_id = %sub.id, "Subscription cancelled concurrently");
            }
            Ok(TransitionOutcome::Conflict { current }) => {
                return Err(self
                    .divergence(&sub, OPERATION, &format!("row moved to {current}"))
                    .await);
            }
            Err(e) => {
                return Err(self.divergence(&sub, OPERATION, &e.to_string()).await);
            }
        }

        let access_until = transitions::access_until(&sub, input.cancel_at_period_end, now);
        tracing::info!(
            user_id = %input.user_id,
            subscription_id = %sub.id,
            cancel_at_period_end = input.cancel_at_period_end,
            access_until = %access_until,
            "Subscription cancelled"
        );

        Ok(CancelSubscriptionResult {
            subscription_id: sub.id,
            status: SubscriptionStatus::Cancelled,
            cancel_at_period_end: input.cancel_at_period_end,
            access_until,
            tier: transition.subscription.entitled_tier(now),
        })
    }

    /// The gateway accepted a change the local store did not record.
    ///
    /// Logged for manual reconciliation and never retried.
    pub(crate) async fn divergence(
        &self,
        sub: &Subscription,
        operation: &'static str,
        detail: &str,
    ) -> BillingError {
        tracing::error!(
            critical = true,
            user_id = %sub.user_id,
            subscription_id = %sub.id,
            external_subscription_id = ?sub.external_subscription_id,
            operation,
            detail,
            "Gateway and local subscription state diverged"
        );
        let entry = AuditLogEntry::new(sub.user_id, AuditAction::DivergenceDetected)
            .by_system()
            .subscription(sub.id)
            .states(Some(sub.status), None)
            .reason(detail)
            .metadata(json!({
                "operation": operation,
                "external_subscription_id": sub.external_subscription_id,
            }));
        record_best_effort(self.store.as_ref(), &entry).await;
        BillingError::CriticalDivergence { operation }
    }
}
