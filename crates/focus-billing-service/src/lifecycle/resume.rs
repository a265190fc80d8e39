//! Resumption of cancelled subscriptions.

use chrono::{DateTime, Utc};
use serde::Serialize;

use focus_billing_core::{BillingError, SubscriptionId, SubscriptionStatus, Tier, UserId};
use focus_billing_store::{StoreError, TransitionOutcome};

use super::transitions;
use super::{storage_failure, SubscriptionLifecycle};
use crate::gateway::{GatewayError, SubscriptionPatch};

/// Result of [`SubscriptionLifecycle::resume_subscription`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumeSubscriptionResult {
    /// Local subscription id.
    pub subscription_id: SubscriptionId,
    /// Status after resumption.
    pub status: SubscriptionStatus,
    /// End of the current period.
    pub current_period_end: DateTime<Utc>,
    /// The user's tier.
    pub tier: Tier,
}

impl SubscriptionLifecycle {
    /// Undo a cancellation that was scheduled for the end of the period.
    ///
    /// # Errors
    ///
    /// `NoCancelledSubscription`, `SubscriptionPeriodEnded`,
    /// `CannotResumeImmediateCancellation`, `AlreadyActive`,
    /// `ResumeNotSupported` when the gateway cannot resume, `Upstream` for
    /// other gateway failures and `CriticalDivergence` when the gateway
    /// resumed but the local write failed.
    pub async fn resume_subscription(
        &self,
        user_id: &UserId,
    ) -> Result<ResumeSubscriptionResult, BillingError> {
        const OPERATION: &str = "resume_subscription";
        let now = Utc::now();

        let rows = self
            .store
            .list_subscriptions_for_user(user_id)
            .await
            .map_err(|e| storage_failure(OPERATION, &e))?;

        let sub = rows
            .iter()
            .find(|s| s.status == SubscriptionStatus::Cancelled)
            .cloned()
            .ok_or(BillingError::NoCancelledSubscription)?;
        if sub.current_period_end <= now {
            return Err(BillingError::SubscriptionPeriodEnded);
        }
        if !sub.cancel_at_period_end {
            return Err(BillingError::CannotResumeImmediateCancellation);
        }
        if rows.iter().any(|s| s.id != sub.id && s.status.is_live()) {
            return Err(BillingError::AlreadyActive);
        }

        let mut remote = None;
        if let Some(external_id) = &sub.external_subscription_id {
            let current = match self
                .gateway_call("fetch_subscription", self.gateway.fetch_subscription(external_id))
                .await
            {
                Ok(current) => Some(current),
                Err(e) => {
                    tracing::warn!(
                        subscription_id = %sub.id,
                        error = %e,
                        "Could not read gateway status before resuming; trying anyway"
                    );
                    None
                }
            };

            remote = match current {
                Some(current) if current.status.is_active() => {
                    tracing::info!(
                        subscription_id = %sub.id,
                        "Gateway subscription is already active"
                    );
                    Some(current)
                }
                _ => Some(
                    self.gateway_call(
                        OPERATION,
                        self.gateway
                            .update_subscription(external_id, &SubscriptionPatch::resume()),
                    )
                    .await
                    .map_err(|e| match e {
                        GatewayError::Unsupported(reason) => {
                            tracing::info!(
                                subscription_id = %sub.id,
                                reason = %reason,
                                "Gateway refused to resume subscription"
                            );
                            BillingError::ResumeNotSupported
                        }
                        other => BillingError::upstream(OPERATION, other),
                    })?,
                ),
            };
        }

        let transition = transitions::resumption(&sub, remote.as_ref(), now)?;
        match self.store.apply_transition(&transition).await {
            Ok(
                TransitionOutcome::Applied
                | TransitionOutcome::Conflict {
                    current: SubscriptionStatus::Active,
                },
            ) => {}
            Ok(TransitionOutcome::Conflict { current }) => {
                return Err(self
                    .divergence(&sub, OPERATION, &format!("row moved to {current}"))
                    .await);
            }
            Err(StoreError::LiveSubscriptionExists { .. }) => {
                return Err(self
                    .divergence(&sub, OPERATION, "another subscription became active")
                    .await);
            }
            Err(e) => return Err(self.divergence(&sub, OPERATION, &e.to_string()).await),
        }

        tracing::info!(
            user_id = %user_id,
            subscription_id = %sub.id,
            "Subscription resumed"
        );

        let resumed = &transition.subscription;
        Ok(ResumeSubscriptionResult {
            subscription_id: resumed.id,
            status: SubscriptionStatus::Active,
            current_period_end: resumed.current_period_end,
            tier: resumed.entitled_tier(now),
        })
    }
}
