//! Subscription status reporting and lazy expiry.

use chrono::{DateTime, Utc};
use serde::Serialize;

use focus_billing_core::{Actor, BillingError, Subscription, SubscriptionStatus, Tier, UserId};
use focus_billing_store::{Transition, TransitionOutcome};

use super::transitions;
use super::{storage_failure, SubscriptionLifecycle};

/// Result of [`SubscriptionLifecycle::subscription_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatusReport {
    /// The user currently has paid access.
    pub has_active_subscription: bool,
    /// Tier implied by the current subscription.
    pub tier: Tier,
    /// Whole days left in the current period.
    pub days_remaining: i64,
    /// The subscription the report is about.
    pub subscription: Option<Subscription>,
    /// The gateway was consulted.
    pub synced_with_gateway: bool,
}

impl SubscriptionStatusReport {
    fn for_row(sub: Option<Subscription>, synced_with_gateway: bool, now: DateTime<Utc>) -> Self {
        match sub {
            Some(sub) => Self {
                has_active_subscription: sub.grants_access(now),
                tier: sub.entitled_tier(now),
                days_remaining: if sub.grants_access(now) {
                    sub.days_remaining(now)
                } else {
                    0
                },
                subscription: Some(sub),
                synced_with_gateway,
            },
            None => Self {
                has_active_subscription: false,
                tier: Tier::Free,
                days_remaining: 0,
                subscription: None,
                synced_with_gateway,
            },
        }
    }
}

/// Pick the row that describes the user's access.
///
/// Live rows first, then a cancellation that still grants access, then the
/// newest row. `rows` is newest first.
fn select_candidate(rows: Vec<Subscription>, now: DateTime<Utc>) -> Option<Subscription> {
    let live = rows.iter().position(|s| s.status.is_live());
    let grace = rows
        .iter()
        .position(|s| s.status == SubscriptionStatus::Cancelled && s.grants_access(now));
    let index = live.or(grace).unwrap_or(0);
    rows.into_iter().nth(index)
}

impl SubscriptionLifecycle {
    /// Report a user's subscription, expiring rows whose period has run out.
    ///
    /// With `sync_with_gateway`, the gateway's status overrides the local one
    /// before expiry is checked. Gateway failures degrade to the local view.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the subscription list cannot be read.
    pub async fn subscription_status(
        &self,
        user_id: &UserId,
        sync_with_gateway: bool,
    ) -> Result<SubscriptionStatusReport, BillingError> {
        let now = Utc::now();
        let rows = self
            .store
            .list_subscriptions_for_user(user_id)
            .await
            .map_err(|e| storage_failure("subscription_status", &e))?;

        let Some(mut sub) = select_candidate(rows, now) else {
            return Ok(SubscriptionStatusReport::for_row(None, false, now));
        };

        let mut synced = false;
        if sync_with_gateway {
            if let Some(external_id) = sub.external_subscription_id.clone() {
                match self
                    .gateway_call("fetch_subscription", self.gateway.fetch_subscription(&external_id))
                    .await
                {
                    Ok(remote) => {
                        synced = true;
                        if let Some(transition) = transitions::remote_sync(&sub, &remote, now) {
                            tracing::info!(
                                user_id = %user_id,
                                subscription_id = %sub.id,
                                local_status = %sub.status,
                                remote_status = ?remote.status,
                                "Local status differs from gateway; taking gateway's"
                            );
                            sub = self.apply_or_keep(sub, transition, "sync_status").await;
                        }
                    }
                    Err(e) => tracing::warn!(
                        user_id = %user_id,
                        subscription_id = %sub.id,
                        error = %e,
                        "Gateway status unavailable; reporting local view"
                    ),
                }
            }
        }

        let reason = if sub.is_silently_expired(now) {
            Some("period ended without renewal")
        } else if sub.is_cancellation_elapsed(now) {
            Some("cancelled subscription reached period end")
        } else {
            None
        };
        if let Some(reason) = reason {
            match transitions::expiry(&sub, Actor::System, reason, now) {
                Ok(transition) => {
                    tracing::info!(
                        user_id = %user_id,
                        subscription_id = %sub.id,
                        period_end = %sub.current_period_end,
                        reason,
                        "Expiring subscription"
                    );
                    sub = self.apply_or_keep(sub, transition, "expire_subscription").await;
                }
                Err(e) => tracing::warn!(subscription_id = %sub.id, error = %e, "Cannot expire"),
            }
        }

        Ok(SubscriptionStatusReport::for_row(Some(sub), synced, now))
    }

    /// Apply a system transition, returning the row as stored afterwards.
    ///
    /// Failures are logged and the caller keeps reporting from `sub`.
    async fn apply_or_keep(
        &self,
        sub: Subscription,
        transition: Transition,
        operation: &'static str,
    ) -> Subscription {
        match self.store.apply_transition(&transition).await {
            Ok(TransitionOutcome::Applied) => transition.subscription,
            Ok(TransitionOutcome::Conflict { current }) => {
                tracing::debug!(
                    subscription_id = %sub.id,
                    current = %current,
                    operation,
                    "Row changed concurrently; re-reading"
                );
                match self.store.get_subscription(&sub.id).await {
                    Ok(Some(row)) => row,
                    _ => sub,
                }
            }
            Err(e) => {
                tracing::warn!(
                    subscription_id = %sub.id,
                    operation,
                    error = %e,
                    "Status transition failed; reporting local view"
                );
                sub
            }
        }
    }
}
