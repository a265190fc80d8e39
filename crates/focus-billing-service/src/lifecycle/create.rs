//! Subscription creation.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use focus_billing_core::{
    AuditAction, AuditLogEntry, BillingError, Subscription, SubscriptionId, SubscriptionSource,
    SubscriptionStatus, UserId,
};
use focus_billing_store::StoreError;

use super::{record_best_effort, storage_failure, SubscriptionLifecycle};
use crate::gateway::CreateSubscriptionRequest;

/// Request context captured with a new subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Client IP address.
    pub ip_address: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
}

/// Input to [`SubscriptionLifecycle::create_subscription`].
#[derive(Debug, Clone)]
pub struct CreateSubscriptionInput {
    /// Subscribing user.
    pub user_id: UserId,
    /// Catalog plan id.
    pub plan_id: String,
    /// Client surface.
    pub source: SubscriptionSource,
    /// Request context.
    pub request: RequestMetadata,
}

/// Checkout prefill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutPrefill {
    /// Customer name.
    pub name: String,
    /// Customer email.
    pub email: String,
}

/// Everything the hosted checkout needs to collect the first payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutPayload {
    /// Gateway public key.
    pub key: String,
    /// Gateway subscription id.
    pub subscription_id: String,
    /// Amount per cycle in minor units.
    pub amount: i64,
    /// Currency.
    pub currency: String,
    /// Merchant display name.
    pub name: String,
    /// Plan description.
    pub description: String,
    /// Customer prefill.
    pub prefill: CheckoutPrefill,
    /// Notes echoed back by the gateway.
    pub notes: BTreeMap<String, String>,
}

/// Result of [`SubscriptionLifecycle::create_subscription`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateSubscriptionResult {
    /// Local subscription id.
    pub subscription_id: SubscriptionId,
    /// Gateway subscription id.
    pub external_subscription_id: String,
    /// Hosted checkout parameters.
    pub checkout: CheckoutPayload,
}

impl SubscriptionLifecycle {
    /// Create a subscription and return the checkout payload for its first
    /// payment.
    ///
    /// The new row is INACTIVE until the payment is verified. Gateway failures
    /// leave no local row behind.
    ///
    /// # Errors
    ///
    /// `FeatureDisabled`, `PlanNotFound`, `PlanUnavailable`, `UserNotFound`,
    /// `AlreadyActive`, `Upstream` for gateway failures and `Internal` for
    /// storage failures.
    pub async fn create_subscription(
        &self,
        input: CreateSubscriptionInput,
    ) -> Result<CreateSubscriptionResult, BillingError> {
        const OPERATION: &str = "create_subscription";

        if !self.config.subscriptions_enabled {
            return Err(BillingError::FeatureDisabled);
        }

        let now = Utc::now();
        let plan = self.catalog.get_available_plan(&input.plan_id, now).await?;

        let user = self
            .store
            .get_user(&input.user_id)
            .await
            .map_err(|e| storage_failure(OPERATION, &e))?
            .ok_or_else(|| BillingError::UserNotFound {
                user_id: input.user_id.to_string(),
            })?;

        let existing = self
            .store
            .list_subscriptions_for_user(&input.user_id)
            .await
            .map_err(|e| storage_failure(OPERATION, &e))?;
        if existing.iter().any(|s| s.status.is_live()) {
            return Err(BillingError::AlreadyActive);
        }

        // A recent unpaid row is a checkout the user is retrying.
        let abandoned_after = chrono::Duration::from_std(self.config.abandoned_checkout_timeout)
            .unwrap_or_else(|_| chrono::Duration::zero());
        for row in existing.iter().filter(|s| {
            s.status == SubscriptionStatus::Inactive && now - s.created_at < abandoned_after
        }) {
            match self.store.delete_inactive_subscription(&row.id).await {
                Ok(true) => tracing::debug!(
                    user_id = %input.user_id,
                    subscription_id = %row.id,
                    "Replaced abandoned checkout"
                ),
                Ok(false) => {}
                Err(e) => return Err(storage_failure(OPERATION, &e)),
            }
        }

        let customer_id = self.ensure_customer(&user).await?;

        let metadata = serde_json::to_value(&input.request).unwrap_or_default();
        let pending = Subscription::pending(
            input.user_id,
            customer_id.clone(),
            &plan,
            input.source,
            metadata,
            now,
        );
        self.store
            .insert_subscription(&pending)
            .await
            .map_err(|e| match e {
                StoreError::LiveSubscriptionExists { .. } => BillingError::AlreadyActive,
                other => storage_failure(OPERATION, &other),
            })?;

        let notes = BTreeMap::from([
            ("user_id".to_string(), input.user_id.to_string()),
            ("subscription_id".to_string(), pending.id.to_string()),
            ("plan_id".to_string(), plan.plan_id.clone()),
        ]);
        let request = CreateSubscriptionRequest {
            plan_id: plan.external_plan_id.clone(),
            customer_id,
            total_count: plan.billing_period.total_cycles(),
            quantity: 1,
            start_at: None,
            expire_by: None,
            notes: notes.clone(),
        };

        let remote = match self
            .gateway_call(OPERATION, self.gateway.create_subscription(&request))
            .await
        {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(
                    user_id = %input.user_id,
                    subscription_id = %pending.id,
                    error = %e,
                    "Gateway rejected subscription; removing local row"
                );
                if let Err(delete_err) = self.store.delete_inactive_subscription(&pending.id).await
                {
                    tracing::error!(
                        subscription_id = %pending.id,
                        error = %delete_err,
                        "Failed to remove local row after gateway failure"
                    );
                }
                return Err(BillingError::upstream(OPERATION, e));
            }
        };

        let period_start = remote.current_start.unwrap_or(pending.current_period_start);
        let period_end = remote.current_end.unwrap_or(pending.current_period_end);
        if let Err(e) = self
            .store
            .attach_gateway_subscription(&pending.id, &remote.id, period_start, period_end)
            .await
        {
            tracing::error!(
                user_id = %input.user_id,
                subscription_id = %pending.id,
                external_subscription_id = %remote.id,
                error = %e,
                "Failed to record gateway subscription; cancelling it"
            );
            if let Err(cancel_err) = self
                .gateway_call("cancel_subscription", self.gateway.cancel_subscription(&remote.id, false))
                .await
            {
                tracing::error!(
                    external_subscription_id = %remote.id,
                    error = %cancel_err,
                    "Compensating gateway cancel failed"
                );
            }
            if let Err(delete_err) = self.store.delete_inactive_subscription(&pending.id).await {
                tracing::error!(
                    subscription_id = %pending.id,
                    error = %delete_err,
                    "Failed to remove local row after attach failure"
                );
            }
            return Err(BillingError::Internal { operation: OPERATION });
        }

        let entry = AuditLogEntry::new(input.user_id, AuditAction::Created)
            .subscription(pending.id)
            .states(None, Some(SubscriptionStatus::Inactive))
            .metadata(json!({
                "plan_id": plan.plan_id,
                "external_subscription_id": remote.id,
                "source": input.source.as_str(),
            }))
            .at(now);
        record_best_effort(self.store.as_ref(), &entry).await;

        tracing::info!(
            user_id = %input.user_id,
            subscription_id = %pending.id,
            external_subscription_id = %remote.id,
            plan_id = %plan.plan_id,
            "Subscription created"
        );

        Ok(CreateSubscriptionResult {
            subscription_id: pending.id,
            checkout: CheckoutPayload {
                key: self.gateway.public_key().to_string(),
                subscription_id: remote.id.clone(),
                amount: plan.amount,
                currency: plan.currency.clone(),
                name: self.config.checkout_display_name.clone(),
                description: plan.name.clone(),
                prefill: CheckoutPrefill {
                    name: user.display_name().to_string(),
                    email: user.email.clone(),
                },
                notes,
            },
            external_subscription_id: remote.id,
        })
    }
}
