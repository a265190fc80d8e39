//! Gateway customer provisioning.

use focus_billing_core::{BillingError, UserBilling};

use super::{storage_failure, SubscriptionLifecycle};

impl SubscriptionLifecycle {
    /// Return the user's gateway customer id, creating the customer on first
    /// use.
    ///
    /// Concurrent first-time callers may each create (or be handed back) a
    /// customer; the cached id is written with a compare-and-set, so they all
    /// end up using the same one.
    pub(crate) async fn ensure_customer(&self, user: &UserBilling) -> Result<String, BillingError> {
        if let Some(customer_id) = &user.external_customer_id {
            return Ok(customer_id.clone());
        }

        let customer = self
            .gateway_call(
                "create_customer",
                self.gateway.create_customer(user.display_name(), &user.email),
            )
            .await
            .map_err(|e| BillingError::upstream("create_customer", e))?;

        let stored = self
            .store
            .set_external_customer_id(&user.user_id, &customer.id)
            .await
            .map_err(|e| storage_failure("set_external_customer_id", &e))?;

        if stored == customer.id {
            tracing::info!(
                user_id = %user.user_id,
                customer_id = %stored,
                "Provisioned gateway customer"
            );
        } else {
            tracing::info!(
                user_id = %user.user_id,
                created = %customer.id,
                kept = %stored,
                "Concurrent customer provisioning; keeping the first cached id"
            );
        }

        Ok(stored)
    }
}
