//! Audit and payment history.

use focus_billing_core::{AuditLogEntry, BillingError, Payment, UserId};
use focus_billing_store::Store;

use super::{storage_failure, SubscriptionLifecycle};

/// Append a standalone audit entry, logging instead of failing.
pub async fn record_best_effort(store: &dyn Store, entry: &AuditLogEntry) {
    if let Err(e) = store.append_audit(entry).await {
        tracing::warn!(
            user_id = %entry.user_id,
            action = entry.action.as_str(),
            error = %e,
            "Failed to write audit entry"
        );
    }
}

impl SubscriptionLifecycle {
    /// A user's audit entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the store fails.
    pub async fn audit_trail(&self, user_id: &UserId) -> Result<Vec<AuditLogEntry>, BillingError> {
        self.store
            .list_audit_for_user(user_id)
            .await
            .map_err(|e| storage_failure("list_audit", &e))
    }

    /// A user's payments, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the store fails.
    pub async fn list_payments(&self, user_id: &UserId) -> Result<Vec<Payment>, BillingError> {
        self.store
            .list_payments_for_user(user_id)
            .await
            .map_err(|e| storage_failure("list_payments", &e))
    }
}
