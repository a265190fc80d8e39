//! Subscription lifecycle operations.
//!
//! [`SubscriptionLifecycle`] owns the create, verify, status, cancel and
//! resume flows. Every status change is expressed as a
//! [`focus_billing_store::Transition`] built in [`transitions`] and applied
//! atomically by the store, so the same builders serve both user-initiated
//! calls and webhook deliveries.

mod audit;
mod cancel;
mod catalog;
mod create;
mod customer;
mod resume;
mod sync;
pub(crate) mod transitions;
mod verify;

use std::future::Future;
use std::sync::Arc;

use focus_billing_core::BillingError;
use focus_billing_store::{Store, StoreError};

use crate::config::LifecycleConfig;
use crate::gateway::{GatewayError, PaymentGateway};

pub use audit::record_best_effort;
pub use cancel::{CancelSubscriptionInput, CancelSubscriptionResult};
pub use catalog::PlanCatalog;
pub use create::{
    CheckoutPayload, CheckoutPrefill, CreateSubscriptionInput, CreateSubscriptionResult,
    RequestMetadata,
};
pub use resume::ResumeSubscriptionResult;
pub use sync::SubscriptionStatusReport;
pub use verify::{VerifyPaymentInput, VerifyPaymentResult};

/// Entry point for subscription lifecycle operations.
pub struct SubscriptionLifecycle {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    config: LifecycleConfig,
    catalog: PlanCatalog,
}

impl SubscriptionLifecycle {
    /// Create a lifecycle service over a store and a gateway.
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        config: LifecycleConfig,
    ) -> Self {
        let catalog = PlanCatalog::new(store.clone());
        Self {
            store,
            gateway,
            config,
            catalog,
        }
    }

    /// The plan catalog.
    #[must_use]
    pub const fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Run a gateway call under the configured timeout.
    async fn gateway_call<T, F>(&self, operation: &'static str, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>> + Send,
    {
        match tokio::time::timeout(self.config.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = u64::try_from(self.config.gateway_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                    "Gateway call timed out"
                );
                Err(GatewayError::Timeout { operation })
            }
        }
    }
}

/// Log a storage failure and hide it behind an internal error.
pub(crate) fn storage_failure(operation: &'static str, err: &StoreError) -> BillingError {
    tracing::error!(operation, error = %err, "Storage operation failed");
    BillingError::Internal { operation }
}
