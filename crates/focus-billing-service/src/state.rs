//! Application state.

use std::sync::Arc;

use focus_billing_store::Store;

use crate::config::ServiceConfig;
use crate::gateway::PaymentGateway;
use crate::lifecycle::SubscriptionLifecycle;
use crate::webhooks::WebhookReconciler;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Subscription lifecycle operations.
    pub lifecycle: Arc<SubscriptionLifecycle>,

    /// Webhook reconciliation.
    pub webhooks: Arc<WebhookReconciler>,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        config: ServiceConfig,
    ) -> Self {
        if config.razorpay_webhook_secret.is_none() {
            tracing::warn!("Razorpay webhook secret not configured - webhooks will be rejected");
        }
        if !config.subscriptions_enabled {
            tracing::warn!("Subscriptions are disabled - checkout is unavailable");
        }

        let lifecycle = SubscriptionLifecycle::new(store.clone(), gateway, config.lifecycle());
        let webhooks = WebhookReconciler::new(store, config.razorpay_webhook_secret.clone());

        Self {
            lifecycle: Arc::new(lifecycle),
            webhooks: Arc::new(webhooks),
            config,
        }
    }
}
