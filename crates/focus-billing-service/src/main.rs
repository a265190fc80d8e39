//! Focus Billing Service - subscription lifecycle API.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use focus_billing_service::{create_router, AppState, RazorpayClient, ServiceConfig};
use focus_billing_store::PgStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,focus_billing=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Focus Billing Service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        razorpay_configured = %config.razorpay_key_id.is_some(),
        webhook_secret_configured = %config.razorpay_webhook_secret.is_some(),
        subscriptions_enabled = %config.subscriptions_enabled,
        "Service configuration loaded"
    );

    let gateway = RazorpayClient::new(
        config.razorpay_key_id.clone().unwrap_or_default(),
        config.razorpay_key_secret.clone().unwrap_or_default(),
    )?;

    tracing::info!("Connecting to PostgreSQL");
    let store = PgStore::connect(&config.database_url, config.database_max_connections).await?;
    store.migrate().await?;

    let state = AppState::new(Arc::new(store), Arc::new(gateway), config.clone());

    let app = create_router(state);

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
