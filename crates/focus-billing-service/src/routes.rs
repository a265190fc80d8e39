//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, plans, subscriptions, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for `/v1` endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/plans` - Purchasable plans
///
/// ## Subscriptions (user JWT auth)
/// - `POST /v1/subscriptions` - Start a checkout
/// - `POST /v1/subscriptions/verify` - Verify the first payment
/// - `GET /v1/subscriptions/status` - Current status (`?sync=true` asks the gateway)
/// - `POST /v1/subscriptions/cancel` - Cancel
/// - `POST /v1/subscriptions/resume` - Undo a period-end cancellation
/// - `GET /v1/payments` - Payment history
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/razorpay` - Razorpay subscription events
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let state = Arc::new(state);

    let api_routes = Router::new()
        .route("/plans", get(plans::list_plans))
        .route("/subscriptions", post(subscriptions::create_subscription))
        .route("/subscriptions/verify", post(subscriptions::verify_payment))
        .route("/subscriptions/status", get(subscriptions::get_status))
        .route("/subscriptions/cancel", post(subscriptions::cancel_subscription))
        .route("/subscriptions/resume", post(subscriptions::resume_subscription))
        .route("/payments", get(subscriptions::list_payments))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Not rate limited: delivery pace is the gateway's.
        .route("/webhooks/razorpay", post(webhooks::razorpay_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(origins)
    }
}
