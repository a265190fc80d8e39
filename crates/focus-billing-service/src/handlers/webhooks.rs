//! Razorpay webhook handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;
use crate::webhooks::WebhookOutcome;

/// Header carrying the webhook signature.
const SIGNATURE_HEADER: &str = "x-razorpay-signature";

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was received.
    pub received: bool,
}

/// Handle Razorpay webhooks.
///
/// Anything past the signature check is acknowledged so the gateway does not
/// keep redelivering; failures are in the logs.
pub async fn razorpay_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.webhooks.handle(&body, signature).await?;
    match &outcome {
        WebhookOutcome::Failed => tracing::warn!("Razorpay webhook acknowledged with failures"),
        other => tracing::debug!(outcome = ?other, "Razorpay webhook processed"),
    }

    Ok(Json(WebhookResponse { received: true }))
}
