//! Subscription and payment handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use focus_billing_core::{Payment, SubscriptionSource};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::lifecycle::{
    CancelSubscriptionInput, CancelSubscriptionResult, CreateSubscriptionInput,
    CreateSubscriptionResult, RequestMetadata, ResumeSubscriptionResult,
    SubscriptionStatusReport, VerifyPaymentInput, VerifyPaymentResult,
};
use crate::state::AppState;

/// Longest accepted cancellation reason, in characters.
const MAX_CANCEL_REASON_CHARS: usize = 500;

/// Create subscription request.
#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// Catalog plan id.
    pub plan_id: String,
    /// Client surface (default: web).
    #[serde(default)]
    pub source: Option<SubscriptionSource>,
}

fn request_metadata(headers: &HeaderMap) -> RequestMetadata {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    RequestMetadata {
        ip_address: header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
            .or_else(|| header("x-real-ip")),
        user_agent: header("user-agent"),
    }
}

/// Start a subscription checkout.
pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<Json<CreateSubscriptionResult>, ApiError> {
    if req.plan_id.trim().is_empty() {
        return Err(ApiError::BadRequest("plan_id is required".into()));
    }

    let result = state
        .lifecycle
        .create_subscription(CreateSubscriptionInput {
            user_id: auth.user_id,
            plan_id: req.plan_id,
            source: req.source.unwrap_or(SubscriptionSource::Web),
            request: request_metadata(&headers),
        })
        .await?;

    Ok(Json(result))
}

/// Verify payment request. Accepts the field names the hosted checkout
/// hands back.
#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    /// Gateway payment id.
    #[serde(alias = "razorpay_payment_id")]
    pub payment_id: String,
    /// Gateway subscription id.
    #[serde(alias = "razorpay_subscription_id")]
    pub subscription_id: String,
    /// Checkout signature.
    #[serde(default, alias = "razorpay_signature")]
    pub signature: Option<String>,
}

/// Verify the first payment and activate the subscription.
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResult>, ApiError> {
    if req.payment_id.trim().is_empty() || req.subscription_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "payment_id and subscription_id are required".into(),
        ));
    }
    if !is_gateway_id(&req.payment_id, "pay_") || !is_gateway_id(&req.subscription_id, "sub_") {
        return Err(ApiError::BadRequest(
            "payment_id or subscription_id is malformed".into(),
        ));
    }

    let result = state
        .lifecycle
        .verify_payment(VerifyPaymentInput {
            user_id: auth.user_id,
            external_payment_id: req.payment_id,
            external_subscription_id: req.subscription_id,
            signature: req.signature.filter(|s| !s.is_empty()),
        })
        .await?;

    Ok(Json(result))
}

/// Gateway ids end up in URL paths, so only the provider's charset passes.
fn is_gateway_id(id: &str, prefix: &str) -> bool {
    id.strip_prefix(prefix).is_some_and(|rest| {
        !rest.is_empty()
            && rest
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    })
}

/// Status query parameters.
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// Consult the gateway before answering.
    #[serde(default)]
    pub sync: bool,
}

/// Get the current user's subscription status.
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<StatusQuery>,
) -> Result<Json<SubscriptionStatusReport>, ApiError> {
    let report = state
        .lifecycle
        .subscription_status(&auth.user_id, query.sync)
        .await?;
    Ok(Json(report))
}

const fn default_true() -> bool {
    true
}

/// Cancel request.
#[derive(Debug, Deserialize)]
pub struct CancelSubscriptionRequest {
    /// Keep access until the period ends (default: true).
    #[serde(default = "default_true")]
    pub cancel_at_period_end: bool,
    /// Optional reason.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Cancel the current user's subscription.
pub async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CancelSubscriptionRequest>,
) -> Result<Json<CancelSubscriptionResult>, ApiError> {
    let reason = req
        .reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    if reason
        .as_ref()
        .is_some_and(|r| r.chars().count() > MAX_CANCEL_REASON_CHARS)
    {
        return Err(ApiError::BadRequest(format!(
            "reason must be at most {MAX_CANCEL_REASON_CHARS} characters"
        )));
    }

    let result = state
        .lifecycle
        .cancel_subscription(CancelSubscriptionInput {
            user_id: auth.user_id,
            cancel_at_period_end: req.cancel_at_period_end,
            reason,
        })
        .await?;

    Ok(Json(result))
}

/// Resume a subscription cancelled at period end.
pub async fn resume_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ResumeSubscriptionResult>, ApiError> {
    let result = state.lifecycle.resume_subscription(&auth.user_id).await?;
    Ok(Json(result))
}

/// Payment history response.
#[derive(Debug, Serialize)]
pub struct PaymentListResponse {
    /// Payments, newest first.
    pub payments: Vec<Payment>,
}

/// List the current user's payments.
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<PaymentListResponse>, ApiError> {
    let payments = state.lifecycle.list_payments(&auth.user_id).await?;
    Ok(Json(PaymentListResponse { payments }))
}
