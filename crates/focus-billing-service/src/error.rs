//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use focus_billing_core::{BillingError, ErrorKind};

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A lifecycle operation failed.
    #[error(transparent)]
    Billing(#[from] BillingError),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

fn billing_details(err: &BillingError) -> Option<serde_json::Value> {
    match err {
        BillingError::AmountMismatch { expected, actual } => Some(serde_json::json!({
            "expected": expected,
            "actual": actual,
        })),
        BillingError::CurrencyMismatch { expected, actual } => Some(serde_json::json!({
            "expected": expected,
            "actual": actual,
        })),
        BillingError::InvalidTransition { from, to } => Some(serde_json::json!({
            "from": from,
            "to": to,
        })),
        BillingError::PaymentNotSuccessful { status } => {
            Some(serde_json::json!({ "payment_status": status }))
        }
        _ => None,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Billing(err) => {
                let status = StatusCode::from_u16(err.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let message = match err.kind() {
                    ErrorKind::Internal | ErrorKind::CriticalDivergence => {
                        tracing::error!(error = %err, "Internal server error");
                        "An internal error occurred".to_string()
                    }
                    ErrorKind::Upstream => {
                        tracing::warn!(error = %err, "Payment gateway error");
                        "The payment provider could not complete the request".to_string()
                    }
                    _ => err.to_string(),
                };
                (status, err.code(), message, billing_details(err))
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}
