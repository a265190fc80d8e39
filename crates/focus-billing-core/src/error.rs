//! Error types for focus-billing.

use crate::ids::IdError;
use crate::subscription::SubscriptionStatus;

/// Result type for focus-billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Broad classification of a [`BillingError`], used by callers to pick a
/// response without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request is malformed or not allowed in the current state.
    Validation,
    /// A referenced record does not exist.
    NotFound,
    /// The request conflicts with existing state.
    Conflict,
    /// The caller does not own the resource.
    Authorization,
    /// A gateway signature did not verify.
    SignatureInvalid,
    /// The payment gateway failed or rejected the call.
    Upstream,
    /// Gateway and local state disagree and need manual reconciliation.
    CriticalDivergence,
    /// Anything else. Details are logged, never returned.
    Internal,
}

/// Errors that can occur in focus-billing operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Generic input validation failure.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Subscriptions are switched off for this deployment.
    #[error("subscriptions are not enabled")]
    FeatureDisabled,

    /// Plan id is not in the catalog.
    #[error("plan not found: {plan_id}")]
    PlanNotFound {
        /// The requested plan.
        plan_id: String,
    },

    /// Plan exists but is inactive or past its availability date.
    #[error("plan is not available: {plan_id}")]
    PlanUnavailable {
        /// The requested plan.
        plan_id: String,
    },

    /// User not found.
    #[error("user not found: {user_id}")]
    UserNotFound {
        /// The user ID that was not found.
        user_id: String,
    },

    /// No subscription with the given id.
    #[error("subscription not found: {subscription_id}")]
    SubscriptionNotFound {
        /// Local or gateway subscription id.
        subscription_id: String,
    },

    /// The subscription belongs to a different user.
    #[error("subscription does not belong to the requesting user")]
    OwnershipMismatch,

    /// The user already has a live subscription.
    #[error("user already has an active subscription")]
    AlreadyActive,

    /// The subscription is already cancelled.
    #[error("subscription is already cancelled")]
    AlreadyCancelled,

    /// The subscription has expired.
    #[error("subscription has expired")]
    SubscriptionExpired,

    /// No subscription that can be cancelled.
    #[error("no active subscription")]
    NoActiveSubscription,

    /// No subscription that can be resumed.
    #[error("no cancelled subscription")]
    NoCancelledSubscription,

    /// The cancelled subscription's paid period is over.
    #[error("subscription period has ended; create a new subscription")]
    SubscriptionPeriodEnded,

    /// Immediate cancellations cannot be undone.
    #[error("an immediately cancelled subscription cannot be resumed")]
    CannotResumeImmediateCancellation,

    /// The state machine forbids the move.
    #[error("invalid subscription transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: SubscriptionStatus,
        /// Requested status.
        to: SubscriptionStatus,
    },

    /// The gateway refused to resume the subscription.
    #[error("the payment provider cannot resume this subscription; create a new subscription instead")]
    ResumeNotSupported,

    /// HMAC signature did not match.
    #[error("signature verification failed")]
    SignatureInvalid,

    /// Gateway reports the payment in a non-successful state.
    #[error("payment not successful: status={status}")]
    PaymentNotSuccessful {
        /// Gateway payment status.
        status: String,
    },

    /// Paid amount differs from the plan price.
    #[error("amount mismatch: expected={expected}, actual={actual}")]
    AmountMismatch {
        /// Plan amount in minor units.
        expected: i64,
        /// Payment amount in minor units.
        actual: i64,
    },

    /// Paid currency differs from the plan currency.
    #[error("currency mismatch: expected={expected}, actual={actual}")]
    CurrencyMismatch {
        /// Plan currency.
        expected: String,
        /// Payment currency.
        actual: String,
    },

    /// The payment was not made for the subscription being verified.
    #[error("payment {payment_id} does not belong to this subscription")]
    PaymentSubscriptionMismatch {
        /// Gateway payment id.
        payment_id: String,
        /// Subscription the gateway links the payment to, if any.
        linked_subscription_id: Option<String>,
    },

    /// Payment gateway error.
    #[error("payment gateway error during {operation}: {message}")]
    Upstream {
        /// The gateway operation that failed.
        operation: &'static str,
        /// Provider message, kept for operators.
        message: String,
    },

    /// The activation transaction failed.
    #[error("subscription activation failed")]
    ActivationFailed,

    /// The gateway accepted a change the local store could not record.
    #[error("gateway and local state diverged during {operation}")]
    CriticalDivergence {
        /// The operation that diverged.
        operation: &'static str,
    },

    /// Internal failure; the message is not shown to callers.
    #[error("internal error during {operation}")]
    Internal {
        /// The operation that failed.
        operation: &'static str,
    },

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl BillingError {
    /// Create an upstream error from any displayable gateway failure.
    pub fn upstream(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Upstream {
            operation,
            message: err.to_string(),
        }
    }

    /// Broad classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::FeatureDisabled
            | Self::PlanUnavailable { .. }
            | Self::SubscriptionExpired
            | Self::NoActiveSubscription
            | Self::NoCancelledSubscription
            | Self::SubscriptionPeriodEnded
            | Self::CannotResumeImmediateCancellation
            | Self::InvalidTransition { .. }
            | Self::ResumeNotSupported
            | Self::PaymentNotSuccessful { .. }
            | Self::AmountMismatch { .. }
            | Self::CurrencyMismatch { .. }
            | Self::PaymentSubscriptionMismatch { .. }
            | Self::InvalidId(_) => ErrorKind::Validation,
            Self::PlanNotFound { .. }
            | Self::UserNotFound { .. }
            | Self::SubscriptionNotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyActive | Self::AlreadyCancelled => ErrorKind::Conflict,
            Self::OwnershipMismatch => ErrorKind::Authorization,
            Self::SignatureInvalid => ErrorKind::SignatureInvalid,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::CriticalDivergence { .. } => ErrorKind::CriticalDivergence,
            Self::ActivationFailed | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::FeatureDisabled => "feature_disabled",
            Self::PlanNotFound { .. } => "plan_not_found",
            Self::PlanUnavailable { .. } => "plan_unavailable",
            Self::UserNotFound { .. } => "user_not_found",
            Self::SubscriptionNotFound { .. } => "subscription_not_found",
            Self::OwnershipMismatch => "ownership_mismatch",
            Self::AlreadyActive => "already_active",
            Self::AlreadyCancelled => "already_cancelled",
            Self::SubscriptionExpired => "subscription_expired",
            Self::NoActiveSubscription => "no_active_subscription",
            Self::NoCancelledSubscription => "no_cancelled_subscription",
            Self::SubscriptionPeriodEnded => "subscription_period_ended",
            Self::CannotResumeImmediateCancellation => "cannot_resume_immediate_cancellation",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ResumeNotSupported => "resume_not_supported",
            Self::SignatureInvalid => "signature_invalid",
            Self::PaymentNotSuccessful { .. } => "payment_not_successful",
            Self::AmountMismatch { .. } => "amount_mismatch",
            Self::CurrencyMismatch { .. } => "currency_mismatch",
            Self::PaymentSubscriptionMismatch { .. } => "payment_subscription_mismatch",
            Self::Upstream { .. } => "upstream_error",
            Self::ActivationFailed => "activation_failed",
            Self::CriticalDivergence { .. } => "critical_divergence",
            Self::Internal { .. } => "internal_error",
            Self::InvalidId(_) => "invalid_id",
        }
    }

    /// HTTP status the error maps to.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::SignatureInvalid => 400,
            ErrorKind::Authorization => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Upstream => 502,
            ErrorKind::CriticalDivergence | ErrorKind::Internal => 500,
        }
    }
}

/// A stored or submitted enum value that is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The rejected value.
    pub value: String,
}

impl ParseEnumError {
    /// Create a parse error for `value`.
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_errors_map_to_409() {
        assert_eq!(BillingError::AlreadyActive.status_code(), 409);
        assert_eq!(BillingError::AlreadyCancelled.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn internal_errors_do_not_expose_details() {
        let err = BillingError::Internal {
            operation: "cancel_subscription",
        };
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_string(), "internal error during cancel_subscription");
    }

    #[test]
    fn upstream_keeps_provider_message() {
        let err = BillingError::upstream("create_subscription", "plan does not exist");
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(err.to_string().contains("plan does not exist"));
    }

    #[test]
    fn resume_not_supported_points_to_new_subscription() {
        let message = BillingError::ResumeNotSupported.to_string();
        assert!(message.contains("create a new subscription"));
    }

    #[test]
    fn unlinked_payment_is_a_validation_error() {
        let err = BillingError::PaymentSubscriptionMismatch {
            payment_id: "pay_1".into(),
            linked_subscription_id: Some("sub_other".into()),
        };
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.code(), "payment_subscription_mismatch");
    }
}
