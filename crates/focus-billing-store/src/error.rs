//! Error types for focus-billing storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("not found")]
    NotFound,

    /// The user already has an ACTIVE or TRIAL subscription.
    #[error("user already has a live subscription: {user_id}")]
    LiveSubscriptionExists {
        /// The user that would end up with two live rows.
        user_id: String,
    },

    /// A payment with this gateway id was already recorded.
    #[error("duplicate payment: {external_payment_id}")]
    DuplicatePayment {
        /// The gateway payment id.
        external_payment_id: String,
    },
}

impl From<focus_billing_core::ParseEnumError> for StoreError {
    fn from(err: focus_billing_core::ParseEnumError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<focus_billing_core::IdError> for StoreError {
    fn from(err: focus_billing_core::IdError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}
