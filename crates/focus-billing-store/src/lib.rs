//! Storage layer for focus-billing.
//!
//! This crate provides persistence for plans, user billing fields,
//! subscriptions, payments, and the subscription audit log.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, with embedded migrations
//! - [`MemoryStore`]: in-process store with the same semantics, for tests
//!
//! # Transitions
//!
//! Every subscription status change goes through [`Store::apply_transition`],
//! which writes the subscription row, the mirrored user fields, an optional
//! payment, and an optional audit entry atomically. The write is a
//! compare-and-swap on the row's status: if the row is no longer in
//! `expected_status`, nothing is written and [`TransitionOutcome::Conflict`]
//! reports what the row holds now.
//!
//! # Example
//!
//! ```no_run
//! use focus_billing_store::{MemoryStore, UserRepository};
//! use focus_billing_core::{UserBilling, UserId};
//!
//! # async fn example() -> focus_billing_store::Result<()> {
//! let store = MemoryStore::new();
//! let user = UserBilling::new(UserId::generate(), "ada@example.com");
//! store.put_user(&user).await?;
//! let stored = store.get_user(&user.user_id).await?;
//! assert!(stored.is_some());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::{FailPoint, MemoryStore};
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use focus_billing_core::{
    AuditLogEntry, Payment, PlanConfiguration, Subscription, SubscriptionId,
    SubscriptionStatus, UserBilling, UserId, UserSubscriptionUpdate,
};

// =========================================================================
// Plan Operations
// =========================================================================

/// Read access to the plan catalog.
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Get a plan by catalog id, regardless of availability.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_plan(&self, plan_id: &str) -> Result<Option<PlanConfiguration>>;

    /// List every plan ordered by `display_order`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_plans(&self) -> Result<Vec<PlanConfiguration>>;
}

// =========================================================================
// User Operations
// =========================================================================

/// Billing fields on the user record.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Get a user's billing view.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserBilling>>;

    /// Insert or replace a user's billing view.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_user(&self, user: &UserBilling) -> Result<()>;

    /// Cache the gateway customer id if none is cached yet.
    ///
    /// Returns the id that ended up stored, which is the existing one when a
    /// concurrent caller got there first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn set_external_customer_id(&self, user_id: &UserId, customer_id: &str)
        -> Result<String>;
}

// =========================================================================
// Subscription Operations
// =========================================================================

/// Subscription rows outside of status transitions.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Insert a new subscription row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LiveSubscriptionExists` if the row is ACTIVE or
    /// TRIAL and the user already has a live row.
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Get a subscription by local id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>>;

    /// Get a subscription by gateway subscription id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>>;

    /// List a user's subscriptions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_subscriptions_for_user(&self, user_id: &UserId) -> Result<Vec<Subscription>>;

    /// Record the gateway id and authoritative period of an INACTIVE row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no INACTIVE row has this id.
    async fn attach_gateway_subscription(
        &self,
        id: &SubscriptionId,
        external_subscription_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete a row that is still INACTIVE.
    ///
    /// Returns `false` when the row is gone or has moved on.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn delete_inactive_subscription(&self, id: &SubscriptionId) -> Result<bool>;
}

// =========================================================================
// Payment Operations
// =========================================================================

/// Read access to recorded payments. Payments are written only as part of a
/// [`Transition`].
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Get a payment by gateway payment id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_payment_by_external_id(&self, external_payment_id: &str)
        -> Result<Option<Payment>>;

    /// List a user's payments, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_payments_for_user(&self, user_id: &UserId) -> Result<Vec<Payment>>;
}

// =========================================================================
// Audit Operations
// =========================================================================

/// The append-only audit log.
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    /// Append a standalone entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<()>;

    /// List a user's entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_audit_for_user(&self, user_id: &UserId) -> Result<Vec<AuditLogEntry>>;
}

// =========================================================================
// Compound Operations
// =========================================================================

/// One atomic subscription state change.
#[derive(Debug, Clone)]
pub struct Transition {
    /// The row as it should be stored afterwards.
    pub subscription: Subscription,
    /// Status the stored row must still have for the write to apply.
    pub expected_status: SubscriptionStatus,
    /// Tier mirror for the owning user.
    pub user: Option<UserSubscriptionUpdate>,
    /// Payment to append.
    pub payment: Option<Payment>,
    /// Audit entry to append.
    pub audit: Option<AuditLogEntry>,
}

/// Result of [`Store::apply_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Everything was written.
    Applied,
    /// The row moved on before the write; nothing was written.
    Conflict {
        /// Status the row holds now.
        current: SubscriptionStatus,
    },
}

/// The storage trait combining every repository with atomic transitions.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (PostgreSQL, in-memory for testing).
#[async_trait]
pub trait Store:
    PlanRepository + UserRepository + SubscriptionRepository + PaymentRepository + AuditLogRepository
{
    /// Apply a status transition atomically.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the subscription or user doesn't exist.
    /// - `StoreError::LiveSubscriptionExists` if the user would end up with two
    ///   live rows.
    /// - `StoreError::DuplicatePayment` if the payment was already recorded.
    async fn apply_transition(&self, transition: &Transition) -> Result<TransitionOutcome>;
}
