//! Table names and constraint names shared by the PostgreSQL store and its
//! migrations.

/// Table names.
pub mod table {
    /// Billing columns of the application's users.
    pub const USERS: &str = "users";

    /// Read-only plan catalog.
    pub const PLAN_CONFIGURATIONS: &str = "plan_configurations";

    /// Subscription rows, one per checkout attempt.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Append-only payments, unique by gateway payment id.
    pub const PAYMENTS: &str = "payments";

    /// Append-only audit log keyed by ULID.
    pub const SUBSCRIPTION_AUDIT_LOG: &str = "subscription_audit_log";
}

/// Constraint names the store maps to typed errors.
pub mod constraint {
    /// Partial unique index: one ACTIVE/TRIAL subscription per user.
    pub const ONE_LIVE_SUBSCRIPTION_PER_USER: &str = "subscriptions_one_live_per_user";

    /// Unique gateway payment id.
    pub const UNIQUE_EXTERNAL_PAYMENT_ID: &str = "payments_external_payment_id_key";
}

/// Returns all table names in dependency order.
#[must_use]
pub fn all_tables() -> Vec<&'static str> {
    vec![
        table::USERS,
        table::PLAN_CONFIGURATIONS,
        table::SUBSCRIPTIONS,
        table::PAYMENTS,
        table::SUBSCRIPTION_AUDIT_LOG,
    ]
}
