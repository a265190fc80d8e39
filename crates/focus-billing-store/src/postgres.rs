//! PostgreSQL storage implementation.
//!
//! Transitions run in a single transaction. The status compare-and-swap is an
//! `UPDATE ... WHERE id = $1 AND status = $2`; PostgreSQL re-evaluates the
//! predicate after a concurrent writer commits, so exactly one of two racing
//! transitions applies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use focus_billing_core::{
    AuditLogEntry, Payment, PaymentId, PaymentInstrument, PlanConfiguration, Subscription,
    SubscriptionId, UserBilling, UserId,
};

use crate::error::{Result, StoreError};
use crate::schema::constraint;
use crate::{
    AuditLogRepository, PaymentRepository, PlanRepository, Store, SubscriptionRepository,
    Transition, TransitionOutcome, UserRepository,
};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, external_customer_id, external_subscription_id, \
     plan_type, plan_amount, currency, billing_cycle, current_period_start, current_period_end, \
     status, auto_renew, cancel_at_period_end, cancelled_at, cancel_reason, activated_at, \
     last_payment_date, total_billing_cycles, total_amount_paid, next_billing_date, source, \
     metadata, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, user_id, subscription_id, external_payment_id, \
     external_order_id, amount, currency, status, method, card_network, card_last4, bank, \
     wallet, captured_at, refunded_at, created_at";

const AUDIT_COLUMNS: &str = "id, user_id, subscription_id, payment_id, action, actor, actor_id, \
     previous_state, new_state, reason, metadata, timestamp";

const PLAN_COLUMNS: &str = "plan_id, name, tier, billing_period, amount, currency, \
     external_plan_id, is_active, available_until, display_order";

const USER_COLUMNS: &str = "id, email, name, subscription_tier, subscription_status, \
     subscription_start_date, subscription_end_date, external_customer_id";

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Insert or replace a catalog plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn upsert_plan(&self, plan: &PlanConfiguration) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO plan_configurations
                (plan_id, name, tier, billing_period, amount, currency,
                 external_plan_id, is_active, available_until, display_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (plan_id) DO UPDATE SET
                name = EXCLUDED.name,
                tier = EXCLUDED.tier,
                billing_period = EXCLUDED.billing_period,
                amount = EXCLUDED.amount,
                currency = EXCLUDED.currency,
                external_plan_id = EXCLUDED.external_plan_id,
                is_active = EXCLUDED.is_active,
                available_until = EXCLUDED.available_until,
                display_order = EXCLUDED.display_order
            ",
        )
        .bind(&plan.plan_id)
        .bind(&plan.name)
        .bind(plan.tier.as_str())
        .bind(plan.billing_period.as_str())
        .bind(plan.amount)
        .bind(&plan.currency)
        .bind(&plan.external_plan_id)
        .bind(plan.is_active)
        .bind(plan.available_until)
        .bind(plan.display_order)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Map unique-index violations to typed errors.
fn classify(err: sqlx::Error, user_id: &UserId, external_payment_id: Option<&str>) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.constraint() {
            Some(constraint::ONE_LIVE_SUBSCRIPTION_PER_USER) => {
                return StoreError::LiveSubscriptionExists {
                    user_id: user_id.to_string(),
                };
            }
            Some(constraint::UNIQUE_EXTERNAL_PAYMENT_ID) => {
                return StoreError::DuplicatePayment {
                    external_payment_id: external_payment_id.unwrap_or_default().to_string(),
                };
            }
            _ => {}
        }
    }
    err.into()
}

fn plan_from_row(row: &PgRow) -> Result<PlanConfiguration> {
    Ok(PlanConfiguration {
        plan_id: row.try_get("plan_id")?,
        name: row.try_get("name")?,
        tier: row.try_get::<String, _>("tier")?.parse()?,
        billing_period: row.try_get::<String, _>("billing_period")?.parse()?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        external_plan_id: row.try_get("external_plan_id")?,
        is_active: row.try_get("is_active")?,
        available_until: row.try_get("available_until")?,
        display_order: row.try_get("display_order")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<UserBilling> {
    let status: Option<String> = row.try_get("subscription_status")?;
    Ok(UserBilling {
        user_id: UserId::from_uuid(row.try_get("id")?),
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        subscription_tier: row.try_get::<String, _>("subscription_tier")?.parse()?,
        subscription_status: status.map(|s| s.parse()).transpose()?,
        subscription_start_date: row.try_get("subscription_start_date")?,
        subscription_end_date: row.try_get("subscription_end_date")?,
        external_customer_id: row.try_get("external_customer_id")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription> {
    Ok(Subscription {
        id: SubscriptionId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        external_customer_id: row.try_get("external_customer_id")?,
        external_subscription_id: row.try_get("external_subscription_id")?,
        plan_type: row.try_get("plan_type")?,
        plan_amount: row.try_get("plan_amount")?,
        currency: row.try_get("currency")?,
        billing_cycle: row.try_get::<String, _>("billing_cycle")?.parse()?,
        current_period_start: row.try_get("current_period_start")?,
        current_period_end: row.try_get("current_period_end")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        auto_renew: row.try_get("auto_renew")?,
        cancel_at_period_end: row.try_get("cancel_at_period_end")?,
        cancelled_at: row.try_get("cancelled_at")?,
        cancel_reason: row.try_get("cancel_reason")?,
        activated_at: row.try_get("activated_at")?,
        last_payment_date: row.try_get("last_payment_date")?,
        total_billing_cycles: row.try_get("total_billing_cycles")?,
        total_amount_paid: row.try_get("total_amount_paid")?,
        next_billing_date: row.try_get("next_billing_date")?,
        source: row.try_get::<String, _>("source")?.parse()?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment> {
    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        subscription_id: SubscriptionId::from_uuid(row.try_get("subscription_id")?),
        external_payment_id: row.try_get("external_payment_id")?,
        external_order_id: row.try_get("external_order_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        method: row.try_get("method")?,
        instrument: PaymentInstrument {
            card_network: row.try_get("card_network")?,
            card_last4: row.try_get("card_last4")?,
            bank: row.try_get("bank")?,
            wallet: row.try_get("wallet")?,
        },
        captured_at: row.try_get("captured_at")?,
        refunded_at: row.try_get("refunded_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditLogEntry> {
    let subscription_id: Option<uuid::Uuid> = row.try_get("subscription_id")?;
    let payment_id: Option<uuid::Uuid> = row.try_get("payment_id")?;
    let previous_state: Option<String> = row.try_get("previous_state")?;
    let new_state: Option<String> = row.try_get("new_state")?;
    Ok(AuditLogEntry {
        id: row.try_get::<String, _>("id")?.parse()?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        subscription_id: subscription_id.map(SubscriptionId::from_uuid),
        payment_id: payment_id.map(PaymentId::from_uuid),
        action: row.try_get::<String, _>("action")?.parse()?,
        actor: row.try_get::<String, _>("actor")?.parse()?,
        actor_id: row.try_get("actor_id")?,
        previous_state: previous_state.map(|s| s.parse()).transpose()?,
        new_state: new_state.map(|s| s.parse()).transpose()?,
        reason: row.try_get("reason")?,
        metadata: row.try_get("metadata")?,
        timestamp: row.try_get("timestamp")?,
    })
}

async fn insert_audit<'e, E>(executor: E, entry: &AuditLogEntry) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(&format!(
        "INSERT INTO subscription_audit_log ({AUDIT_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
    ))
    .bind(entry.id.to_string())
    .bind(entry.user_id.as_uuid())
    .bind(entry.subscription_id.map(|id| *id.as_uuid()))
    .bind(entry.payment_id.map(|id| *id.as_uuid()))
    .bind(entry.action.as_str())
    .bind(entry.actor.as_str())
    .bind(&entry.actor_id)
    .bind(entry.previous_state.map(|s| s.as_str()))
    .bind(entry.new_state.map(|s| s.as_str()))
    .bind(&entry.reason)
    .bind(&entry.metadata)
    .bind(entry.timestamp)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl PlanRepository for PgStore {
    async fn get_plan(&self, plan_id: &str) -> Result<Option<PlanConfiguration>> {
        let row = sqlx::query(&format!(
            "SELECT {PLAN_COLUMNS} FROM plan_configurations WHERE plan_id = $1"
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(plan_from_row).transpose()
    }

    async fn list_plans(&self) -> Result<Vec<PlanConfiguration>> {
        let rows = sqlx::query(&format!(
            "SELECT {PLAN_COLUMNS} FROM plan_configurations ORDER BY display_order, plan_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(plan_from_row).collect()
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserBilling>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn put_user(&self, user: &UserBilling) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO users
                (id, email, name, subscription_tier, subscription_status,
                 subscription_start_date, subscription_end_date, external_customer_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                name = EXCLUDED.name,
                subscription_tier = EXCLUDED.subscription_tier,
                subscription_status = EXCLUDED.subscription_status,
                subscription_start_date = EXCLUDED.subscription_start_date,
                subscription_end_date = EXCLUDED.subscription_end_date,
                external_customer_id = EXCLUDED.external_customer_id
            ",
        )
        .bind(user.user_id.as_uuid())
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.subscription_tier.as_str())
        .bind(user.subscription_status.map(|s| s.as_str()))
        .bind(user.subscription_start_date)
        .bind(user.subscription_end_date)
        .bind(&user.external_customer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_external_customer_id(
        &self,
        user_id: &UserId,
        customer_id: &str,
    ) -> Result<String> {
        let stored: Option<Option<String>> = sqlx::query_scalar(
            r"
            UPDATE users
            SET external_customer_id = COALESCE(external_customer_id, $2)
            WHERE id = $1
            RETURNING external_customer_id
            ",
        )
        .bind(user_id.as_uuid())
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;
        stored.flatten().ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl SubscriptionRepository for PgStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO subscriptions ({SUBSCRIPTION_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
              $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)"
        ))
        .bind(subscription.id.as_uuid())
        .bind(subscription.user_id.as_uuid())
        .bind(&subscription.external_customer_id)
        .bind(&subscription.external_subscription_id)
        .bind(&subscription.plan_type)
        .bind(subscription.plan_amount)
        .bind(&subscription.currency)
        .bind(subscription.billing_cycle.as_str())
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.status.as_str())
        .bind(subscription.auto_renew)
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.cancelled_at)
        .bind(&subscription.cancel_reason)
        .bind(subscription.activated_at)
        .bind(subscription.last_payment_date)
        .bind(subscription.total_billing_cycles)
        .bind(subscription.total_amount_paid)
        .bind(subscription.next_billing_date)
        .bind(subscription.source.as_str())
        .bind(&subscription.metadata)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, &subscription.user_id, None))?;
        Ok(())
    }

    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn get_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE external_subscription_id = $1"
        ))
        .bind(external_subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn list_subscriptions_for_user(&self, user_id: &UserId) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn attach_gateway_subscription(
        &self,
        id: &SubscriptionId,
        external_subscription_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE subscriptions SET
                external_subscription_id = $2,
                current_period_start = $3,
                current_period_end = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = 'inactive'
            ",
        )
        .bind(id.as_uuid())
        .bind(external_subscription_id)
        .bind(period_start)
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_inactive_subscription(&self, id: &SubscriptionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1 AND status = 'inactive'")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn get_payment_by_external_id(
        &self,
        external_payment_id: &str,
    ) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE external_payment_id = $1"
        ))
        .bind(external_payment_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn list_payments_for_user(&self, user_id: &UserId) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(payment_from_row).collect()
    }
}

#[async_trait]
impl AuditLogRepository for PgStore {
    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<()> {
        insert_audit(&self.pool, entry).await
    }

    async fn list_audit_for_user(&self, user_id: &UserId) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM subscription_audit_log WHERE user_id = $1 ORDER BY id"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(audit_from_row).collect()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn apply_transition(&self, transition: &Transition) -> Result<TransitionOutcome> {
        let next = &transition.subscription;
        let payment_ref = transition
            .payment
            .as_ref()
            .map(|p| p.external_payment_id.as_str());

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r"
            UPDATE subscriptions SET
                external_subscription_id = $3,
                current_period_start = $4,
                current_period_end = $5,
                status = $6,
                auto_renew = $7,
                cancel_at_period_end = $8,
                cancelled_at = $9,
                cancel_reason = $10,
                activated_at = $11,
                last_payment_date = $12,
                total_billing_cycles = $13,
                total_amount_paid = $14,
                next_billing_date = $15,
                metadata = $16,
                updated_at = $17
            WHERE id = $1 AND status = $2
            ",
        )
        .bind(next.id.as_uuid())
        .bind(transition.expected_status.as_str())
        .bind(&next.external_subscription_id)
        .bind(next.current_period_start)
        .bind(next.current_period_end)
        .bind(next.status.as_str())
        .bind(next.auto_renew)
        .bind(next.cancel_at_period_end)
        .bind(next.cancelled_at)
        .bind(&next.cancel_reason)
        .bind(next.activated_at)
        .bind(next.last_payment_date)
        .bind(next.total_billing_cycles)
        .bind(next.total_amount_paid)
        .bind(next.next_billing_date)
        .bind(&next.metadata)
        .bind(next.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify(e, &next.user_id, payment_ref))?;

        if updated.rows_affected() == 0 {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM subscriptions WHERE id = $1")
                    .bind(next.id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return match current {
                Some(status) => Ok(TransitionOutcome::Conflict {
                    current: status.parse()?,
                }),
                None => Err(StoreError::NotFound),
            };
        }

        if let Some(update) = &transition.user {
            let result = sqlx::query(
                r"
                UPDATE users SET
                    subscription_tier = $2,
                    subscription_status = $3,
                    subscription_start_date = $4,
                    subscription_end_date = $5
                WHERE id = $1
                ",
            )
            .bind(next.user_id.as_uuid())
            .bind(update.tier.as_str())
            .bind(update.status.as_str())
            .bind(update.start_date)
            .bind(update.end_date)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
        }

        if let Some(payment) = &transition.payment {
            sqlx::query(&format!(
                "INSERT INTO payments ({PAYMENT_COLUMNS}) VALUES \
                 ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
            ))
            .bind(payment.id.as_uuid())
            .bind(payment.user_id.as_uuid())
            .bind(payment.subscription_id.as_uuid())
            .bind(&payment.external_payment_id)
            .bind(&payment.external_order_id)
            .bind(payment.amount)
            .bind(&payment.currency)
            .bind(payment.status.as_str())
            .bind(&payment.method)
            .bind(&payment.instrument.card_network)
            .bind(&payment.instrument.card_last4)
            .bind(&payment.instrument.bank)
            .bind(&payment.instrument.wallet)
            .bind(payment.captured_at)
            .bind(payment.refunded_at)
            .bind(payment.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(e, &next.user_id, payment_ref))?;
        }

        if let Some(entry) = &transition.audit {
            insert_audit(&mut *tx, entry).await?;
        }

        tx.commit().await?;
        Ok(TransitionOutcome::Applied)
    }
}
