//! In-memory storage implementation.
//!
//! [`MemoryStore`] keeps everything behind one `tokio` mutex, so each call is
//! atomic and transitions are serialized exactly like database transactions.
//! It enforces the same uniqueness rules as the PostgreSQL schema and can be
//! told to fail a specific operation once, for testing failure paths.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use focus_billing_core::{
    AuditLogEntry, Payment, PlanConfiguration, Subscription, SubscriptionId,
    SubscriptionStatus, UserBilling, UserId,
};

use crate::error::{Result, StoreError};
use crate::{
    AuditLogRepository, PaymentRepository, PlanRepository, Store, SubscriptionRepository,
    Transition, TransitionOutcome, UserRepository,
};

/// An operation that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// [`SubscriptionRepository::insert_subscription`].
    InsertSubscription,
    /// [`SubscriptionRepository::attach_gateway_subscription`].
    AttachGatewaySubscription,
    /// [`Store::apply_transition`].
    ApplyTransition,
    /// [`AuditLogRepository::append_audit`].
    AppendAudit,
}

#[derive(Default)]
struct Inner {
    plans: Vec<PlanConfiguration>,
    users: Vec<UserBilling>,
    subscriptions: Vec<Subscription>,
    payments: Vec<Payment>,
    audit: Vec<AuditLogEntry>,
    fail_points: HashSet<FailPoint>,
}

impl Inner {
    fn trip(&mut self, point: FailPoint) -> Result<()> {
        if self.fail_points.remove(&point) {
            return Err(StoreError::Database(format!("injected failure: {point:?}")));
        }
        Ok(())
    }

    fn user_mut(&mut self, user_id: &UserId) -> Option<&mut UserBilling> {
        self.users.iter_mut().find(|u| u.user_id == *user_id)
    }

    fn has_other_live(&self, user_id: &UserId, except: &SubscriptionId) -> bool {
        self.subscriptions
            .iter()
            .any(|s| s.user_id == *user_id && s.id != *except && s.status.is_live())
    }
}

/// In-memory [`Store`] for tests and local development.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a catalog plan.
    pub async fn put_plan(&self, plan: PlanConfiguration) {
        let mut inner = self.inner.lock().await;
        inner.plans.retain(|p| p.plan_id != plan.plan_id);
        inner.plans.push(plan);
    }

    /// Make the next call to `point` fail with a database error.
    pub async fn fail_next(&self, point: FailPoint) {
        self.inner.lock().await.fail_points.insert(point);
    }

    /// Replace a subscription row without any checks.
    ///
    /// Lets tests move rows into states (elapsed periods, trials) that no
    /// lifecycle operation produces directly.
    pub async fn overwrite_subscription(&self, subscription: Subscription) {
        let mut inner = self.inner.lock().await;
        if let Some(row) = inner.subscriptions.iter_mut().find(|s| s.id == subscription.id) {
            *row = subscription;
        } else {
            inner.subscriptions.push(subscription);
        }
    }
}

#[async_trait]
impl PlanRepository for MemoryStore {
    async fn get_plan(&self, plan_id: &str) -> Result<Option<PlanConfiguration>> {
        let inner = self.inner.lock().await;
        Ok(inner.plans.iter().find(|p| p.plan_id == plan_id).cloned())
    }

    async fn list_plans(&self) -> Result<Vec<PlanConfiguration>> {
        let mut plans = self.inner.lock().await.plans.clone();
        plans.sort_by_key(|p| p.display_order);
        Ok(plans)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserBilling>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.iter().find(|u| u.user_id == *user_id).cloned())
    }

    async fn put_user(&self, user: &UserBilling) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.user_mut(&user.user_id) {
            *existing = user.clone();
        } else {
            inner.users.push(user.clone());
        }
        Ok(())
    }

    async fn set_external_customer_id(
        &self,
        user_id: &UserId,
        customer_id: &str,
    ) -> Result<String> {
        let mut inner = self.inner.lock().await;
        let user = inner.user_mut(user_id).ok_or(StoreError::NotFound)?;
        Ok(user
            .external_customer_id
            .get_or_insert_with(|| customer_id.to_string())
            .clone())
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.trip(FailPoint::InsertSubscription)?;

        if inner.subscriptions.iter().any(|s| s.id == subscription.id) {
            return Err(StoreError::Database(format!(
                "duplicate subscription id: {}",
                subscription.id
            )));
        }
        if subscription.status.is_live()
            && inner.has_other_live(&subscription.user_id, &subscription.id)
        {
            return Err(StoreError::LiveSubscriptionExists {
                user_id: subscription.user_id.to_string(),
            });
        }

        inner.subscriptions.push(subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        let inner = self.inner.lock().await;
        Ok(inner.subscriptions.iter().find(|s| s.id == *id).cloned())
    }

    async fn get_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .subscriptions
            .iter()
            .find(|s| s.external_subscription_id.as_deref() == Some(external_subscription_id))
            .cloned())
    }

    async fn list_subscriptions_for_user(&self, user_id: &UserId) -> Result<Vec<Subscription>> {
        let inner = self.inner.lock().await;
        // Later inserts win ties on created_at.
        let mut rows: Vec<Subscription> = inner
            .subscriptions
            .iter()
            .rev()
            .filter(|s| s.user_id == *user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn attach_gateway_subscription(
        &self,
        id: &SubscriptionId,
        external_subscription_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.trip(FailPoint::AttachGatewaySubscription)?;

        let row = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.id == *id && s.status == SubscriptionStatus::Inactive)
            .ok_or(StoreError::NotFound)?;
        row.external_subscription_id = Some(external_subscription_id.to_string());
        row.current_period_start = period_start;
        row.current_period_end = period_end;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_inactive_subscription(&self, id: &SubscriptionId) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.subscriptions.len();
        inner
            .subscriptions
            .retain(|s| !(s.id == *id && s.status == SubscriptionStatus::Inactive));
        Ok(inner.subscriptions.len() < before)
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn get_payment_by_external_id(
        &self,
        external_payment_id: &str,
    ) -> Result<Option<Payment>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .payments
            .iter()
            .find(|p| p.external_payment_id == external_payment_id)
            .cloned())
    }

    async fn list_payments_for_user(&self, user_id: &UserId) -> Result<Vec<Payment>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Payment> = inner
            .payments
            .iter()
            .rev()
            .filter(|p| p.user_id == *user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

#[async_trait]
impl AuditLogRepository for MemoryStore {
    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.trip(FailPoint::AppendAudit)?;
        inner.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit_for_user(&self, user_id: &UserId) -> Result<Vec<AuditLogEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .audit
            .iter()
            .filter(|e| e.user_id == *user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn apply_transition(&self, transition: &Transition) -> Result<TransitionOutcome> {
        let mut inner = self.inner.lock().await;
        inner.trip(FailPoint::ApplyTransition)?;

        let next = &transition.subscription;
        let current = inner
            .subscriptions
            .iter()
            .find(|s| s.id == next.id)
            .map(|s| s.status)
            .ok_or(StoreError::NotFound)?;
        if current != transition.expected_status {
            return Ok(TransitionOutcome::Conflict { current });
        }

        // Validate everything before touching any row.
        if next.status.is_live() && inner.has_other_live(&next.user_id, &next.id) {
            return Err(StoreError::LiveSubscriptionExists {
                user_id: next.user_id.to_string(),
            });
        }
        if let Some(payment) = &transition.payment {
            if inner
                .payments
                .iter()
                .any(|p| p.external_payment_id == payment.external_payment_id)
            {
                return Err(StoreError::DuplicatePayment {
                    external_payment_id: payment.external_payment_id.clone(),
                });
            }
        }
        if transition.user.is_some() && inner.user_mut(&next.user_id).is_none() {
            return Err(StoreError::NotFound);
        }

        if let Some(row) = inner.subscriptions.iter_mut().find(|s| s.id == next.id) {
            *row = next.clone();
        }
        if let Some(update) = &transition.user {
            if let Some(user) = inner.user_mut(&next.user_id) {
                user.apply(update);
            }
        }
        if let Some(payment) = &transition.payment {
            inner.payments.push(payment.clone());
        }
        if let Some(entry) = &transition.audit {
            inner.audit.push(entry.clone());
        }

        Ok(TransitionOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use focus_billing_core::{
        AuditAction, BillingPeriod, PaymentId, PaymentInstrument, PaymentStatus,
        SubscriptionSource, Tier, UserSubscriptionUpdate,
    };

    fn plan() -> PlanConfiguration {
        PlanConfiguration {
            plan_id: "pro_monthly".into(),
            name: "Pro Monthly".into(),
            tier: Tier::Pro,
            billing_period: BillingPeriod::Monthly,
            amount: 19_900,
            currency: "INR".into(),
            external_plan_id: "plan_ext_monthly".into(),
            is_active: true,
            available_until: None,
            display_order: 1,
        }
    }

    async fn seeded() -> (MemoryStore, UserId, Subscription) {
        let store = MemoryStore::new();
        let user_id = UserId::generate();
        store
            .put_user(&UserBilling::new(user_id, "ada@example.com"))
            .await
            .unwrap();
        let sub = Subscription::pending(
            user_id,
            "cust_1".into(),
            &plan(),
            SubscriptionSource::Web,
            serde_json::Value::Null,
            Utc::now(),
        );
        store.insert_subscription(&sub).await.unwrap();
        (store, user_id, sub)
    }

    fn payment(user_id: UserId, sub: &Subscription, external_id: &str) -> Payment {
        Payment {
            id: PaymentId::generate(),
            user_id,
            subscription_id: sub.id,
            external_payment_id: external_id.into(),
            external_order_id: None,
            amount: sub.plan_amount,
            currency: sub.currency.clone(),
            status: PaymentStatus::Captured,
            method: Some("card".into()),
            instrument: PaymentInstrument::default(),
            captured_at: Some(Utc::now()),
            refunded_at: None,
            created_at: Utc::now(),
        }
    }

    fn activation(user_id: UserId, sub: &Subscription, external_id: &str) -> Transition {
        let mut next = sub.clone();
        next.status = SubscriptionStatus::Active;
        Transition {
            subscription: next,
            expected_status: SubscriptionStatus::Inactive,
            user: Some(UserSubscriptionUpdate {
                tier: Tier::Pro,
                status: SubscriptionStatus::Active,
                start_date: Some(sub.current_period_start),
                end_date: Some(sub.current_period_end),
            }),
            payment: Some(payment(user_id, sub, external_id)),
            audit: Some(AuditLogEntry::new(user_id, AuditAction::PaymentSucceeded)),
        }
    }

    #[tokio::test]
    async fn test_transition_writes_every_part() {
        let (store, user_id, sub) = seeded().await;

        let outcome = store
            .apply_transition(&activation(user_id, &sub, "pay_1"))
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::Applied);

        let user = store.get_user(&user_id).await.unwrap().unwrap();
        assert_eq!(user.subscription_tier, Tier::Pro);
        assert_eq!(store.list_payments_for_user(&user_id).await.unwrap().len(), 1);
        assert_eq!(store.list_audit_for_user(&user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transition_conflicts_when_status_moved_on() {
        let (store, user_id, sub) = seeded().await;
        store
            .apply_transition(&activation(user_id, &sub, "pay_1"))
            .await
            .unwrap();

        let outcome = store
            .apply_transition(&activation(user_id, &sub, "pay_2"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Conflict {
                current: SubscriptionStatus::Active
            }
        );
        assert_eq!(store.list_payments_for_user(&user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_payment_writes_nothing() {
        let (store, user_id, sub) = seeded().await;
        store
            .apply_transition(&activation(user_id, &sub, "pay_1"))
            .await
            .unwrap();

        let mut renewal = activation(user_id, &sub, "pay_1");
        renewal.expected_status = SubscriptionStatus::Active;
        renewal.subscription.total_billing_cycles = 2;
        let err = store.apply_transition(&renewal).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePayment { .. }));

        let stored = store.get_subscription(&sub.id).await.unwrap().unwrap();
        assert_eq!(stored.total_billing_cycles, 0);
    }

    #[tokio::test]
    async fn test_second_live_subscription_is_rejected() {
        let (store, user_id, sub) = seeded().await;
        store
            .apply_transition(&activation(user_id, &sub, "pay_1"))
            .await
            .unwrap();

        let other = Subscription::pending(
            user_id,
            "cust_1".into(),
            &plan(),
            SubscriptionSource::Web,
            serde_json::Value::Null,
            Utc::now(),
        );
        store.insert_subscription(&other).await.unwrap();

        let err = store
            .apply_transition(&activation(user_id, &other, "pay_2"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LiveSubscriptionExists { .. }));
    }

    #[tokio::test]
    async fn test_customer_id_cache_keeps_first_writer() {
        let (store, user_id, _) = seeded().await;
        let first = store
            .set_external_customer_id(&user_id, "cust_a")
            .await
            .unwrap();
        let second = store
            .set_external_customer_id(&user_id, "cust_b")
            .await
            .unwrap();
        assert_eq!(first, "cust_a");
        assert_eq!(second, "cust_a");
    }

    #[tokio::test]
    async fn test_fail_point_trips_once() {
        let (store, user_id, sub) = seeded().await;
        store.fail_next(FailPoint::ApplyTransition).await;

        assert!(store
            .apply_transition(&activation(user_id, &sub, "pay_1"))
            .await
            .is_err());
        assert!(store
            .apply_transition(&activation(user_id, &sub, "pay_1"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_delete_only_touches_inactive_rows() {
        let (store, user_id, sub) = seeded().await;
        store
            .apply_transition(&activation(user_id, &sub, "pay_1"))
            .await
            .unwrap();
        assert!(!store.delete_inactive_subscription(&sub.id).await.unwrap());

        let other = Subscription::pending(
            user_id,
            "cust_1".into(),
            &plan(),
            SubscriptionSource::Ios,
            serde_json::Value::Null,
            Utc::now(),
        );
        store.insert_subscription(&other).await.unwrap();
        assert!(store.delete_inactive_subscription(&other.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_subscriptions_list_newest_first() {
        let (store, user_id, first) = seeded().await;
        let mut second = Subscription::pending(
            user_id,
            "cust_1".into(),
            &plan(),
            SubscriptionSource::Web,
            serde_json::Value::Null,
            Utc::now() + Duration::seconds(5),
        );
        second.status = SubscriptionStatus::Expired;
        store.insert_subscription(&second).await.unwrap();

        let rows = store.list_subscriptions_for_user(&user_id).await.unwrap();
        assert_eq!(rows[0].id, second.id);
        assert_eq!(rows[1].id, first.id);
    }

    #[tokio::test]
    async fn test_plans_sorted_by_display_order() {
        let store = MemoryStore::new();
        let mut yearly = plan();
        yearly.plan_id = "pro_yearly".into();
        yearly.display_order = 0;
        store.put_plan(plan()).await;
        store.put_plan(yearly).await;

        let plans = store.list_plans().await.unwrap();
        assert_eq!(plans[0].plan_id, "pro_yearly");
    }
}
