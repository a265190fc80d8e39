//! Shared test harness: an in-memory store, a scripted gateway, and a router.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;

use focus_billing_core::{
    BillingPeriod, PlanConfiguration, Subscription, SubscriptionStatus, Tier, UserBilling, UserId,
};
use focus_billing_service::auth::JwtClaims;
use focus_billing_service::crypto::hmac_sha256_hex;
use focus_billing_service::gateway::{
    CreateSubscriptionRequest, GatewayCustomer, GatewayError, PaymentGateway, RemotePayment,
    RemotePaymentStatus, RemoteSubscription, RemoteSubscriptionStatus, SubscriptionPatch,
};
use focus_billing_service::{
    create_router, AppState, ServiceConfig, SubscriptionLifecycle, WebhookReconciler,
};
use focus_billing_store::{MemoryStore, SubscriptionRepository, UserRepository};

pub const KEY_SECRET: &str = "rzp_test_secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const JWT_SECRET: &str = "jwt_test_secret";
pub const MONTHLY_AMOUNT: i64 = 19_900;
pub const YEARLY_AMOUNT: i64 = 199_900;

// ============================================================================
// Scripted gateway
// ============================================================================

#[derive(Default)]
struct GatewayState {
    next_id: u32,
    customers: HashMap<String, GatewayCustomer>,
    subscriptions: HashMap<String, RemoteSubscription>,
    payments: HashMap<String, RemotePayment>,
    created: Vec<CreateSubscriptionRequest>,
    cancels: Vec<(String, bool)>,
    resumes: Vec<String>,
    fail_create_subscription: bool,
    fail_cancel: bool,
    fail_fetch_subscription: bool,
    reject_resume: bool,
    fail_resume: bool,
}

/// A [`PaymentGateway`] that keeps its state in memory.
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<GatewayState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payment that `fetch_payment` will return.
    pub fn add_payment(&self, id: &str, amount: i64, currency: &str, status: RemotePaymentStatus) {
        let payment = RemotePayment {
            id: id.to_string(),
            amount,
            currency: currency.to_string(),
            status,
            order_id: None,
            method: Some("card".into()),
            card_network: Some("Visa".into()),
            card_last4: Some("1111".into()),
            bank: None,
            wallet: None,
            invoice_id: None,
            subscription_id: None,
            created_at: Some(Utc::now()),
        };
        self.state
            .lock()
            .unwrap()
            .payments
            .insert(id.to_string(), payment);
    }

    /// Attach a payment to a subscription the way a charge's invoice does.
    pub fn link_payment(&self, payment_id: &str, subscription_id: &str) {
        if let Some(payment) = self.state.lock().unwrap().payments.get_mut(payment_id) {
            payment.invoice_id = Some(format!("inv_{payment_id}"));
            payment.subscription_id = Some(subscription_id.to_string());
        }
    }

    pub fn set_remote_status(&self, id: &str, status: RemoteSubscriptionStatus) {
        if let Some(sub) = self.state.lock().unwrap().subscriptions.get_mut(id) {
            sub.status = status;
        }
    }

    pub fn set_remote_period(&self, id: &str, start: DateTime<Utc>, end: DateTime<Utc>) {
        if let Some(sub) = self.state.lock().unwrap().subscriptions.get_mut(id) {
            sub.current_start = Some(start);
            sub.current_end = Some(end);
        }
    }

    pub fn fail_subscription_creation(&self) {
        self.state.lock().unwrap().fail_create_subscription = true;
    }

    pub fn fail_cancellation(&self) {
        self.state.lock().unwrap().fail_cancel = true;
    }

    pub fn fail_subscription_fetch(&self) {
        self.state.lock().unwrap().fail_fetch_subscription = true;
    }

    pub fn reject_resume(&self) {
        self.state.lock().unwrap().reject_resume = true;
    }

    /// Answer resume calls with a raw client error the client did not classify.
    pub fn fail_resume(&self) {
        self.state.lock().unwrap().fail_resume = true;
    }

    pub fn customers_created(&self) -> usize {
        self.state.lock().unwrap().customers.len()
    }

    pub fn created_requests(&self) -> Vec<CreateSubscriptionRequest> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn cancel_calls(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().cancels.clone()
    }

    pub fn resume_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().resumes.clone()
    }

    fn unavailable() -> GatewayError {
        GatewayError::Api {
            status: 503,
            code: "SERVER_ERROR".into(),
            description: "scripted failure".into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_customer(
        &self,
        name: &str,
        email: &str,
    ) -> Result<GatewayCustomer, GatewayError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.customers.get(email) {
            return Ok(existing.clone());
        }
        state.next_id += 1;
        let customer = GatewayCustomer {
            id: format!("cust_mock_{}", state.next_id),
            name: Some(name.to_string()),
            email: Some(email.to_string()),
        };
        state.customers.insert(email.to_string(), customer.clone());
        Ok(customer)
    }

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<RemoteSubscription, GatewayError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create_subscription {
            return Err(Self::unavailable());
        }
        state.next_id += 1;
        let sub = RemoteSubscription {
            id: format!("sub_mock_{}", state.next_id),
            plan_id: request.plan_id.clone(),
            customer_id: Some(request.customer_id.clone()),
            status: RemoteSubscriptionStatus::Created,
            current_start: None,
            current_end: None,
            charge_at: None,
            paid_count: 0,
            total_count: Some(request.total_count),
        };
        state.created.push(request.clone());
        state.subscriptions.insert(sub.id.clone(), sub.clone());
        Ok(sub)
    }

    async fn fetch_subscription(&self, id: &str) -> Result<RemoteSubscription, GatewayError> {
        let state = self.state.lock().unwrap();
        if state.fail_fetch_subscription {
            return Err(Self::unavailable());
        }
        state
            .subscriptions
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::Api {
                status: 404,
                code: "BAD_REQUEST_ERROR".into(),
                description: "The id provided does not exist".into(),
            })
    }

    async fn fetch_payment(&self, id: &str) -> Result<RemotePayment, GatewayError> {
        self.state
            .lock()
            .unwrap()
            .payments
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::Api {
                status: 400,
                code: "BAD_REQUEST_ERROR".into(),
                description: "The id provided does not exist".into(),
            })
    }

    async fn cancel_subscription(
        &self,
        id: &str,
        cancel_at_cycle_end: bool,
    ) -> Result<RemoteSubscription, GatewayError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_cancel {
            return Err(Self::unavailable());
        }
        state.cancels.push((id.to_string(), cancel_at_cycle_end));
        let sub = state
            .subscriptions
            .get_mut(id)
            .ok_or(GatewayError::AlreadyCancelled)?;
        if sub.status == RemoteSubscriptionStatus::Cancelled {
            return Err(GatewayError::AlreadyCancelled);
        }
        if !cancel_at_cycle_end {
            sub.status = RemoteSubscriptionStatus::Cancelled;
        }
        Ok(sub.clone())
    }

    async fn update_subscription(
        &self,
        id: &str,
        patch: &SubscriptionPatch,
    ) -> Result<RemoteSubscription, GatewayError> {
        let mut state = self.state.lock().unwrap();
        if patch.resume {
            if state.reject_resume {
                return Err(GatewayError::Unsupported(
                    "subscription cannot be resumed".into(),
                ));
            }
            if state.fail_resume {
                return Err(GatewayError::Api {
                    status: 409,
                    code: "BAD_REQUEST_ERROR".into(),
                    description: "request conflicts with another in flight".into(),
                });
            }
            state.resumes.push(id.to_string());
        }
        let sub = state
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| GatewayError::Unsupported("unknown subscription".into()))?;
        if patch.resume {
            sub.status = RemoteSubscriptionStatus::Active;
        }
        Ok(sub.clone())
    }

    fn public_key(&self) -> &str {
        "rzp_test_key"
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn plan(plan_id: &str, period: BillingPeriod, amount: i64, order: i32) -> PlanConfiguration {
    PlanConfiguration {
        plan_id: plan_id.into(),
        name: format!("Focus {plan_id}"),
        tier: Tier::Pro,
        billing_period: period,
        amount,
        currency: "INR".into(),
        external_plan_id: format!("plan_{plan_id}"),
        is_active: true,
        available_until: None,
        display_order: order,
    }
}

pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        auth_jwt_secret: Some(JWT_SECRET.into()),
        razorpay_key_id: Some("rzp_test_key".into()),
        razorpay_key_secret: Some(KEY_SECRET.into()),
        razorpay_webhook_secret: Some(WEBHOOK_SECRET.into()),
        gateway_timeout: Duration::from_secs(5),
        ..ServiceConfig::default()
    }
}

/// Checkout signature for a payment.
pub fn payment_signature(payment_id: &str, subscription_id: &str) -> String {
    hmac_sha256_hex(KEY_SECRET, &format!("{payment_id}|{subscription_id}")).unwrap()
}

/// Webhook signature for a raw body.
pub fn webhook_signature(body: &str) -> String {
    hmac_sha256_hex(WEBHOOK_SECRET, body).unwrap()
}

/// A Razorpay-shaped webhook body.
pub fn webhook_body(
    event: &str,
    subscription_id: &str,
    status: &str,
    payment: Option<(&str, i64)>,
) -> String {
    let now = Utc::now().timestamp();
    let mut payload = json!({
        "subscription": {
            "entity": {
                "id": subscription_id,
                "plan_id": "plan_pro_monthly",
                "status": status,
                "current_start": now,
                "current_end": now + 30 * 86_400,
                "paid_count": 1
            }
        }
    });
    if let Some((payment_id, amount)) = payment {
        payload["payment"] = json!({
            "entity": {
                "id": payment_id,
                "amount": amount,
                "currency": "INR",
                "status": "captured",
                "method": "card",
                "created_at": now
            }
        });
    }
    json!({ "entity": "event", "event": event, "payload": payload, "created_at": now })
        .to_string()
}

// ============================================================================
// Harness
// ============================================================================

pub struct TestHarness {
    pub server: TestServer,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<MockGateway>,
    pub lifecycle: Arc<SubscriptionLifecycle>,
    pub webhooks: Arc<WebhookReconciler>,
    pub test_user_id: UserId,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: ServiceConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        store
            .put_plan(plan("pro_monthly", BillingPeriod::Monthly, MONTHLY_AMOUNT, 1))
            .await;
        store
            .put_plan(plan("pro_yearly", BillingPeriod::Yearly, YEARLY_AMOUNT, 2))
            .await;
        let mut retired = plan("pro_legacy", BillingPeriod::Monthly, 9_900, 3);
        retired.is_active = false;
        store.put_plan(retired).await;

        let gateway = Arc::new(MockGateway::new());
        let state = AppState::new(store.clone(), gateway.clone(), config);
        let lifecycle = state.lifecycle.clone();
        let webhooks = state.webhooks.clone();
        let server = TestServer::new(create_router(state)).expect("Failed to create test server");

        let harness = Self {
            server,
            store,
            gateway,
            lifecycle,
            webhooks,
            test_user_id: UserId::generate(),
        };
        harness.seed_user(harness.test_user_id).await;
        harness
    }

    pub async fn seed_user(&self, user_id: UserId) {
        let mut user = UserBilling::new(user_id, format!("{user_id}@example.com"));
        user.name = Some("Test User".into());
        self.store.put_user(&user).await.unwrap();
    }

    pub fn user_auth_header(&self) -> String {
        self.auth_header_for(&self.test_user_id)
    }

    pub fn auth_header_for(&self, user_id: &UserId) -> String {
        let claims = JwtClaims {
            sub: user_id.to_string(),
            exp: Utc::now().timestamp() + 3600,
            iat: Some(Utc::now().timestamp()),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .unwrap();
        format!("Bearer {token}")
    }

    pub async fn user(&self) -> UserBilling {
        self.store
            .get_user(&self.test_user_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.store
            .list_subscriptions_for_user(&self.test_user_id)
            .await
            .unwrap()
    }

    /// Rewrite the user's newest row in place.
    pub async fn edit_latest(&self, edit: impl FnOnce(&mut Subscription)) -> Subscription {
        let mut sub = self.subscriptions().await.remove(0);
        edit(&mut sub);
        self.store.overwrite_subscription(sub.clone()).await;
        sub
    }

    pub async fn status_of_latest(&self) -> SubscriptionStatus {
        self.subscriptions().await[0].status
    }
}
