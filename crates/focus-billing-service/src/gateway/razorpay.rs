//! Razorpay API client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};

use super::types::{
    CancelSubscriptionBody, CreateCustomerBody, CreateSubscriptionBody, Customer, ErrorResponse,
    Invoice, Payment, ResumeSubscriptionBody, Subscription, UpdateSubscriptionBody,
};
use super::{
    CreateSubscriptionRequest, GatewayCustomer, GatewayError, PaymentGateway, RemotePayment,
    RemoteSubscription, SubscriptionPatch,
};

/// HTTP client timeout for Razorpay requests.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Razorpay API client.
#[derive(Debug, Clone)]
pub struct RazorpayClient {
    client: Client,
    key_id: String,
    key_secret: String,
    base_url: String,
}

impl RazorpayClient {
    /// Razorpay API base URL.
    pub const BASE_URL: &'static str = "https://api.razorpay.com/v1";

    /// Create a new Razorpay client.
    ///
    /// # Arguments
    ///
    /// * `key_id` - Razorpay key id (`rzp_test_...` or `rzp_live_...`)
    /// * `key_secret` - Razorpay key secret
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` if a key is empty and
    /// `GatewayError::Http` if the HTTP client cannot be built.
    pub fn new(
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let key_id = key_id.into();
        let key_secret = key_secret.into();
        if key_id.is_empty() || key_secret.is_empty() {
            return Err(GatewayError::Configuration(
                "Razorpay key id and key secret are required".into(),
            ));
        }

        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;

        Ok(Self {
            client,
            key_id,
            key_secret,
            base_url: Self::BASE_URL.to_string(),
        })
    }

    /// Point the client at a different API root (used by tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
    }

    fn patch(&self, path: &str) -> RequestBuilder {
        self.client
            .patch(format!("{}{path}", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
    }

    /// Handle a Razorpay API response, parsing success or error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            return Ok(serde_json::from_str(&body)?);
        }

        // Try to parse error response
        let error_body: Result<ErrorResponse, _> = response.json().await;

        match error_body {
            Ok(razorpay_error) => Err(GatewayError::Api {
                status: status.as_u16(),
                code: razorpay_error.error.code,
                description: razorpay_error.error.description,
            }),
            Err(_) => Err(GatewayError::Api {
                status: status.as_u16(),
                code: "unknown".to_string(),
                description: format!("HTTP {status}"),
            }),
        }
    }
}

/// Razorpay answers a cancel on an already-cancelled subscription with a
/// 400 whose description names the current status.
fn is_already_cancelled(err: &GatewayError) -> bool {
    match err {
        GatewayError::Api {
            status,
            description,
            ..
        } if *status == StatusCode::BAD_REQUEST.as_u16() => {
            let description = description.to_ascii_lowercase();
            description.contains("not cancellable in cancelled status")
                || description.contains("not cancellable in completed status")
                || description.contains("already cancelled")
        }
        _ => false,
    }
}

/// Client-side rejections of a resume mean the subscription cannot be
/// resumed in its current state.
fn is_resume_rejected(err: &GatewayError) -> bool {
    matches!(err, GatewayError::Api { status, .. } if (400..500).contains(status))
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    async fn create_customer(
        &self,
        name: &str,
        email: &str,
    ) -> Result<GatewayCustomer, GatewayError> {
        let body = CreateCustomerBody {
            name,
            email,
            fail_existing: "0",
        };
        let response = self.post("/customers").json(&body).send().await?;
        let customer: Customer = Self::handle_response(response).await?;
        Ok(customer.into())
    }

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<RemoteSubscription, GatewayError> {
        let body = CreateSubscriptionBody {
            plan_id: &request.plan_id,
            customer_id: &request.customer_id,
            total_count: request.total_count,
            quantity: request.quantity,
            customer_notify: 1,
            start_at: request.start_at.map(|t| t.timestamp()),
            expire_by: request.expire_by.map(|t| t.timestamp()),
            notes: &request.notes,
        };

        tracing::debug!(
            plan_id = %request.plan_id,
            customer_id = %request.customer_id,
            total_count = request.total_count,
            "Creating Razorpay subscription"
        );

        let response = self.post("/subscriptions").json(&body).send().await?;
        let subscription: Subscription = Self::handle_response(response).await?;
        Ok(subscription.into())
    }

    async fn fetch_subscription(&self, id: &str) -> Result<RemoteSubscription, GatewayError> {
        let response = self.get(&format!("/subscriptions/{id}")).send().await?;
        let subscription: Subscription = Self::handle_response(response).await?;
        Ok(subscription.into())
    }

    async fn fetch_payment(&self, id: &str) -> Result<RemotePayment, GatewayError> {
        let response = self
            .get(&format!("/payments/{id}"))
            .query(&[("expand[]", "card")])
            .send()
            .await?;
        let payment: Payment = Self::handle_response(response).await?;
        let mut payment = RemotePayment::from(payment);

        // Subscription charges carry their subscription on the invoice.
        if let Some(invoice_id) = &payment.invoice_id {
            let response = self.get(&format!("/invoices/{invoice_id}")).send().await?;
            let invoice: Invoice = Self::handle_response(response).await?;
            payment.subscription_id = invoice.subscription_id;
        }

        Ok(payment)
    }

    async fn cancel_subscription(
        &self,
        id: &str,
        cancel_at_cycle_end: bool,
    ) -> Result<RemoteSubscription, GatewayError> {
        let body = CancelSubscriptionBody {
            cancel_at_cycle_end: u8::from(cancel_at_cycle_end),
        };
        let response = self
            .post(&format!("/subscriptions/{id}/cancel"))
            .json(&body)
            .send()
            .await?;

        match Self::handle_response::<Subscription>(response).await {
            Ok(subscription) => Ok(subscription.into()),
            Err(e) if is_already_cancelled(&e) => Err(GatewayError::AlreadyCancelled),
            Err(e) => Err(e),
        }
    }

    async fn update_subscription(
        &self,
        id: &str,
        patch: &SubscriptionPatch,
    ) -> Result<RemoteSubscription, GatewayError> {
        let mut latest = None;

        if patch.resume {
            let response = self
                .post(&format!("/subscriptions/{id}/resume"))
                .json(&ResumeSubscriptionBody { resume_at: "now" })
                .send()
                .await?;
            match Self::handle_response::<Subscription>(response).await {
                Ok(subscription) => latest = Some(subscription),
                Err(e) if is_resume_rejected(&e) => {
                    return Err(GatewayError::Unsupported(e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        if patch.has_field_changes() {
            let body = UpdateSubscriptionBody {
                plan_id: patch.plan_id.as_deref(),
                quantity: patch.quantity,
                remaining_count: patch.remaining_count,
                schedule_change_at: "now",
            };
            let response = self
                .patch(&format!("/subscriptions/{id}"))
                .json(&body)
                .send()
                .await?;
            latest = Some(Self::handle_response(response).await?);
        }

        match latest {
            Some(subscription) => Ok(subscription.into()),
            None => self.fetch_subscription(id).await,
        }
    }

    fn public_key(&self) -> &str {
        &self.key_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_keys_are_rejected() {
        let err = RazorpayClient::new("", "secret").unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn already_cancelled_is_classified() {
        let err = GatewayError::Api {
            status: 400,
            code: "BAD_REQUEST_ERROR".into(),
            description: "Subscription is not cancellable in cancelled status.".into(),
        };
        assert!(is_already_cancelled(&err));

        let other = GatewayError::Api {
            status: 400,
            code: "BAD_REQUEST_ERROR".into(),
            description: "The id provided does not exist".into(),
        };
        assert!(!is_already_cancelled(&other));
    }

    #[test]
    fn server_errors_are_not_resume_rejections() {
        let err = GatewayError::Api {
            status: 502,
            code: "SERVER_ERROR".into(),
            description: "bad gateway".into(),
        };
        assert!(!is_resume_rejected(&err));
    }
}
