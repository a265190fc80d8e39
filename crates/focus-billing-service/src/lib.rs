//! Subscription lifecycle service for focus-billing.
//!
//! This crate holds the gateway-facing half of billing:
//!
//! - [`SubscriptionLifecycle`]: create, verify, status, cancel and resume
//! - [`WebhookReconciler`]: applies Razorpay subscription events
//! - [`RazorpayClient`]: the [`gateway::PaymentGateway`] used in production
//! - the axum router exposing all of the above over HTTP
//!
//! # Authentication
//!
//! User endpoints take an HS256 JWT whose `sub` is the user id. Webhooks are
//! authenticated by their HMAC signature.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)]

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod lifecycle;
pub mod routes;
pub mod state;
pub mod webhooks;

pub use config::{LifecycleConfig, ServiceConfig};
pub use error::ApiError;
pub use gateway::{PaymentGateway, RazorpayClient};
pub use lifecycle::SubscriptionLifecycle;
pub use routes::create_router;
pub use state::AppState;
pub use webhooks::{WebhookOutcome, WebhookReconciler};
