//! API handlers.

pub mod health;
pub mod plans;
pub mod subscriptions;
pub mod webhooks;
