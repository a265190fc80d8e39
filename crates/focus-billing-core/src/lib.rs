//! Core types for focus-billing.
//!
//! This crate provides the types shared by the store and the service:
//!
//! - **Identifiers**: `UserId`, `SubscriptionId`, `PaymentId`, `AuditLogId`
//! - **Catalog**: `PlanConfiguration`, `Tier`, `BillingPeriod`
//! - **Subscriptions**: `Subscription`, `SubscriptionStatus` and its state machine
//! - **Payments**: `Payment`, `PaymentStatus`
//! - **Audit**: `AuditLogEntry`, `AuditAction`, `Actor`
//! - **Users**: `UserBilling`, the billing fields owned on the user record
//!
//! # Money
//!
//! All amounts are `i64` minor units of the plan currency (paise for INR,
//! cents for USD). Floating point never touches a price.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod error;
pub mod ids;
pub mod payment;
pub mod plan;
pub mod subscription;
pub mod user;

pub use audit::{Actor, AuditAction, AuditLogEntry, SYSTEM_ACTOR_ID};
pub use error::{BillingError, ErrorKind, ParseEnumError, Result};
pub use ids::{AuditLogId, IdError, PaymentId, SubscriptionId, UserId};
pub use payment::{Payment, PaymentInstrument, PaymentStatus};
pub use plan::{BillingPeriod, PlanConfiguration, Tier, MONTHLY_TOTAL_CYCLES, YEARLY_TOTAL_CYCLES};
pub use subscription::{Subscription, SubscriptionSource, SubscriptionStatus};
pub use user::{UserBilling, UserSubscriptionUpdate};
