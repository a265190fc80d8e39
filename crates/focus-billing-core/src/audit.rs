//! Subscription audit log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::ids::{AuditLogId, PaymentId, SubscriptionId, UserId};
use crate::subscription::SubscriptionStatus;

/// Actor id recorded for system-initiated transitions.
pub const SYSTEM_ACTOR_ID: &str = "system";

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// Subscription created locally and at the gateway.
    Created,
    /// First payment verified and subscription activated.
    PaymentSucceeded,
    /// Renewal charge recorded.
    Renewed,
    /// Signature check failed; possible tampering.
    SignatureInvalid,
    /// Subscription cancelled.
    Cancelled,
    /// Cancelled subscription reactivated.
    Resumed,
    /// Subscription period ran out.
    Expired,
    /// Gateway could not collect a charge.
    PaymentFailed,
    /// Local status overwritten from the gateway's view.
    StatusSynced,
    /// Remote mutation succeeded but the local write failed.
    DivergenceDetected,
}

impl AuditAction {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::PaymentSucceeded => "PAYMENT_SUCCEEDED",
            Self::Renewed => "RENEWED",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::Cancelled => "CANCELLED",
            Self::Resumed => "RESUMED",
            Self::Expired => "EXPIRED",
            Self::PaymentFailed => "PAYMENT_FAILED",
            Self::StatusSynced => "STATUS_SYNCED",
            Self::DivergenceDetected => "DIVERGENCE_DETECTED",
        }
    }
}

impl std::str::FromStr for AuditAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "PAYMENT_SUCCEEDED" => Ok(Self::PaymentSucceeded),
            "RENEWED" => Ok(Self::Renewed),
            "SIGNATURE_INVALID" => Ok(Self::SignatureInvalid),
            "CANCELLED" => Ok(Self::Cancelled),
            "RESUMED" => Ok(Self::Resumed),
            "EXPIRED" => Ok(Self::Expired),
            "PAYMENT_FAILED" => Ok(Self::PaymentFailed),
            "STATUS_SYNCED" => Ok(Self::StatusSynced),
            "DIVERGENCE_DETECTED" => Ok(Self::DivergenceDetected),
            other => Err(ParseEnumError::new("audit action", other)),
        }
    }
}

/// Who caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Actor {
    /// The subscribing user.
    User,
    /// Webhooks, the synchronizer, and other automated paths.
    System,
}

impl Actor {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::System => "SYSTEM",
        }
    }
}

impl std::str::FromStr for Actor {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Self::User),
            "SYSTEM" => Ok(Self::System),
            other => Err(ParseEnumError::new("actor", other)),
        }
    }
}

/// An immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Time-ordered identifier.
    pub id: AuditLogId,
    /// Affected user.
    pub user_id: UserId,
    /// Affected subscription, when known.
    pub subscription_id: Option<SubscriptionId>,
    /// Related payment, when one was recorded.
    pub payment_id: Option<PaymentId>,
    /// What happened.
    pub action: AuditAction,
    /// Who caused it.
    pub actor: Actor,
    /// User id for user actors, [`SYSTEM_ACTOR_ID`] otherwise.
    pub actor_id: String,
    /// Status before the change.
    pub previous_state: Option<SubscriptionStatus>,
    /// Status after the change.
    pub new_state: Option<SubscriptionStatus>,
    /// Free-form reason.
    pub reason: Option<String>,
    /// Structured context (gateway ids, amounts, event names).
    pub metadata: serde_json::Value,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Start an entry for `user_id`. The actor defaults to the user.
    #[must_use]
    pub fn new(user_id: UserId, action: AuditAction) -> Self {
        Self {
            id: AuditLogId::generate(),
            user_id,
            subscription_id: None,
            payment_id: None,
            action,
            actor: Actor::User,
            actor_id: user_id.to_string(),
            previous_state: None,
            new_state: None,
            reason: None,
            metadata: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Attribute the entry to the system.
    #[must_use]
    pub fn by_system(mut self) -> Self {
        self.actor = Actor::System;
        self.actor_id = SYSTEM_ACTOR_ID.to_string();
        self
    }

    /// Attribute the entry to `actor`.
    #[must_use]
    pub fn by(self, actor: Actor) -> Self {
        match actor {
            Actor::System => self.by_system(),
            Actor::User => {
                let user_id = self.user_id.to_string();
                Self {
                    actor: Actor::User,
                    actor_id: user_id,
                    ..self
                }
            }
        }
    }

    /// Set the affected subscription.
    #[must_use]
    pub fn subscription(mut self, subscription_id: SubscriptionId) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    /// Set the related payment.
    #[must_use]
    pub fn payment(mut self, payment_id: PaymentId) -> Self {
        self.payment_id = Some(payment_id);
        self
    }

    /// Record the status change.
    #[must_use]
    pub fn states(
        mut self,
        previous: Option<SubscriptionStatus>,
        new: Option<SubscriptionStatus>,
    ) -> Self {
        self.previous_state = previous;
        self.new_state = new;
        self
    }

    /// Set the reason.
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set structured metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entries_default_to_the_user_as_actor() {
        let user_id = UserId::generate();
        let entry = AuditLogEntry::new(user_id, AuditAction::Cancelled);
        assert_eq!(entry.actor, Actor::User);
        assert_eq!(entry.actor_id, user_id.to_string());
    }

    #[test]
    fn system_entries_use_the_system_actor_id() {
        let entry = AuditLogEntry::new(UserId::generate(), AuditAction::Expired).by_system();
        assert_eq!(entry.actor, Actor::System);
        assert_eq!(entry.actor_id, SYSTEM_ACTOR_ID);
    }

    #[test]
    fn action_names_are_stable() {
        assert_eq!(AuditAction::PaymentSucceeded.as_str(), "PAYMENT_SUCCEEDED");
        assert_eq!(
            "PAYMENT_SUCCEEDED".parse::<AuditAction>().unwrap(),
            AuditAction::PaymentSucceeded
        );
        let json = serde_json::to_string(&AuditAction::DivergenceDetected).unwrap();
        assert_eq!(json, "\"DIVERGENCE_DETECTED\"");
    }
}
