//! Builders for atomic subscription transitions.
//!
//! Each builder takes the row as currently stored and returns the
//! [`Transition`] that moves it to the next status, with the tier mirror,
//! payment, and audit entry that belong to the same write. The expected
//! status is always the row's current one, so a concurrent writer turns the
//! write into a [`focus_billing_store::TransitionOutcome::Conflict`].

use chrono::{DateTime, Utc};
use serde_json::json;

use focus_billing_core::{
    Actor, AuditAction, AuditLogEntry, BillingError, Payment, PaymentId, PaymentInstrument,
    PaymentStatus, Subscription, SubscriptionStatus, Tier, UserSubscriptionUpdate,
};
use focus_billing_store::Transition;

use crate::gateway::{RemotePayment, RemoteSubscription};

/// Statuses from which a first payment activates a row.
pub(crate) const ACTIVATABLE: [SubscriptionStatus; 3] = [
    SubscriptionStatus::Inactive,
    SubscriptionStatus::Incomplete,
    SubscriptionStatus::Trial,
];

fn ensure_transition(
    sub: &Subscription,
    to: SubscriptionStatus,
) -> Result<(), BillingError> {
    if sub.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(BillingError::InvalidTransition {
            from: sub.status,
            to,
        })
    }
}

/// Check a gateway payment against the subscription it should pay for.
///
/// Returns the local status to record.
pub(crate) fn check_payment(
    sub: &Subscription,
    payment: &RemotePayment,
) -> Result<PaymentStatus, BillingError> {
    let status = match payment.status.to_local() {
        Some(s @ (PaymentStatus::Captured | PaymentStatus::Authorized | PaymentStatus::Refunded)) => s,
        _ => {
            return Err(BillingError::PaymentNotSuccessful {
                status: payment.status.as_str().to_string(),
            })
        }
    };

    // Refunded authentication charges are smaller than the plan price.
    let authentication_charge =
        status == PaymentStatus::Refunded && payment.amount < sub.plan_amount;
    if payment.amount != sub.plan_amount && !authentication_charge {
        return Err(BillingError::AmountMismatch {
            expected: sub.plan_amount,
            actual: payment.amount,
        });
    }

    if !payment.currency.eq_ignore_ascii_case(&sub.currency) {
        return Err(BillingError::CurrencyMismatch {
            expected: sub.currency.clone(),
            actual: payment.currency.clone(),
        });
    }

    Ok(status)
}

/// Check that a payment was made for `external_subscription_id`.
///
/// A signed checkout already binds the two ids. Without a signature the
/// gateway's own linkage must name the subscription.
pub(crate) fn check_payment_link(
    payment: &RemotePayment,
    external_subscription_id: &str,
    signed: bool,
) -> Result<(), BillingError> {
    match payment.subscription_id.as_deref() {
        Some(linked) if linked == external_subscription_id => Ok(()),
        None if signed => Ok(()),
        linked => Err(BillingError::PaymentSubscriptionMismatch {
            payment_id: payment.id.clone(),
            linked_subscription_id: linked.map(str::to_string),
        }),
    }
}

/// Build the payment row for a checked gateway payment.
pub(crate) fn payment_row(
    sub: &Subscription,
    remote: &RemotePayment,
    status: PaymentStatus,
    now: DateTime<Utc>,
) -> Payment {
    let paid_at = remote.created_at.unwrap_or(now);
    Payment {
        id: PaymentId::generate(),
        user_id: sub.user_id,
        subscription_id: sub.id,
        external_payment_id: remote.id.clone(),
        external_order_id: remote.order_id.clone(),
        amount: remote.amount,
        currency: remote.currency.to_ascii_uppercase(),
        status,
        method: remote.method.clone(),
        instrument: PaymentInstrument {
            card_network: remote.card_network.clone(),
            card_last4: remote.card_last4.clone(),
            bank: remote.bank.clone(),
            wallet: remote.wallet.clone(),
        },
        captured_at: matches!(status, PaymentStatus::Captured | PaymentStatus::Refunded)
            .then_some(paid_at),
        refunded_at: (status == PaymentStatus::Refunded).then_some(now),
        created_at: now,
    }
}

fn mirror(sub: &Subscription, now: DateTime<Utc>, end_date: DateTime<Utc>) -> UserSubscriptionUpdate {
    UserSubscriptionUpdate {
        tier: sub.entitled_tier(now),
        status: sub.status,
        start_date: Some(sub.current_period_start),
        end_date: Some(end_date),
    }
}

/// Take the gateway's period bounds when it reports both.
fn refresh_period(next: &mut Subscription, remote: Option<&RemoteSubscription>) {
    if let Some((start, end)) = remote.and_then(|r| r.current_start.zip(r.current_end)) {
        next.current_period_start = start;
        next.current_period_end = end;
    }
}

fn next_charge(next: &Subscription, remote: Option<&RemoteSubscription>) -> Option<DateTime<Utc>> {
    remote
        .and_then(|r| r.charge_at)
        .or(Some(next.current_period_end))
}

fn entry(sub: &Subscription, action: AuditAction, actor: Actor, now: DateTime<Utc>) -> AuditLogEntry {
    AuditLogEntry::new(sub.user_id, action)
        .by(actor)
        .subscription(sub.id)
        .at(now)
}

/// First successful payment.
pub(crate) fn activation(
    sub: &Subscription,
    payment: Payment,
    remote: Option<&RemoteSubscription>,
    actor: Actor,
    now: DateTime<Utc>,
) -> Result<Transition, BillingError> {
    ensure_transition(sub, SubscriptionStatus::Active)?;

    let mut next = sub.clone();
    next.status = SubscriptionStatus::Active;
    next.activated_at = Some(sub.activated_at.unwrap_or(now));
    next.last_payment_date = Some(now);
    next.total_billing_cycles += 1;
    if payment.counts_toward_total() {
        next.total_amount_paid += payment.amount;
    }
    next.auto_renew = true;
    refresh_period(&mut next, remote);
    next.next_billing_date = next_charge(&next, remote);
    next.updated_at = now;

    let audit = entry(sub, AuditAction::PaymentSucceeded, actor, now)
        .payment(payment.id)
        .states(Some(sub.status), Some(SubscriptionStatus::Active))
        .metadata(json!({
            "external_payment_id": payment.external_payment_id,
            "amount": payment.amount,
            "currency": payment.currency,
            "payment_status": payment.status.as_str(),
        }));

    Ok(Transition {
        user: Some(mirror(&next, now, next.current_period_end)),
        expected_status: sub.status,
        subscription: next,
        payment: Some(payment),
        audit: Some(audit),
    })
}

/// Check a gateway payment and build the activation it pays for.
pub(crate) fn activation_for_payment(
    sub: &Subscription,
    remote_payment: &RemotePayment,
    remote: Option<&RemoteSubscription>,
    actor: Actor,
    now: DateTime<Utc>,
) -> Result<Transition, BillingError> {
    let status = check_payment(sub, remote_payment)?;
    let payment = payment_row(sub, remote_payment, status, now);
    activation(sub, payment, remote, actor, now)
}

/// A renewal charge on an ACTIVE row.
pub(crate) fn renewal(
    sub: &Subscription,
    payment: Payment,
    remote: Option<&RemoteSubscription>,
    now: DateTime<Utc>,
) -> Result<Transition, BillingError> {
    if sub.status != SubscriptionStatus::Active {
        return Err(BillingError::InvalidTransition {
            from: sub.status,
            to: SubscriptionStatus::Active,
        });
    }

    let mut next = sub.clone();
    next.last_payment_date = Some(now);
    next.total_billing_cycles += 1;
    if payment.counts_toward_total() {
        next.total_amount_paid += payment.amount;
    }

    let remote_period = remote.and_then(|r| r.current_start.zip(r.current_end));
    match remote_period {
        Some((start, end)) if end > sub.current_period_end => {
            next.current_period_start = start;
            next.current_period_end = end;
        }
        _ => {
            next.current_period_start = sub.current_period_end;
            next.current_period_end = sub.billing_cycle.period_end(sub.current_period_end);
        }
    }
    next.next_billing_date = remote
        .and_then(|r| r.charge_at)
        .filter(|at| *at > sub.current_period_end)
        .or(Some(next.current_period_end));
    next.updated_at = now;

    let audit = entry(sub, AuditAction::Renewed, Actor::System, now)
        .payment(payment.id)
        .states(Some(sub.status), Some(SubscriptionStatus::Active))
        .metadata(json!({
            "external_payment_id": payment.external_payment_id,
            "amount": payment.amount,
            "billing_cycle": next.total_billing_cycles,
        }));

    Ok(Transition {
        user: Some(mirror(&next, now, next.current_period_end)),
        expected_status: sub.status,
        subscription: next,
        payment: Some(payment),
        audit: Some(audit),
    })
}

/// End of access.
pub(crate) fn expiry(
    sub: &Subscription,
    actor: Actor,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Transition, BillingError> {
    ensure_transition(sub, SubscriptionStatus::Expired)?;

    let mut next = sub.clone();
    next.status = SubscriptionStatus::Expired;
    next.auto_renew = false;
    next.next_billing_date = None;
    next.updated_at = now;

    let audit = entry(sub, AuditAction::Expired, actor, now)
        .states(Some(sub.status), Some(SubscriptionStatus::Expired))
        .reason(reason)
        .metadata(json!({ "period_end": sub.current_period_end }));

    Ok(Transition {
        user: Some(UserSubscriptionUpdate {
            tier: Tier::Free,
            status: SubscriptionStatus::Expired,
            start_date: Some(next.current_period_start),
            end_date: Some(next.current_period_end.min(now)),
        }),
        expected_status: sub.status,
        subscription: next,
        payment: None,
        audit: Some(audit),
    })
}

/// When a cancellation stops granting access.
pub(crate) fn access_until(
    sub: &Subscription,
    cancel_at_period_end: bool,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    if cancel_at_period_end {
        sub.current_period_end
    } else {
        now
    }
}

/// Cancellation, immediate or at period end.
pub(crate) fn cancellation(
    sub: &Subscription,
    cancel_at_period_end: bool,
    reason: Option<String>,
    actor: Actor,
    now: DateTime<Utc>,
) -> Result<Transition, BillingError> {
    ensure_transition(sub, SubscriptionStatus::Cancelled)?;

    let access_until = access_until(sub, cancel_at_period_end, now);
    let mut next = sub.clone();
    next.status = SubscriptionStatus::Cancelled;
    next.cancel_at_period_end = cancel_at_period_end;
    next.cancelled_at = Some(now);
    next.cancel_reason = reason.clone();
    next.auto_renew = false;
    next.next_billing_date = None;
    next.updated_at = now;

    let mut audit = entry(sub, AuditAction::Cancelled, actor, now)
        .states(Some(sub.status), Some(SubscriptionStatus::Cancelled))
        .metadata(json!({
            "cancel_at_period_end": cancel_at_period_end,
            "access_until": access_until,
        }));
    if let Some(reason) = reason {
        audit = audit.reason(reason);
    }

    Ok(Transition {
        user: Some(mirror(&next, now, access_until)),
        expected_status: sub.status,
        subscription: next,
        payment: None,
        audit: Some(audit),
    })
}

/// The gateway gave up collecting a charge.
pub(crate) fn halt(sub: &Subscription, now: DateTime<Utc>) -> Result<Transition, BillingError> {
    ensure_transition(sub, SubscriptionStatus::Incomplete)?;

    let mut next = sub.clone();
    next.status = SubscriptionStatus::Incomplete;
    next.updated_at = now;

    let audit = entry(sub, AuditAction::PaymentFailed, Actor::System, now)
        .states(Some(sub.status), Some(SubscriptionStatus::Incomplete))
        .reason("gateway halted the subscription");

    Ok(Transition {
        user: Some(UserSubscriptionUpdate {
            tier: Tier::Free,
            status: SubscriptionStatus::Incomplete,
            start_date: Some(next.current_period_start),
            end_date: Some(now),
        }),
        expected_status: sub.status,
        subscription: next,
        payment: None,
        audit: Some(audit),
    })
}

/// Undo a cancellation scheduled for period end.
pub(crate) fn resumption(
    sub: &Subscription,
    remote: Option<&RemoteSubscription>,
    now: DateTime<Utc>,
) -> Result<Transition, BillingError> {
    ensure_transition(sub, SubscriptionStatus::Active)?;

    let mut next = sub.clone();
    next.status = SubscriptionStatus::Active;
    next.cancel_at_period_end = false;
    next.cancelled_at = None;
    next.cancel_reason = None;
    next.auto_renew = true;
    refresh_period(&mut next, remote);
    next.next_billing_date = next_charge(&next, remote);
    next.updated_at = now;

    let audit = entry(sub, AuditAction::Resumed, Actor::User, now)
        .states(Some(sub.status), Some(SubscriptionStatus::Active));

    Ok(Transition {
        user: Some(mirror(&next, now, next.current_period_end)),
        expected_status: sub.status,
        subscription: next,
        payment: None,
        audit: Some(audit),
    })
}

/// Overwrite the local status with the gateway's.
///
/// Returns `None` when there is nothing to change or the change is not one
/// the gateway can make on its own: expired rows stay expired, and an unpaid
/// row is only ever activated by a payment.
pub(crate) fn remote_sync(
    sub: &Subscription,
    remote: &RemoteSubscription,
    now: DateTime<Utc>,
) -> Option<Transition> {
    let target = remote.status.to_local()?;
    // The gateway keeps a cycle-end cancellation active until the cycle ends.
    let pending_cancellation = sub.status == SubscriptionStatus::Cancelled
        && sub.cancel_at_period_end
        && target == SubscriptionStatus::Active;
    if target == sub.status
        || pending_cancellation
        || sub.status == SubscriptionStatus::Expired
        || (sub.status == SubscriptionStatus::Inactive && target == SubscriptionStatus::Active)
        || !sub.status.can_transition_to(target)
    {
        return None;
    }

    let mut next = sub.clone();
    next.status = target;
    refresh_period(&mut next, Some(remote));
    match target {
        SubscriptionStatus::Active => {
            next.cancel_at_period_end = false;
            next.cancelled_at = None;
            next.cancel_reason = None;
            next.auto_renew = true;
            next.next_billing_date = next_charge(&next, Some(remote));
        }
        SubscriptionStatus::Cancelled => {
            next.cancelled_at = Some(sub.cancelled_at.unwrap_or(now));
            next.auto_renew = false;
            next.next_billing_date = None;
        }
        SubscriptionStatus::Expired => {
            next.auto_renew = false;
            next.next_billing_date = None;
        }
        _ => {}
    }
    next.updated_at = now;

    let end_date = if next.grants_access(now) {
        next.current_period_end
    } else {
        next.current_period_end.min(now)
    };
    let audit = entry(sub, AuditAction::StatusSynced, Actor::System, now)
        .states(Some(sub.status), Some(target))
        .metadata(json!({
            "external_subscription_id": remote.id,
            "remote_status": remote.status,
        }));

    Some(Transition {
        user: Some(mirror(&next, now, end_date)),
        expected_status: sub.status,
        subscription: next,
        payment: None,
        audit: Some(audit),
    })
}
