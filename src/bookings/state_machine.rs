//! Booking status transitions
//!
//! Every mutation of a booking's status, payment status or checkout session goes
//! through [`apply`]. It is pure: it receives the current record and returns the
//! next one (or a no-op), and the repository persists the result with a
//! compare-and-set on `pending_payment` plus the session id the decision was
//! based on. Both confirmation sources (webhook, poll) call the same
//! [`Transition::PaymentSucceeded`], which is what makes them commutative.

use super::types::{Booking, BookingStatus, CancelActor, PaymentStatus, Price};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// A checkout session was opened (or replaced) for this booking.
    OpenCheckout {
        session_id: String,
        checkout_url: String,
        expires_at: DateTime<Utc>,
        preferred_currency: Option<String>,
    },
    /// Provider reports the money was captured.
    PaymentSucceeded {
        session_id: String,
        payment_reference: Option<String>,
        amount: Price,
    },
    PaymentFailed { session_id: String },
    SessionExpired { session_id: String },
    ConfirmWithoutPayment,
    Cancel {
        actor: CancelActor,
        reason: Option<String>,
    },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::OpenCheckout { .. } => "open_checkout",
            Transition::PaymentSucceeded { .. } => "payment_succeeded",
            Transition::PaymentFailed { .. } => "payment_failed",
            Transition::SessionExpired { .. } => "session_expired",
            Transition::ConfirmWithoutPayment => "confirm_without_payment",
            Transition::Cancel { .. } => "cancel",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The record changed; persist it.
    Applied(Booking),
    /// Nothing to do. The caller returns the stored record as-is.
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("cannot {transition} a booking in status {status} (payment {payment_status})")]
    InvalidState {
        transition: &'static str,
        status: BookingStatus,
        payment_status: PaymentStatus,
    },

    #[error("payment of {reported} does not match booking amount {expected}")]
    AmountMismatch { expected: Price, reported: Price },

    #[error("booking is not eligible: {0}")]
    NotEligible(String),
}

fn invalid(booking: &Booking, transition: &Transition) -> TransitionError {
    TransitionError::InvalidState {
        transition: transition.name(),
        status: booking.status,
        payment_status: booking.payment_status,
    }
}

fn confirm(booking: &Booking, status: BookingStatus, now: DateTime<Utc>) -> Booking {
    let mut next = booking.clone();
    next.status = status;
    next.confirmed_at = Some(booking.confirmed_at.unwrap_or(now));
    next.updated_at = now;
    next
}

/// Decide the effect of `transition` on `booking`.
pub fn apply(
    booking: &Booking,
    transition: &Transition,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, TransitionError> {
    match transition {
        Transition::OpenCheckout {
            session_id,
            checkout_url,
            expires_at,
            preferred_currency,
        } => {
            if booking.status != BookingStatus::PendingPayment
                || booking.payment_status == PaymentStatus::Succeeded
            {
                return Err(invalid(booking, transition));
            }
            let mut next = booking.clone();
            next.checkout_session_id = Some(session_id.clone());
            next.checkout_url = Some(checkout_url.clone());
            next.checkout_expires_at = Some(*expires_at);
            next.payment_status = PaymentStatus::CheckoutPending;
            if preferred_currency.is_some() {
                next.preferred_currency = preferred_currency.clone();
            }
            next.updated_at = now;
            Ok(TransitionOutcome::Applied(next))
        }

        Transition::PaymentSucceeded {
            payment_reference,
            amount,
            ..
        } => {
            if booking.status.is_terminal() {
                return Ok(TransitionOutcome::NoOp);
            }
            let expected = booking.price();
            if &expected != amount {
                return Err(TransitionError::AmountMismatch {
                    expected,
                    reported: amount.clone(),
                });
            }
            let mut next = confirm(booking, BookingStatus::Confirmed, now);
            next.payment_status = PaymentStatus::Succeeded;
            if payment_reference.is_some() {
                next.payment_reference = payment_reference.clone();
            }
            Ok(TransitionOutcome::Applied(next))
        }

        Transition::PaymentFailed { session_id } => {
            if booking.status.is_terminal()
                || booking.checkout_session_id.as_deref() != Some(session_id.as_str())
                || booking.payment_status == PaymentStatus::Failed
            {
                return Ok(TransitionOutcome::NoOp);
            }
            let mut next = booking.clone();
            next.payment_status = PaymentStatus::Failed;
            next.updated_at = now;
            Ok(TransitionOutcome::Applied(next))
        }

        Transition::SessionExpired { session_id } => {
            if booking.status.is_terminal()
                || booking.checkout_session_id.as_deref() != Some(session_id.as_str())
                || booking.payment_status == PaymentStatus::Succeeded
            {
                return Ok(TransitionOutcome::NoOp);
            }
            let mut next = booking.clone();
            next.payment_status = PaymentStatus::None;
            next.checkout_expires_at = Some(
                booking
                    .checkout_expires_at
                    .map(|at| at.min(now))
                    .unwrap_or(now),
            );
            next.updated_at = now;
            Ok(TransitionOutcome::Applied(next))
        }

        Transition::ConfirmWithoutPayment => {
            if booking.status.is_terminal() {
                return Ok(TransitionOutcome::NoOp);
            }
            if !booking.is_payment_free() {
                return Err(TransitionError::NotEligible(format!(
                    "booking charges {} and is not pay-at-property",
                    booking.price()
                )));
            }
            if booking.payment_status == PaymentStatus::Succeeded {
                return Err(invalid(booking, transition));
            }
            Ok(TransitionOutcome::Applied(confirm(
                booking,
                BookingStatus::ConfirmedWithoutPayment,
                now,
            )))
        }

        Transition::Cancel { actor, reason } => match booking.status {
            BookingStatus::Cancelled => Ok(TransitionOutcome::NoOp),
            BookingStatus::Confirmed | BookingStatus::ConfirmedWithoutPayment => {
                Err(invalid(booking, transition))
            }
            BookingStatus::PendingPayment => {
                // Captured money must go through the refund path.
                if booking.payment_status == PaymentStatus::Succeeded {
                    return Err(invalid(booking, transition));
                }
                let mut next = booking.clone();
                next.status = BookingStatus::Cancelled;
                next.cancelled_by = Some(*actor);
                next.cancellation_reason = reason.clone();
                next.updated_at = now;
                Ok(TransitionOutcome::Applied(next))
            }
        },
    }
}
