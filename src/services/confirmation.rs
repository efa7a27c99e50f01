//! Payment confirmation from webhooks and status polls
//!
//! Both sources end in [`ConfirmationReconciler::apply_session`], which maps
//! the provider's session view to one guarded transition. Arrival order does
//! not matter and duplicates are no-ops.

use super::booking_store::{Applied, BookingError, BookingStore};
use crate::bookings::state_machine::Transition;
use crate::bookings::types::{Booking, BookingStage, BookingStatus, PaymentStatus, Price};
use crate::error::{AppError, AppErrorKind, IntegrityError};
use crate::payments::types::{CheckoutEventKind, CheckoutSession, SessionState};
use crate::payments::{CheckoutProvider, PaymentError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationSource {
    Webhook,
    Poll,
    Worker,
}

impl ConfirmationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationSource::Webhook => "webhook",
            ConfirmationSource::Poll => "poll",
            ConfirmationSource::Worker => "worker",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConfirmationError {
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("missing required identifier: {0}")]
    MissingIdentifier(String),

    #[error("session {session_id} belongs to booking {session_booking}, not {booking_id}")]
    BookingMismatch {
        session_id: String,
        booking_id: Uuid,
        session_booking: Uuid,
    },

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Provider(#[from] PaymentError),
}

impl ConfirmationError {
    /// Rejected outright; never retried by the provider usefully.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            ConfirmationError::InvalidSignature(_)
                | ConfirmationError::MissingIdentifier(_)
                | ConfirmationError::BookingMismatch { .. }
                | ConfirmationError::Booking(BookingError::AmountMismatch { .. })
        )
    }
}

impl From<ConfirmationError> for AppError {
    fn from(err: ConfirmationError) -> Self {
        match err {
            ConfirmationError::InvalidSignature(reason) => {
                AppError::new(AppErrorKind::Integrity(IntegrityError::InvalidSignature { reason }))
            }
            ConfirmationError::MissingIdentifier(field) => {
                AppError::new(AppErrorKind::Integrity(IntegrityError::MissingIdentifier { field }))
            }
            ConfirmationError::BookingMismatch { .. } => {
                AppError::new(AppErrorKind::Integrity(IntegrityError::MissingIdentifier {
                    field: "metadata.booking_id".to_string(),
                }))
                .with_context(err.to_string())
            }
            ConfirmationError::Booking(e) => e.into(),
            ConfirmationError::Provider(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied { booking_id: Uuid, status: BookingStatus },
    /// Already reflected in the booking (redelivery, or the poll got there first)
    Duplicate { booking_id: Uuid },
    Ignored { reason: String },
}

/// What the status endpoint returns. `stage` is derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingStatusView {
    pub booking_id: Uuid,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub stage: BookingStage,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub amount: Price,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

impl From<&Booking> for BookingStatusView {
    fn from(booking: &Booking) -> Self {
        Self {
            booking_id: booking.id,
            status: booking.status,
            payment_status: booking.payment_status,
            stage: booking.stage(),
            confirmed_at: booking.confirmed_at,
            amount: booking.price(),
            checkout_url: if booking.has_open_session(Utc::now()) {
                booking.checkout_url.clone()
            } else {
                None
            },
        }
    }
}

pub struct ConfirmationReconciler {
    store: BookingStore,
    provider: Arc<dyn CheckoutProvider>,
}

impl ConfirmationReconciler {
    pub fn new(store: BookingStore, provider: Arc<dyn CheckoutProvider>) -> Self {
        Self { store, provider }
    }

    /// Webhook entry point. `payload` must be the raw request body.
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ConfirmationError> {
        let signature = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfirmationError::InvalidSignature("missing signature header".to_string()))?;

        let verification = self.provider.verify_webhook(payload, signature)?;
        if !verification.valid {
            let reason = verification
                .reason
                .unwrap_or_else(|| "signature mismatch".to_string());
            error!(provider = %self.provider.name(), reason = %reason, "rejected webhook with invalid signature");
            return Err(ConfirmationError::InvalidSignature(reason));
        }

        let event = self.provider.parse_webhook_event(payload)?;
        match event.kind {
            CheckoutEventKind::Ignored | CheckoutEventKind::PaymentPending => {
                info!(event_id = %event.event_id, event_type = %event.event_type, "webhook event ignored");
                return Ok(WebhookOutcome::Ignored {
                    reason: format!("event type {}", event.event_type),
                });
            }
            _ => {}
        }

        let session = event.session.ok_or_else(|| {
            error!(event_id = %event.event_id, "webhook event without checkout session");
            ConfirmationError::MissingIdentifier("data.object".to_string())
        })?;

        let Some(booking) = self.locate_booking(&session).await? else {
            warn!(
                event_id = %event.event_id,
                session_id = %session.session_id,
                "webhook for unknown checkout session"
            );
            return Ok(WebhookOutcome::Ignored {
                reason: "unknown checkout session".to_string(),
            });
        };

        let applied = self
            .apply_event(&booking, &session, event.kind, ConfirmationSource::Webhook)
            .await?;

        Ok(match applied {
            Some(Applied::Changed(b)) => WebhookOutcome::Applied {
                booking_id: b.id,
                status: b.status,
            },
            Some(Applied::Unchanged(b)) => WebhookOutcome::Duplicate { booking_id: b.id },
            None => WebhookOutcome::Ignored {
                reason: "no transition for event".to_string(),
            },
        })
    }

    /// Poll entry point: the stored state, caught up with the provider when
    /// a payment may be in flight. Provider outages fall back to the stored
    /// state rather than failing the poll.
    pub async fn refresh_status(
        &self,
        booking_id: Uuid,
    ) -> Result<BookingStatusView, ConfirmationError> {
        let booking = self
            .reconcile(booking_id, ConfirmationSource::Poll)
            .await?;
        Ok(BookingStatusView::from(&booking))
    }

    /// Query the provider for the booking's current session and apply what
    /// it reports. Used by the poll path and the background worker.
    pub async fn reconcile(
        &self,
        booking_id: Uuid,
        source: ConfirmationSource,
    ) -> Result<Booking, ConfirmationError> {
        let booking = self.store.get(booking_id).await?;
        if booking.status.is_terminal() {
            return Ok(booking);
        }
        let Some(session_id) = booking.checkout_session_id.clone() else {
            return Ok(booking);
        };

        let session = match self.provider.retrieve_session(&session_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    booking_id = %booking_id,
                    session_id = %session_id,
                    source = source.as_str(),
                    error = %e,
                    "provider status check failed, serving stored status"
                );
                return Ok(booking);
            }
        };

        let kind = match (session.state, session.is_paid()) {
            (_, true) => CheckoutEventKind::PaymentSucceeded,
            (SessionState::Expired, false) => CheckoutEventKind::SessionExpired,
            _ => return Ok(booking),
        };

        match self.apply_event(&booking, &session, kind, source).await {
            Ok(Some(applied)) => Ok(applied.into_booking()),
            Ok(None) => Ok(booking),
            Err(e) => Err(e),
        }
    }

    /// Pay-at-property and zero-amount bookings skip checkout entirely.
    pub async fn confirm_without_payment(&self, booking_id: Uuid) -> Result<Booking, ConfirmationError> {
        let applied = self
            .store
            .transition(booking_id, &Transition::ConfirmWithoutPayment)
            .await?;
        if applied.changed() {
            info!(booking_id = %booking_id, "booking confirmed without payment");
        }
        Ok(applied.into_booking())
    }

    async fn locate_booking(
        &self,
        session: &CheckoutSession,
    ) -> Result<Option<Booking>, ConfirmationError> {
        let repo = self.store.repository();
        if let Some(booking) = repo
            .find_by_checkout_session(&session.session_id)
            .await
            .map_err(BookingError::from)?
        {
            if let Some(session_booking) = session.booking_id() {
                if session_booking != booking.id {
                    error!(
                        session_id = %session.session_id,
                        booking_id = %booking.id,
                        session_booking = %session_booking,
                        "checkout session metadata points at another booking"
                    );
                    return Err(ConfirmationError::BookingMismatch {
                        session_id: session.session_id.clone(),
                        booking_id: booking.id,
                        session_booking,
                    });
                }
            }
            return Ok(Some(booking));
        }

        // superseded sessions are no longer on the row; fall back to metadata
        match session.booking_id() {
            Some(id) => Ok(repo.find_by_id(id).await.map_err(BookingError::from)?),
            None => Ok(None),
        }
    }

    async fn apply_event(
        &self,
        booking: &Booking,
        session: &CheckoutSession,
        kind: CheckoutEventKind,
        source: ConfirmationSource,
    ) -> Result<Option<Applied>, ConfirmationError> {
        let transition = match kind {
            CheckoutEventKind::PaymentSucceeded => {
                let amount = session.amount.clone().ok_or_else(|| {
                    error!(session_id = %session.session_id, "paid session without amount");
                    ConfirmationError::MissingIdentifier("amount_total".to_string())
                })?;
                if booking.checkout_session_id.as_deref() != Some(session.session_id.as_str()) {
                    warn!(
                        booking_id = %booking.id,
                        session_id = %session.session_id,
                        current_session = ?booking.checkout_session_id,
                        "payment arrived on a superseded checkout session"
                    );
                }
                if booking.status == BookingStatus::Cancelled {
                    error!(
                        booking_id = %booking.id,
                        session_id = %session.session_id,
                        payment_reference = ?session.payment_reference,
                        "payment captured for cancelled booking; refund required"
                    );
                }
                Transition::PaymentSucceeded {
                    session_id: session.session_id.clone(),
                    payment_reference: session.payment_reference.clone(),
                    amount,
                }
            }
            CheckoutEventKind::PaymentFailed => Transition::PaymentFailed {
                session_id: session.session_id.clone(),
            },
            CheckoutEventKind::SessionExpired => Transition::SessionExpired {
                session_id: session.session_id.clone(),
            },
            CheckoutEventKind::PaymentPending | CheckoutEventKind::Ignored => return Ok(None),
        };

        match self.store.transition(booking.id, &transition).await {
            Ok(applied) => {
                if applied.changed() {
                    info!(
                        booking_id = %booking.id,
                        session_id = %session.session_id,
                        source = source.as_str(),
                        transition = transition.name(),
                        "confirmation signal applied"
                    );
                }
                Ok(Some(applied))
            }
            Err(BookingError::AmountMismatch {
                booking_id,
                expected,
                reported,
            }) => {
                error!(
                    booking_id = %booking_id,
                    session_id = %session.session_id,
                    source = source.as_str(),
                    expected = %expected,
                    reported = %reported,
                    "integrity error: provider amount disagrees with booking; not applied"
                );
                Err(BookingError::AmountMismatch {
                    booking_id,
                    expected,
                    reported,
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }
}
