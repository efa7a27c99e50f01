//! Guarded booking mutations shared by every pipeline stage

use crate::bookings::state_machine::{apply, Transition, TransitionError, TransitionOutcome};
use crate::bookings::types::{Booking, Price};
use crate::database::{BookingRepository, DatabaseError};
use crate::error::{AppError, AppErrorKind, DomainError, IntegrityError, ValidationError};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lost compare-and-set races tolerated before giving up.
const MAX_CAS_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Error)]
pub enum BookingError {
    #[error("booking {0} not found")]
    NotFound(Uuid),

    #[error("cannot {operation} booking {booking_id} in status {status}")]
    InvalidState {
        booking_id: Uuid,
        status: String,
        operation: String,
    },

    #[error("amount {provided} does not match validated price {expected}")]
    PriceMismatch { expected: Price, provided: Price },

    #[error("payment of {reported} does not match booking {booking_id} amount {expected}")]
    AmountMismatch {
        booking_id: Uuid,
        expected: Price,
        reported: Price,
    },

    #[error("booking {booking_id} is not eligible: {reason}")]
    NotEligible { booking_id: Uuid, reason: String },

    #[error("invalid {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("currency {0} is not the settlement currency")]
    UnsupportedCurrency(String),

    #[error("booking {0} is being modified concurrently")]
    Contended(Uuid),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl BookingError {
    fn from_transition(booking_id: Uuid, err: TransitionError) -> Self {
        match err {
            TransitionError::InvalidState {
                transition, status, ..
            } => BookingError::InvalidState {
                booking_id,
                status: status.to_string(),
                operation: transition.to_string(),
            },
            TransitionError::AmountMismatch { expected, reported } => {
                BookingError::AmountMismatch {
                    booking_id,
                    expected,
                    reported,
                }
            }
            TransitionError::NotEligible(reason) => BookingError::NotEligible { booking_id, reason },
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::NotFound(id) => AppError::domain(DomainError::BookingNotFound {
                booking_id: id.to_string(),
            }),
            BookingError::InvalidState {
                booking_id,
                status,
                operation,
            } => AppError::domain(DomainError::InvalidState {
                booking_id: booking_id.to_string(),
                status,
                operation,
            }),
            BookingError::NotEligible { booking_id, reason } => {
                AppError::domain(DomainError::InvalidState {
                    booking_id: booking_id.to_string(),
                    status: "pending_payment".to_string(),
                    operation: "confirm_without_payment".to_string(),
                })
                .with_context(reason)
            }
            BookingError::PriceMismatch { expected, provided } => {
                AppError::domain(DomainError::PriceMismatch { expected, provided })
            }
            BookingError::AmountMismatch {
                booking_id,
                expected,
                reported,
            } => AppError::new(AppErrorKind::Integrity(IntegrityError::PaymentMismatch {
                booking_id: booking_id.to_string(),
                expected,
                reported,
            })),
            BookingError::InvalidInput { field, reason } => AppError::invalid_field(field, reason),
            BookingError::UnsupportedCurrency(currency) => {
                AppError::validation(ValidationError::UnsupportedCurrency { currency })
            }
            BookingError::Contended(id) => AppError::domain(DomainError::InvalidState {
                booking_id: id.to_string(),
                status: "pending_payment".to_string(),
                operation: "concurrent update".to_string(),
            }),
            BookingError::Database(e) => e.into(),
        }
    }
}

/// Result of a guarded transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Changed(Booking),
    /// The transition was a no-op; the stored record is returned as-is.
    Unchanged(Booking),
}

impl Applied {
    pub fn booking(&self) -> &Booking {
        match self {
            Applied::Changed(b) | Applied::Unchanged(b) => b,
        }
    }

    pub fn into_booking(self) -> Booking {
        match self {
            Applied::Changed(b) | Applied::Unchanged(b) => b,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, Applied::Changed(_))
    }
}

#[derive(Clone)]
pub struct BookingStore {
    repo: Arc<dyn BookingRepository>,
}

impl BookingStore {
    pub fn new(repo: Arc<dyn BookingRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<dyn BookingRepository> {
        &self.repo
    }

    pub async fn get(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or(BookingError::NotFound(id))
    }

    /// Re-read, decide, compare-and-set; repeat if another writer got in
    /// between. The decision is always made against the latest stored row.
    pub async fn transition(
        &self,
        booking_id: Uuid,
        transition: &Transition,
    ) -> Result<Applied, BookingError> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.get(booking_id).await?;
            match self.try_transition(&current, transition).await? {
                Some(applied) => return Ok(applied),
                None => debug!(
                    booking_id = %booking_id,
                    transition = transition.name(),
                    attempt,
                    "lost booking update race, re-reading"
                ),
            }
        }
        warn!(booking_id = %booking_id, transition = transition.name(), "booking update contended");
        Err(BookingError::Contended(booking_id))
    }

    /// Single compare-and-set against `current`. `Ok(None)` means the stored
    /// row moved on since `current` was read.
    pub async fn try_transition(
        &self,
        current: &Booking,
        transition: &Transition,
    ) -> Result<Option<Applied>, BookingError> {
        let outcome = apply(current, transition, Utc::now())
            .map_err(|e| BookingError::from_transition(current.id, e))?;

        let next = match outcome {
            TransitionOutcome::NoOp => return Ok(Some(Applied::Unchanged(current.clone()))),
            TransitionOutcome::Applied(next) => next,
        };

        let written = self
            .repo
            .update_pending(&next, current)
            .await?;
        if !written {
            return Ok(None);
        }

        info!(
            booking_id = %next.id,
            transition = transition.name(),
            status = %next.status,
            payment_status = %next.payment_status,
            "booking updated"
        );
        Ok(Some(Applied::Changed(next)))
    }
}
