//! Pending booking creation and cancellation

use super::booking_store::{Applied, BookingError, BookingStore};
use super::prebooking::ValidatedOffer;
use crate::bookings::state_machine::Transition;
use crate::bookings::types::{Booking, CancelActor, ContactDetails, Price, ProductType};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

const MAX_REASON_LEN: usize = 500;

pub struct ProvisionalBookingManager {
    store: BookingStore,
    settlement_currency: String,
}

impl ProvisionalBookingManager {
    pub fn new(store: BookingStore, settlement_currency: impl Into<String>) -> Self {
        Self {
            store,
            settlement_currency: settlement_currency.into().to_uppercase(),
        }
    }

    pub async fn find_existing(&self, client_request_id: &str) -> Result<Option<Booking>, BookingError> {
        Ok(self
            .store
            .repository()
            .find_by_client_request_id(client_request_id)
            .await?)
    }

    /// Create a `pending_payment` booking, or return the one already created
    /// for `client_request_id` untouched.
    ///
    /// `amount` must be exactly the validated price; this never derives a
    /// price of its own.
    pub async fn create_provisional(
        &self,
        product_type: ProductType,
        validated: &ValidatedOffer,
        amount: &Price,
        client_request_id: &str,
        contact: ContactDetails,
    ) -> Result<Booking, BookingError> {
        if client_request_id.trim().is_empty() {
            return Err(BookingError::InvalidInput {
                field: "client_request_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        if let Some(existing) = self.find_existing(client_request_id).await? {
            info!(
                booking_id = %existing.id,
                client_request_id,
                "returning existing booking for client request"
            );
            return Ok(existing);
        }

        if validated.offer().product_type() != product_type {
            return Err(BookingError::InvalidInput {
                field: "product_type".to_string(),
                reason: format!(
                    "offer is {} but {} was requested",
                    validated.offer().product_type(),
                    product_type
                ),
            });
        }
        if validated.client_request_id() != client_request_id {
            return Err(BookingError::InvalidInput {
                field: "client_request_id".to_string(),
                reason: "offer was validated for a different request".to_string(),
            });
        }
        if amount != validated.price() {
            return Err(BookingError::PriceMismatch {
                expected: validated.price().clone(),
                provided: amount.clone(),
            });
        }
        if amount.currency != self.settlement_currency {
            return Err(BookingError::UnsupportedCurrency(amount.currency.clone()));
        }
        if amount.amount_minor < 0 {
            return Err(BookingError::InvalidInput {
                field: "amount".to_string(),
                reason: "must not be negative".to_string(),
            });
        }
        contact.validate().map_err(|reason| BookingError::InvalidInput {
            field: "contact".to_string(),
            reason,
        })?;

        let booking = Booking::new_pending(
            client_request_id,
            validated.offer().clone(),
            amount.clone(),
            contact,
            Utc::now(),
        );
        let (stored, inserted) = self.store.repository().insert_if_absent(&booking).await?;

        if inserted {
            info!(
                booking_id = %stored.id,
                client_request_id,
                product_type = %product_type,
                amount = %stored.price(),
                "provisional booking created"
            );
        } else {
            info!(
                booking_id = %stored.id,
                client_request_id,
                "concurrent create resolved to existing booking"
            );
        }
        Ok(stored)
    }

    pub async fn get(&self, booking_id: Uuid) -> Result<Booking, BookingError> {
        self.store.get(booking_id).await
    }

    /// Terminal. Cancelling an already cancelled booking returns it unchanged.
    pub async fn cancel(
        &self,
        booking_id: Uuid,
        actor: CancelActor,
        reason: Option<String>,
    ) -> Result<Booking, BookingError> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if actor == CancelActor::Operator && reason.is_none() {
            return Err(BookingError::InvalidInput {
                field: "reason".to_string(),
                reason: "operators must give a cancellation reason".to_string(),
            });
        }
        if reason.as_ref().map(|r| r.len() > MAX_REASON_LEN).unwrap_or(false) {
            return Err(BookingError::InvalidInput {
                field: "reason".to_string(),
                reason: format!("at most {} characters", MAX_REASON_LEN),
            });
        }

        let applied = self
            .store
            .transition(booking_id, &Transition::Cancel { actor, reason })
            .await?;
        if let Applied::Changed(booking) = &applied {
            info!(booking_id = %booking.id, actor = actor.as_str(), "booking cancelled");
        }
        Ok(applied.into_booking())
    }
}
