//! Checkout session creation and reuse
//!
//! At most one open session per booking. A stored session is replaced only
//! after the provider confirms it expired; the replacement is written with a
//! compare-and-set on the old session id, so concurrent callers converge on
//! one session.

use super::booking_store::{BookingError, BookingStore};
use crate::bookings::state_machine::Transition;
use crate::bookings::types::{Booking, BookingStatus, PaymentStatus};
use crate::config::CheckoutConfig;
use crate::error::AppError;
use crate::payments::types::{metadata, CheckoutSession, CheckoutSessionRequest, SessionState};
use crate::payments::{CheckoutProvider, PaymentError};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

const BOOKING_ID_PLACEHOLDER: &str = "{BOOKING_ID}";
const MAX_IDEMPOTENCY_KEY_LEN: usize = 200;

#[derive(Debug, Clone, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Provider(#[from] PaymentError),

    #[error("invalid idempotency key: {0}")]
    InvalidIdempotencyKey(String),
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Booking(e) => e.into(),
            CheckoutError::Provider(e) => e.into(),
            CheckoutError::InvalidIdempotencyKey(reason) => {
                AppError::invalid_field("idempotency_key", reason)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub settlement_currency: String,
    pub session_ttl: Duration,
    pub success_url: String,
    pub cancel_url: String,
}

impl From<&CheckoutConfig> for CheckoutSettings {
    fn from(config: &CheckoutConfig) -> Self {
        Self {
            settlement_currency: config.settlement_currency.to_uppercase(),
            session_ttl: config.session_ttl(),
            success_url: config.success_url.clone(),
            cancel_url: config.cancel_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutSessionView {
    pub booking_id: Uuid,
    pub session_id: String,
    pub checkout_url: String,
    pub expires_at: DateTime<Utc>,
    /// True when an existing open session was returned
    pub reused: bool,
}

impl CheckoutSessionView {
    fn from_booking(booking: &Booking, reused: bool) -> Option<Self> {
        Some(Self {
            booking_id: booking.id,
            session_id: booking.checkout_session_id.clone()?,
            checkout_url: booking.checkout_url.clone()?,
            expires_at: booking.checkout_expires_at?,
            reused,
        })
    }
}

pub struct CheckoutSessionOrchestrator {
    store: BookingStore,
    provider: Arc<dyn CheckoutProvider>,
    settings: CheckoutSettings,
}

impl CheckoutSessionOrchestrator {
    pub fn new(
        store: BookingStore,
        provider: Arc<dyn CheckoutProvider>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    pub fn settlement_currency(&self) -> &str {
        &self.settings.settlement_currency
    }

    pub async fn create_or_reuse_session(
        &self,
        booking_id: Uuid,
        idempotency_key: &str,
        preferred_currency: Option<String>,
    ) -> Result<CheckoutSessionView, CheckoutError> {
        let idempotency_key = idempotency_key.trim();
        if idempotency_key.is_empty() || idempotency_key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(CheckoutError::InvalidIdempotencyKey(format!(
                "must be 1..={} characters",
                MAX_IDEMPOTENCY_KEY_LEN
            )));
        }
        let preferred_currency = preferred_currency
            .map(|c| c.trim().to_uppercase())
            .filter(|c| c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic()));

        let booking = self.store.get(booking_id).await?;
        self.ensure_checkout_allowed(&booking)?;

        let now = Utc::now();
        if booking.has_open_session(now) {
            if let Some(view) = CheckoutSessionView::from_booking(&booking, true) {
                info!(booking_id = %booking.id, session_id = %view.session_id, "reusing open checkout session");
                return Ok(view);
            }
        }

        if let Some(previous) = booking.checkout_session_id.as_deref() {
            if let Some(view) = self.verify_previous_session(&booking, previous).await? {
                return Ok(view);
            }
        }

        let request = self.session_request(&booking, idempotency_key, preferred_currency.clone(), now);
        let session = self.provider.create_session(request).await?;
        let checkout_url = session.url.clone().ok_or_else(|| PaymentError::ProviderError {
            provider: self.provider.name().to_string(),
            message: "checkout session has no redirect url".to_string(),
            provider_code: None,
            retryable: false,
        })?;
        let expires_at = session
            .expires_at
            .unwrap_or(now + self.settings.session_ttl);

        let transition = Transition::OpenCheckout {
            session_id: session.session_id.clone(),
            checkout_url,
            expires_at,
            preferred_currency,
        };
        match self.store.try_transition(&booking, &transition).await? {
            Some(applied) => {
                let stored = applied.into_booking();
                info!(
                    booking_id = %stored.id,
                    session_id = %session.session_id,
                    replaced = ?booking.checkout_session_id,
                    "checkout session opened"
                );
                CheckoutSessionView::from_booking(&stored, false)
                    .ok_or_else(|| BookingError::Contended(booking_id).into())
            }
            None => {
                // another request stored its session first; converge on it
                let winner = self.store.get(booking_id).await?;
                warn!(
                    booking_id = %booking_id,
                    discarded_session = %session.session_id,
                    "checkout session race lost, returning stored session"
                );
                self.ensure_checkout_allowed(&winner)?;
                match CheckoutSessionView::from_booking(&winner, true) {
                    Some(view) if winner.has_open_session(Utc::now()) => Ok(view),
                    _ => Err(BookingError::Contended(booking_id).into()),
                }
            }
        }
    }

    fn ensure_checkout_allowed(&self, booking: &Booking) -> Result<(), BookingError> {
        let invalid = |operation: &str| BookingError::InvalidState {
            booking_id: booking.id,
            status: booking.status.to_string(),
            operation: operation.to_string(),
        };

        if booking.status != BookingStatus::PendingPayment {
            return Err(invalid("checkout"));
        }
        if booking.payment_status == PaymentStatus::Succeeded {
            return Err(invalid("checkout after payment"));
        }
        if booking.is_payment_free() {
            return Err(invalid("checkout a payment-free booking"));
        }
        if booking.currency != self.settings.settlement_currency {
            return Err(BookingError::UnsupportedCurrency(booking.currency.clone()));
        }
        Ok(())
    }

    /// The stored session looks closed locally. Ask the provider before
    /// replacing it; returns a view when the old session is still usable.
    async fn verify_previous_session(
        &self,
        booking: &Booking,
        session_id: &str,
    ) -> Result<Option<CheckoutSessionView>, CheckoutError> {
        let remote = match self.provider.retrieve_session(session_id).await {
            Ok(session) => session,
            Err(PaymentError::SessionNotFound { .. }) => {
                warn!(booking_id = %booking.id, session_id, "stored checkout session unknown to provider");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match remote.state {
            SessionState::Expired => Ok(None),
            SessionState::Complete if remote.is_paid() => {
                Err(BookingError::InvalidState {
                    booking_id: booking.id,
                    status: booking.status.to_string(),
                    operation: "checkout after payment".to_string(),
                }
                .into())
            }
            SessionState::Complete => Err(BookingError::InvalidState {
                booking_id: booking.id,
                status: booking.status.to_string(),
                operation: "checkout while payment is processing".to_string(),
            }
            .into()),
            SessionState::Open => Ok(open_view(booking, &remote)),
        }
    }

    fn session_request(
        &self,
        booking: &Booking,
        idempotency_key: &str,
        preferred_currency: Option<String>,
        now: DateTime<Utc>,
    ) -> CheckoutSessionRequest {
        let mut meta = BTreeMap::new();
        meta.insert(metadata::BOOKING_ID.to_string(), booking.id.to_string());
        meta.insert(
            metadata::CLIENT_REQUEST_ID.to_string(),
            booking.client_request_id.clone(),
        );
        if let Some(currency) = preferred_currency {
            meta.insert(metadata::PREFERRED_CURRENCY.to_string(), currency);
        }

        // scoped to the session being replaced so a reused client key cannot
        // resurrect an expired session at the provider
        let generation = booking.checkout_session_id.as_deref().unwrap_or("initial");
        let provider_key = format!("{}:{}:{}", booking.id, generation, idempotency_key);

        CheckoutSessionRequest {
            booking_id: booking.id,
            idempotency_key: provider_key,
            amount: booking.price(),
            description: booking.offer.display_name(),
            customer_email: Some(booking.contact.email.clone()),
            success_url: fill_booking_id(&self.settings.success_url, booking.id),
            cancel_url: fill_booking_id(&self.settings.cancel_url, booking.id),
            expires_at: now + self.settings.session_ttl,
            metadata: meta,
        }
    }
}

fn open_view(booking: &Booking, remote: &CheckoutSession) -> Option<CheckoutSessionView> {
    Some(CheckoutSessionView {
        booking_id: booking.id,
        session_id: remote.session_id.clone(),
        checkout_url: remote.url.clone().or_else(|| booking.checkout_url.clone())?,
        expires_at: remote.expires_at.or(booking.checkout_expires_at)?,
        reused: true,
    })
}

fn fill_booking_id(template: &str, booking_id: Uuid) -> String {
    template.replace(BOOKING_ID_PLACEHOLDER, &booking_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookings::types::fixtures::pending_booking;
    use crate::bookings::types::CancelActor;
    use crate::database::{BookingRepository, InMemoryBookingRepository};
    use crate::payments::testing::MockCheckoutProvider;

    fn settings() -> CheckoutSettings {
        CheckoutSettings {
            settlement_currency: "USD".to_string(),
            session_ttl: Duration::minutes(30),
            success_url: "https://app.test/bookings/{BOOKING_ID}/done".to_string(),
            cancel_url: "https://app.test/bookings/{BOOKING_ID}".to_string(),
        }
    }

    async fn setup(booking: &Booking) -> (CheckoutSessionOrchestrator, Arc<MockCheckoutProvider>, BookingStore) {
        let repo = Arc::new(InMemoryBookingRepository::new());
        repo.insert_if_absent(booking).await.unwrap();
        let store = BookingStore::new(repo);
        let provider = Arc::new(MockCheckoutProvider::new());
        (
            CheckoutSessionOrchestrator::new(store.clone(), provider.clone(), settings()),
            provider,
            store,
        )
    }

    #[tokio::test]
    async fn second_call_reuses_open_session() {
        let booking = pending_booking(45_000);
        let (orchestrator, provider, _) = setup(&booking).await;

        let first = orchestrator
            .create_or_reuse_session(booking.id, "key-1", Some("eur".to_string()))
            .await
            .unwrap();
        let second = orchestrator
            .create_or_reuse_session(booking.id, "key-2", None)
            .await
            .unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(provider.created().len(), 1);

        let request = &provider.created()[0];
        assert_eq!(request.amount.currency, "USD");
        assert_eq!(request.amount.amount_minor, 45_000);
        assert_eq!(
            request.success_url,
            format!("https://app.test/bookings/{}/done", booking.id)
        );
        assert_eq!(
            request.metadata.get(metadata::PREFERRED_CURRENCY).map(String::as_str),
            Some("EUR")
        );
    }

    #[tokio::test]
    async fn expired_session_is_replaced_after_provider_confirms() {
        let booking = pending_booking(45_000);
        let (orchestrator, provider, store) = setup(&booking).await;

        let first = orchestrator
            .create_or_reuse_session(booking.id, "key-1", None)
            .await
            .unwrap();

        // locally expired, and the provider agrees
        let current = store.get(booking.id).await.unwrap();
        let mut stored = current.clone();
        stored.checkout_expires_at = Some(Utc::now() - Duration::minutes(1));
        store
            .repository()
            .update_pending(&stored, &current)
            .await
            .unwrap();
        provider.set_state(&first.session_id, SessionState::Expired);

        let second = orchestrator
            .create_or_reuse_session(booking.id, "key-1", None)
            .await
            .unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(provider.created().len(), 2);
        // provider key differs per generation even with the same client key
        assert_ne!(
            provider.created()[0].idempotency_key,
            provider.created()[1].idempotency_key
        );
    }

    #[tokio::test]
    async fn locally_expired_but_provider_open_is_kept() {
        let booking = pending_booking(45_000);
        let (orchestrator, provider, store) = setup(&booking).await;

        let first = orchestrator
            .create_or_reuse_session(booking.id, "key-1", None)
            .await
            .unwrap();
        let current = store.get(booking.id).await.unwrap();
        let mut stored = current.clone();
        stored.checkout_expires_at = Some(Utc::now() - Duration::seconds(5));
        store
            .repository()
            .update_pending(&stored, &current)
            .await
            .unwrap();

        let again = orchestrator
            .create_or_reuse_session(booking.id, "key-1", None)
            .await
            .unwrap();

        assert_eq!(again.session_id, first.session_id);
        assert_eq!(provider.created().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_booking_is_invalid_state() {
        let booking = pending_booking(45_000);
        let (orchestrator, provider, store) = setup(&booking).await;
        store
            .transition(
                booking.id,
                &Transition::Cancel {
                    actor: CancelActor::Customer,
                    reason: None,
                },
            )
            .await
            .unwrap();

        let err = orchestrator
            .create_or_reuse_session(booking.id, "key-1", None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CheckoutError::Booking(BookingError::InvalidState { .. })
        ));
        assert!(provider.created().is_empty());
    }

    #[tokio::test]
    async fn concurrent_calls_converge_on_one_session() {
        let booking = pending_booking(45_000);
        let (orchestrator, _, store) = setup(&booking).await;
        let orchestrator = Arc::new(orchestrator);

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    orchestrator
                        .create_or_reuse_session(booking.id, &format!("key-{}", i), None)
                        .await
                })
            })
            .collect();

        let stored = {
            let mut sessions = Vec::new();
            for handle in handles {
                sessions.push(handle.await.unwrap().unwrap().session_id);
            }
            sessions
        };
        let current = store.get(booking.id).await.unwrap().checkout_session_id.unwrap();
        assert!(stored.iter().all(|s| *s == current));
    }
}
