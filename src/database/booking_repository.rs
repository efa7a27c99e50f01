//! Booking persistence
//!
//! The repository is the only shared state between pipeline stages. Two
//! statements carry the concurrency guarantees:
//! - `insert_if_absent` dedupes on `client_request_id`
//! - `update_pending` is a compare-and-set on `status = 'pending_payment'`,
//!   the checkout session id and the payment status the caller based its
//!   decision on

use crate::bookings::types::Booking;
use crate::database::error::DatabaseResult;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Booking>>;

    async fn find_by_client_request_id(
        &self,
        client_request_id: &str,
    ) -> DatabaseResult<Option<Booking>>;

    async fn find_by_checkout_session(&self, session_id: &str) -> DatabaseResult<Option<Booking>>;

    /// Insert unless a booking with the same `client_request_id` exists.
    /// Returns the stored booking and whether this call inserted it.
    async fn insert_if_absent(&self, booking: &Booking) -> DatabaseResult<(Booking, bool)>;

    /// Persist `next` only if the stored row is still `pending_payment` with
    /// the session id and payment status of `expected`. Amount and currency
    /// are never written. Returns whether the row was updated.
    async fn update_pending(&self, next: &Booking, expected: &Booking) -> DatabaseResult<bool>;

    /// Oldest-first pending bookings that hold a checkout session.
    async fn list_pending_with_session(&self, limit: i64) -> DatabaseResult<Vec<Booking>>;
}

/// Process-local repository for tests and `SKIP_EXTERNALS` runs.
#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: RwLock<HashMap<Uuid, Booking>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.bookings.read().await.len()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Booking>> {
        Ok(self.bookings.read().await.get(&id).cloned())
    }

    async fn find_by_client_request_id(
        &self,
        client_request_id: &str,
    ) -> DatabaseResult<Option<Booking>> {
        Ok(self
            .bookings
            .read()
            .await
            .values()
            .find(|b| b.client_request_id == client_request_id)
            .cloned())
    }

    async fn find_by_checkout_session(&self, session_id: &str) -> DatabaseResult<Option<Booking>> {
        Ok(self
            .bookings
            .read()
            .await
            .values()
            .find(|b| b.checkout_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn insert_if_absent(&self, booking: &Booking) -> DatabaseResult<(Booking, bool)> {
        let mut bookings = self.bookings.write().await;
        if let Some(existing) = bookings
            .values()
            .find(|b| b.client_request_id == booking.client_request_id)
        {
            return Ok((existing.clone(), false));
        }
        bookings.insert(booking.id, booking.clone());
        Ok((booking.clone(), true))
    }

    async fn update_pending(&self, next: &Booking, expected: &Booking) -> DatabaseResult<bool> {
        let mut bookings = self.bookings.write().await;
        let Some(stored) = bookings.get_mut(&next.id) else {
            return Ok(false);
        };
        if stored.status.is_terminal()
            || stored.checkout_session_id != expected.checkout_session_id
            || stored.payment_status != expected.payment_status
        {
            return Ok(false);
        }

        let amount_minor = stored.amount_minor;
        let currency = stored.currency.clone();
        *stored = next.clone();
        stored.amount_minor = amount_minor;
        stored.currency = currency;
        Ok(true)
    }

    async fn list_pending_with_session(&self, limit: i64) -> DatabaseResult<Vec<Booking>> {
        let mut pending: Vec<Booking> = self
            .bookings
            .read()
            .await
            .values()
            .filter(|b| !b.status.is_terminal() && b.checkout_session_id.is_some())
            .cloned()
            .collect();
        pending.sort_by_key(|b| b.updated_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }
}

#[cfg(feature = "database")]
pub use self::postgres::PgBookingRepository;

#[cfg(feature = "database")]
mod postgres {
    use super::*;
    use crate::bookings::types::{BookingStatus, CancelActor, PaymentStatus, ProductType};
    use crate::database::error::DatabaseError;
    use chrono::{DateTime, Utc};
    use sqlx::{FromRow, PgPool};
    use std::str::FromStr;

    const BOOKING_COLUMNS: &str = "id, product_type, status, payment_status, client_request_id, \
         offer_snapshot, amount_minor, currency, contact, checkout_session_id, checkout_url, \
         checkout_expires_at, payment_reference, preferred_currency, cancelled_by, \
         cancellation_reason, confirmed_at, created_at, updated_at";

    #[derive(Debug, Clone, FromRow)]
    struct BookingRow {
        id: Uuid,
        product_type: String,
        status: String,
        payment_status: String,
        client_request_id: String,
        offer_snapshot: serde_json::Value,
        amount_minor: i64,
        currency: String,
        contact: serde_json::Value,
        checkout_session_id: Option<String>,
        checkout_url: Option<String>,
        checkout_expires_at: Option<DateTime<Utc>>,
        payment_reference: Option<String>,
        preferred_currency: Option<String>,
        cancelled_by: Option<String>,
        cancellation_reason: Option<String>,
        confirmed_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl TryFrom<BookingRow> for Booking {
        type Error = DatabaseError;

        fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
            let offer = serde_json::from_value(row.offer_snapshot)
                .map_err(|e| DatabaseError::corrupt(format!("offer_snapshot: {}", e)))?;
            let contact = serde_json::from_value(row.contact)
                .map_err(|e| DatabaseError::corrupt(format!("contact: {}", e)))?;

            Ok(Booking {
                id: row.id,
                product_type: ProductType::from_str(&row.product_type)
                    .map_err(DatabaseError::corrupt)?,
                status: BookingStatus::from_str(&row.status).map_err(DatabaseError::corrupt)?,
                payment_status: PaymentStatus::from_str(&row.payment_status)
                    .map_err(DatabaseError::corrupt)?,
                client_request_id: row.client_request_id,
                offer,
                amount_minor: row.amount_minor,
                currency: row.currency,
                contact,
                checkout_session_id: row.checkout_session_id,
                checkout_url: row.checkout_url,
                checkout_expires_at: row.checkout_expires_at,
                payment_reference: row.payment_reference,
                preferred_currency: row.preferred_currency,
                cancelled_by: row
                    .cancelled_by
                    .as_deref()
                    .map(CancelActor::from_str)
                    .transpose()
                    .map_err(DatabaseError::corrupt)?,
                cancellation_reason: row.cancellation_reason,
                confirmed_at: row.confirmed_at,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        }
    }

    pub struct PgBookingRepository {
        pool: PgPool,
    }

    impl PgBookingRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        async fn fetch_one_where(
            &self,
            clause: &str,
            value: &str,
        ) -> DatabaseResult<Option<Booking>> {
            let sql = format!("SELECT {} FROM bookings WHERE {} = $1", BOOKING_COLUMNS, clause);
            sqlx::query_as::<_, BookingRow>(&sql)
                .bind(value)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?
                .map(Booking::try_from)
                .transpose()
        }
    }

    #[async_trait]
    impl BookingRepository for PgBookingRepository {
        async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Booking>> {
            let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
            sqlx::query_as::<_, BookingRow>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?
                .map(Booking::try_from)
                .transpose()
        }

        async fn find_by_client_request_id(
            &self,
            client_request_id: &str,
        ) -> DatabaseResult<Option<Booking>> {
            self.fetch_one_where("client_request_id", client_request_id)
                .await
        }

        async fn find_by_checkout_session(
            &self,
            session_id: &str,
        ) -> DatabaseResult<Option<Booking>> {
            self.fetch_one_where("checkout_session_id", session_id).await
        }

        async fn insert_if_absent(&self, booking: &Booking) -> DatabaseResult<(Booking, bool)> {
            let offer = serde_json::to_value(&booking.offer)
                .map_err(|e| DatabaseError::corrupt(e.to_string()))?;
            let contact = serde_json::to_value(&booking.contact)
                .map_err(|e| DatabaseError::corrupt(e.to_string()))?;

            let sql = format!(
                "INSERT INTO bookings (id, product_type, status, payment_status, client_request_id, \
                 offer_snapshot, amount_minor, currency, contact, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 ON CONFLICT (client_request_id) DO NOTHING \
                 RETURNING {}",
                BOOKING_COLUMNS
            );

            let inserted = sqlx::query_as::<_, BookingRow>(&sql)
                .bind(booking.id)
                .bind(booking.product_type.as_str())
                .bind(booking.status.as_str())
                .bind(booking.payment_status.as_str())
                .bind(&booking.client_request_id)
                .bind(offer)
                .bind(booking.amount_minor)
                .bind(&booking.currency)
                .bind(contact)
                .bind(booking.created_at)
                .bind(booking.updated_at)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

            if let Some(row) = inserted {
                return Ok((Booking::try_from(row)?, true));
            }

            // Lost the race to a concurrent insert with the same request id.
            let existing = self
                .find_by_client_request_id(&booking.client_request_id)
                .await?
                .ok_or_else(|| {
                    DatabaseError::new(crate::database::error::DatabaseErrorKind::NotFound {
                        entity: "Booking".to_string(),
                        id: booking.client_request_id.clone(),
                    })
                })?;
            Ok((existing, false))
        }

        async fn update_pending(&self, next: &Booking, expected: &Booking) -> DatabaseResult<bool> {
            let result = sqlx::query(
                "UPDATE bookings SET \
                     status = $2, payment_status = $3, checkout_session_id = $4, \
                     checkout_url = $5, checkout_expires_at = $6, payment_reference = $7, \
                     preferred_currency = $8, cancelled_by = $9, cancellation_reason = $10, \
                     confirmed_at = $11, updated_at = $12 \
                 WHERE id = $1 \
                   AND status = 'pending_payment' \
                   AND checkout_session_id IS NOT DISTINCT FROM $13 \
                   AND payment_status = $14",
            )
            .bind(next.id)
            .bind(next.status.as_str())
            .bind(next.payment_status.as_str())
            .bind(&next.checkout_session_id)
            .bind(&next.checkout_url)
            .bind(next.checkout_expires_at)
            .bind(&next.payment_reference)
            .bind(&next.preferred_currency)
            .bind(next.cancelled_by.map(|a| a.as_str()))
            .bind(&next.cancellation_reason)
            .bind(next.confirmed_at)
            .bind(next.updated_at)
            .bind(&expected.checkout_session_id)
            .bind(expected.payment_status.as_str())
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            Ok(result.rows_affected() > 0)
        }

        async fn list_pending_with_session(&self, limit: i64) -> DatabaseResult<Vec<Booking>> {
            let sql = format!(
                "SELECT {} FROM bookings \
                 WHERE status = 'pending_payment' AND checkout_session_id IS NOT NULL \
                 ORDER BY updated_at ASC \
                 LIMIT $1",
                BOOKING_COLUMNS
            );
            sqlx::query_as::<_, BookingRow>(&sql)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?
                .into_iter()
                .map(Booking::try_from)
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookings::types::fixtures::pending_booking;
    use crate::bookings::types::{BookingStatus, PaymentStatus};

    #[tokio::test]
    async fn insert_if_absent_dedupes_on_client_request_id() {
        let repo = InMemoryBookingRepository::new();
        let first = pending_booking(10000);
        let mut second = pending_booking(10000);
        second.id = Uuid::new_v4();

        let (stored, inserted) = repo.insert_if_absent(&first).await.unwrap();
        assert!(inserted);
        let (again, inserted_again) = repo.insert_if_absent(&second).await.unwrap();
        assert!(!inserted_again);
        assert_eq!(again, stored);
        assert_eq!(repo.count().await, 1);
    }

    #[tokio::test]
    async fn update_pending_is_compare_and_set() {
        let repo = InMemoryBookingRepository::new();
        let booking = pending_booking(10000);
        repo.insert_if_absent(&booking).await.unwrap();

        let mut with_session = booking.clone();
        with_session.checkout_session_id = Some("cs_1".to_string());
        assert!(repo.update_pending(&with_session, &booking).await.unwrap());

        // Stale expectation loses.
        let mut other = booking.clone();
        other.checkout_session_id = Some("cs_2".to_string());
        assert!(!repo.update_pending(&other, &booking).await.unwrap());

        let mut confirmed = with_session.clone();
        confirmed.status = BookingStatus::Confirmed;
        confirmed.amount_minor = 1;
        assert!(repo.update_pending(&confirmed, &with_session).await.unwrap());

        let stored = repo.find_by_id(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert_eq!(stored.amount_minor, 10000, "amount is immutable");

        // Terminal rows are never updated.
        let mut cancelled = stored.clone();
        cancelled.status = BookingStatus::Cancelled;
        assert!(!repo.update_pending(&cancelled, &stored).await.unwrap());
    }

    #[tokio::test]
    async fn stale_payment_status_loses_the_race() {
        let repo = InMemoryBookingRepository::new();
        let mut booking = pending_booking(10000);
        booking.checkout_session_id = Some("cs_1".to_string());
        booking.payment_status = PaymentStatus::CheckoutPending;
        repo.insert_if_absent(&booking).await.unwrap();

        // A payment failure lands on the same session first.
        let mut failed = booking.clone();
        failed.payment_status = PaymentStatus::Failed;
        assert!(repo.update_pending(&failed, &booking).await.unwrap());

        // A cancel decided from the earlier snapshot must not overwrite it.
        let mut cancelled = booking.clone();
        cancelled.status = BookingStatus::Cancelled;
        assert!(!repo.update_pending(&cancelled, &booking).await.unwrap());

        let stored = repo.find_by_id(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::PendingPayment);
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn lists_only_pending_with_session() {
        let repo = InMemoryBookingRepository::new();
        let mut a = pending_booking(100);
        a.client_request_id = "a".to_string();
        a.checkout_session_id = Some("cs_a".to_string());
        let mut b = pending_booking(100);
        b.id = Uuid::new_v4();
        b.client_request_id = "b".to_string();
        repo.insert_if_absent(&a).await.unwrap();
        repo.insert_if_absent(&b).await.unwrap();

        let pending = repo.list_pending_with_session(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].client_request_id, "a");
        assert!(repo
            .find_by_checkout_session("cs_a")
            .await
            .unwrap()
            .is_some());
    }
}
