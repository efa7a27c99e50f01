use super::{reject, AppState};
use crate::bookings::types::{
    Booking, BookingStage, BookingStatus, CancelActor, ContactDetails, OfferSnapshot,
    PaymentStatus, Price, ProductType,
};
use crate::error::AppError;
use crate::services::{BookingStatusView, CheckoutSessionView, PrebookingResult};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
pub struct ValidateOfferRequest {
    pub product_type: ProductType,
    pub offer: OfferSnapshot,
    pub client_request_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub product_type: ProductType,
    /// Offer exactly as it was shown to the customer
    pub offer: OfferSnapshot,
    pub client_request_id: String,
    pub contact: ContactDetails,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Currency the customer picked in SmartSave; recorded, never charged
    #[serde(default)]
    pub preferred_currency: Option<String>,
}

/// Customer-initiated cancellation. Operator cancellations go through the
/// service layer, never this endpoint, so any `actor` in the body is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingView {
    pub booking_id: Uuid,
    pub client_request_id: String,
    pub product_type: ProductType,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub stage: BookingStage,
    pub amount: Price,
    pub offer: OfferSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<CancelActor>,
    pub created_at: DateTime<Utc>,
}

impl From<Booking> for BookingView {
    fn from(booking: Booking) -> Self {
        Self {
            booking_id: booking.id,
            stage: booking.stage(),
            amount: booking.price(),
            client_request_id: booking.client_request_id,
            product_type: booking.product_type,
            status: booking.status,
            payment_status: booking.payment_status,
            offer: booking.offer,
            confirmed_at: booking.confirmed_at,
            cancelled_by: booking.cancelled_by,
            created_at: booking.created_at,
        }
    }
}

/// Empty body means all defaults.
fn optional_body<T: Default + serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::invalid_field("body", e.to_string()))
}

/// POST /api/bookings/validate
pub async fn validate_offer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ValidateOfferRequest>,
) -> Result<Json<PrebookingResult>, AppError> {
    let result = state
        .validator
        .validate(request.product_type, &request.offer, &request.client_request_id)
        .await
        .map_err(|e| reject(e, &headers))?;
    Ok(Json(result))
}

/// POST /api/bookings
///
/// A repeated `client_request_id` returns the stored booking without
/// touching the supplier again.
pub async fn create_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(existing) = state
        .bookings
        .find_existing(&request.client_request_id)
        .await
        .map_err(|e| reject(e, &headers))?
    {
        return Ok((StatusCode::OK, Json(BookingView::from(existing))));
    }

    let validated = state
        .validator
        .validate(request.product_type, &request.offer, &request.client_request_id)
        .await
        .map_err(|e| reject(e, &headers))?
        .into_validated()
        .map_err(|e| reject(e, &headers))?;

    let amount = validated.price().clone();
    let mut booking = state
        .bookings
        .create_provisional(
            request.product_type,
            &validated,
            &amount,
            &request.client_request_id,
            request.contact,
        )
        .await
        .map_err(|e| reject(e, &headers))?;

    if booking.is_payment_free() && booking.status == BookingStatus::PendingPayment {
        booking = state
            .reconciler
            .confirm_without_payment(booking.id)
            .await
            .map_err(|e| reject(e, &headers))?;
    }

    Ok((StatusCode::CREATED, Json(BookingView::from(booking))))
}

/// POST /api/bookings/{id}/checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CheckoutSessionView>, AppError> {
    let request: CheckoutRequest = optional_body(&body).map_err(|e| reject(e, &headers))?;
    let key = request
        .idempotency_key
        .or_else(|| {
            headers
                .get(IDEMPOTENCY_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .ok_or_else(|| {
            reject(
                AppError::invalid_field("idempotency_key", "required in body or Idempotency-Key header"),
                &headers,
            )
        })?;

    let view = state
        .checkout
        .create_or_reuse_session(booking_id, &key, request.preferred_currency)
        .await
        .map_err(|e| reject(e, &headers))?;

    info!(
        booking_id = %booking_id,
        session_id = %view.session_id,
        reused = view.reused,
        "checkout session issued"
    );
    Ok(Json(view))
}

/// GET /api/bookings/{id}/status
pub async fn booking_status(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<BookingStatusView>, AppError> {
    let view = state
        .reconciler
        .refresh_status(booking_id)
        .await
        .map_err(|e| reject(e, &headers))?;
    Ok(Json(view))
}

/// POST /api/bookings/{id}/cancel
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BookingView>, AppError> {
    let request: CancelRequest = optional_body(&body).map_err(|e| reject(e, &headers))?;
    let booking = state
        .bookings
        .cancel(booking_id, CancelActor::Customer, request.reason)
        .await
        .map_err(|e| reject(e, &headers))?;
    Ok(Json(BookingView::from(booking)))
}
