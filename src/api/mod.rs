//! HTTP surface
//!
//! Thin handlers over the services: decode, call one service operation,
//! render. Errors leave as `AppError` and are rendered by the error
//! middleware.

pub mod bookings;
pub mod fx;
pub mod search;
pub mod webhooks;

use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::{
    CheckoutSessionOrchestrator, ConfirmationReconciler, FxSmartSaveEngine, PrebookingValidator,
    ProvisionalBookingManager,
};
use crate::supplier::SupplierClient;
use axum::{
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Everything the handlers need, built once in `main` (or a test).
#[derive(Clone)]
pub struct AppState {
    pub supplier: Arc<SupplierClient>,
    pub validator: Arc<PrebookingValidator>,
    pub bookings: Arc<ProvisionalBookingManager>,
    pub checkout: Arc<CheckoutSessionOrchestrator>,
    pub reconciler: Arc<ConfirmationReconciler>,
    pub smart_save: Arc<FxSmartSaveEngine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/search", post(search::search_offers))
        .route("/api/bookings/validate", post(bookings::validate_offer))
        .route("/api/bookings", post(bookings::create_booking))
        .route("/api/bookings/{id}/checkout", post(bookings::create_checkout))
        .route("/api/bookings/{id}/status", get(bookings::booking_status))
        .route("/api/bookings/{id}/cancel", post(bookings::cancel_booking))
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .route("/api/fx/smart-save", post(fx::smart_save))
        .route("/api/fx/rates", get(fx::current_rates))
        .with_state(state)
}

/// Attach the caller's request id to an error on its way out.
pub(crate) fn reject(err: impl Into<AppError>, headers: &HeaderMap) -> AppError {
    let err = err.into();
    match get_request_id_from_headers(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

/// Who a per-client budget is charged to: an explicit client id, else the
/// first forwarded address, else the proxy's real-ip header.
pub fn client_identity(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    header("x-client-id")
        .or_else(|| {
            header("x-forwarded-for")
                .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
                .filter(|ip| !ip.is_empty())
        })
        .or_else(|| header("x-real-ip"))
        .unwrap_or_else(|| "anonymous".to_string())
}
