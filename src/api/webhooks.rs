use super::{reject, AppState};
use crate::error::AppError;
use crate::services::ConfirmationError;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info, warn};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// POST /webhooks/payments
///
/// Signed with the raw body, so the body is taken as bytes and never
/// re-serialized. Anything the provider should not redeliver is
/// acknowledged with 200; storage and provider failures return 5xx so the
/// event comes back.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if signature.is_none() {
        warn!("payment webhook without signature header");
    }

    match state.reconciler.handle_webhook(&body, signature).await {
        Ok(outcome) => {
            info!(outcome = ?outcome, "payment webhook processed");
            (
                StatusCode::OK,
                Json(serde_json::json!({ "status": "ok", "result": outcome })),
            )
                .into_response()
        }
        Err(ConfirmationError::InvalidSignature(reason)) => {
            warn!(reason = %reason, "payment webhook rejected");
            reject(ConfirmationError::InvalidSignature(reason), &headers).into_response()
        }
        Err(e) if e.is_integrity() => {
            error!(error = %e, "payment webhook failed integrity checks, acknowledged without applying");
            (
                StatusCode::OK,
                Json(serde_json::json!({ "status": "rejected", "reason": e.to_string() })),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "payment webhook processing failed");
            let err: AppError = reject(e, &headers);
            err.into_response()
        }
    }
}
