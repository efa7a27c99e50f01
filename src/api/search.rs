use super::{reject, AppState};
use crate::bookings::types::OfferSnapshot;
use crate::error::{AppError, AppErrorKind, ExternalError};
use crate::supplier::{SearchParams, SupplierOutcome};
use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_FLEXIBLE_DAYS: u32 = 7;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub search: SearchParams,
    /// Also try up to this many following days when the requested dates
    /// return nothing
    #[serde(default)]
    pub flexible_days: u32,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub offers: Vec<OfferSnapshot>,
    pub currency: String,
    /// Days after the requested date the offers are for
    pub day_offset: u32,
    pub search: SearchParams,
}

fn unavailable(attempts: u32, retry_after: Option<Duration>) -> AppError {
    AppError::new(AppErrorKind::External(ExternalError::SupplierUnavailable {
        attempts,
        retry_after: retry_after.map(|d| d.as_secs()),
    }))
}

/// POST /api/search
pub async fn search_offers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if request.flexible_days > MAX_FLEXIBLE_DAYS {
        return Err(reject(
            AppError::invalid_field(
                "flexible_days",
                format!("at most {}", MAX_FLEXIBLE_DAYS),
            ),
            &headers,
        ));
    }
    let currency = state.supplier.currency().to_string();

    if request.flexible_days == 0 {
        return match state
            .supplier
            .search(&request.search)
            .await
            .map_err(|e| reject(e, &headers))?
        {
            SupplierOutcome::Ready(offers) => Ok(Json(SearchResponse {
                offers,
                currency,
                day_offset: 0,
                search: request.search,
            })),
            SupplierOutcome::TemporarilyUnavailable {
                attempts,
                retry_after,
            } => Err(reject(unavailable(attempts, retry_after), &headers)),
        };
    }

    match state
        .supplier
        .search_flexible_dates(&request.search, request.flexible_days)
        .await
        .map_err(|e| reject(e, &headers))?
    {
        SupplierOutcome::Ready(Some(found)) => Ok(Json(SearchResponse {
            offers: found.offers,
            currency,
            day_offset: found.day_offset,
            search: found.params,
        })),
        SupplierOutcome::Ready(None) => Ok(Json(SearchResponse {
            offers: Vec::new(),
            currency,
            day_offset: 0,
            search: request.search,
        })),
        SupplierOutcome::TemporarilyUnavailable {
            attempts,
            retry_after,
        } => Err(reject(unavailable(attempts, retry_after), &headers)),
    }
}
