use super::{client_identity, reject, AppState};
use crate::error::AppError;
use crate::services::{SmartSaveRequest, SmartSaveResult};
use axum::{extract::State, http::HeaderMap, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct RatesResponse {
    pub base: String,
    /// USD per one unit of each currency
    pub rates: BTreeMap<String, String>,
    pub as_of: DateTime<Utc>,
    pub source: String,
}

/// POST /api/fx/smart-save
pub async fn smart_save(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SmartSaveRequest>,
) -> Result<Json<SmartSaveResult>, AppError> {
    let client = client_identity(&headers);
    let result = state
        .smart_save
        .recommend(&client, &request)
        .await
        .map_err(|e| reject(e, &headers))?;
    Ok(Json(result))
}

/// GET /api/fx/rates
pub async fn current_rates(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RatesResponse>, AppError> {
    let snapshot = state
        .smart_save
        .rates()
        .await
        .map_err(|e| reject(e, &headers))?;

    Ok(Json(RatesResponse {
        base: snapshot.base,
        rates: snapshot
            .usd_per_unit
            .into_iter()
            .map(|(code, rate)| (code, rate.to_string()))
            .collect(),
        as_of: snapshot.fetched_at,
        source: snapshot.source,
    }))
}
