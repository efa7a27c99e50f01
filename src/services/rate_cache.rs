//! Exchange rate snapshots with a freshness window
//!
//! The whole USD table is cached as one entry. Entries outlive their
//! freshness window so a stale table can still be served when the live
//! source is down; correctness never depends on a hit.

use crate::cache::keys::fx::RateSnapshotKey;
use crate::cache::Cache;
use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const BASE_CURRENCY: &str = "USD";

/// How long a snapshot is kept after it stops being fresh.
const STALE_RETENTION: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RateError {
    #[error("exchange rates unavailable: {0}")]
    Unavailable(String),

    #[error("no exchange rate for {0}")]
    UnsupportedCurrency(String),

    #[error("rate provider error: {0}")]
    Provider(String),
}

pub type RateResult<T> = Result<T, RateError>;

impl From<RateError> for AppError {
    fn from(err: RateError) -> Self {
        match err {
            RateError::UnsupportedCurrency(currency) => {
                AppError::validation(ValidationError::UnsupportedCurrency { currency })
            }
            RateError::Unavailable(message) | RateError::Provider(message) => {
                AppError::new(AppErrorKind::External(ExternalError::RateSource { message }))
            }
        }
    }
}

/// USD value of one unit of each currency, e.g. `EUR -> 1.08`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub base: String,
    pub usd_per_unit: BTreeMap<String, BigDecimal>,
    pub fetched_at: DateTime<Utc>,
    pub source: String,
}

impl RateSnapshot {
    pub fn new(
        usd_per_unit: BTreeMap<String, BigDecimal>,
        source: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let mut usd_per_unit: BTreeMap<String, BigDecimal> = usd_per_unit
            .into_iter()
            .map(|(code, rate)| (code.to_uppercase(), rate))
            .collect();
        usd_per_unit.insert(BASE_CURRENCY.to_string(), BigDecimal::from(1));
        Self {
            base: BASE_CURRENCY.to_string(),
            usd_per_unit,
            fetched_at,
            source: source.into(),
        }
    }

    pub fn usd_per_unit(&self, currency: &str) -> RateResult<&BigDecimal> {
        self.usd_per_unit
            .get(&currency.to_uppercase())
            .ok_or_else(|| RateError::UnsupportedCurrency(currency.to_uppercase()))
    }

    pub fn supports(&self, currency: &str) -> bool {
        self.usd_per_unit.contains_key(&currency.to_uppercase())
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.fetched_at < ttl
    }
}

/// Live source of a full rate table
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn fetch_snapshot(&self) -> RateResult<RateSnapshot>;

    async fn is_healthy(&self) -> bool;

    fn name(&self) -> &str;
}

pub struct RateCache {
    cache: Arc<dyn Cache<RateSnapshot>>,
    provider: Arc<dyn RateProvider>,
    freshness: chrono::Duration,
    refresh_lock: Mutex<()>,
}

impl RateCache {
    pub fn new(
        cache: Arc<dyn Cache<RateSnapshot>>,
        provider: Arc<dyn RateProvider>,
        freshness: Duration,
    ) -> Self {
        Self {
            cache,
            provider,
            freshness: chrono::Duration::from_std(freshness)
                .unwrap_or_else(|_| chrono::Duration::minutes(15)),
            refresh_lock: Mutex::new(()),
        }
    }

    /// A fresh snapshot if one can be had, else the newest stale one.
    pub async fn current(&self) -> RateResult<RateSnapshot> {
        let cached = self.cached().await;
        if let Some(snapshot) = &cached {
            if snapshot.is_fresh(Utc::now(), self.freshness) {
                return Ok(snapshot.clone());
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // another caller may have refreshed while we waited
        let cached = match self.cached().await {
            Some(snapshot) if snapshot.is_fresh(Utc::now(), self.freshness) => {
                return Ok(snapshot)
            }
            Some(snapshot) => Some(snapshot),
            None => cached,
        };

        match self.provider.fetch_snapshot().await {
            Ok(snapshot) => {
                info!(
                    provider = self.provider.name(),
                    currencies = snapshot.usd_per_unit.len(),
                    "exchange rates refreshed"
                );
                if let Err(e) = self
                    .cache
                    .set(&RateSnapshotKey::usd().to_string(), &snapshot, Some(self.retention()))
                    .await
                {
                    warn!(error = %e, "failed to store rate snapshot");
                }
                Ok(snapshot)
            }
            Err(e) => match cached {
                Some(stale) => {
                    warn!(
                        provider = self.provider.name(),
                        error = %e,
                        fetched_at = %stale.fetched_at,
                        "live rates unavailable, serving stale snapshot"
                    );
                    Ok(stale)
                }
                None => {
                    warn!(provider = self.provider.name(), error = %e, "no exchange rates available");
                    Err(RateError::Unavailable(e.to_string()))
                }
            },
        }
    }

    pub async fn usd_per_unit(&self, currency: &str) -> RateResult<BigDecimal> {
        let snapshot = self.current().await?;
        snapshot.usd_per_unit(currency).cloned()
    }

    async fn cached(&self) -> Option<RateSnapshot> {
        match self.cache.get(&RateSnapshotKey::usd().to_string()).await {
            Ok(hit) => {
                if hit.is_none() {
                    debug!("rate snapshot cache miss");
                }
                hit
            }
            Err(e) => {
                warn!(error = %e, "rate cache read failed, treating as miss");
                None
            }
        }
    }

    fn retention(&self) -> Duration {
        self.freshness
            .to_std()
            .map(|fresh| fresh + STALE_RETENTION)
            .unwrap_or(STALE_RETENTION)
    }
}
