//! FX-SmartSave: cheapest settlement currency for one purchase
//!
//! Every option, USD included, is converted with the current rate table and
//! charged the same conversion fee. The option with the lowest effective cost
//! wins; ties go to USD, then to currency code order.
//!
//! The recommendation is advisory. Whatever the customer picks is stored as
//! checkout metadata; the booking's own amount is what gets charged.

use super::rate_cache::{RateCache, RateError, RateSnapshot, BASE_CURRENCY};
use super::rate_limiter::RateLimiter;
use crate::bookings::types::ProductType;
use crate::cache::keys::fx::SmartSaveResultKey;
use crate::cache::Cache;
use crate::config::SmartSaveConfig;
use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const RATE_LIMIT_ACTION: &str = "smart_save";
const MAX_OPTIONS: usize = 10;
const OUTPUT_SCALE: i64 = 6;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SmartSaveError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("too many requests, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    Rates(#[from] RateError),
}

impl SmartSaveError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SmartSaveError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<SmartSaveError> for AppError {
    fn from(err: SmartSaveError) -> Self {
        match err {
            SmartSaveError::Validation { field, reason } => AppError::invalid_field(field, reason),
            SmartSaveError::RateLimited { retry_after_secs } => {
                AppError::new(AppErrorKind::External(ExternalError::RateLimit {
                    service: RATE_LIMIT_ACTION.to_string(),
                    retry_after: Some(retry_after_secs),
                }))
            }
            SmartSaveError::Rates(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceOption {
    pub currency: String,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmartSaveRequest {
    pub product_type: ProductType,
    pub prices: Vec<PriceOption>,
    /// Free-form client context (route, dates). Logged, not part of the
    /// computation or the cache key.
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxQuote {
    pub currency: String,
    pub local_amount: BigDecimal,
    pub converted_usd: BigDecimal,
    pub effective_cost_usd: BigDecimal,
    pub rate: BigDecimal,
    pub fee_percent: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartSaveResult {
    pub product_type: ProductType,
    pub quotes: Vec<FxQuote>,
    pub recommended_currency: String,
    /// Effective cost of the USD option, when one was offered
    pub baseline_usd: Option<BigDecimal>,
    pub savings_usd: BigDecimal,
    /// False when the savings are too small to be worth showing
    pub show_recommendation: bool,
    pub rates_as_of: DateTime<Utc>,
}

impl SmartSaveResult {
    pub fn recommended(&self) -> Option<&FxQuote> {
        self.quotes
            .iter()
            .find(|q| q.currency == self.recommended_currency)
    }
}

#[derive(Debug, Clone)]
pub struct SmartSaveSettings {
    pub fee_percent: BigDecimal,
    pub min_savings_usd: BigDecimal,
    pub result_ttl: Duration,
}

impl From<&SmartSaveConfig> for SmartSaveSettings {
    fn from(config: &SmartSaveConfig) -> Self {
        Self {
            fee_percent: config.fee_percent.clone(),
            min_savings_usd: config.min_savings_usd.clone(),
            result_ttl: Duration::from_secs(config.result_ttl_secs.max(1)),
        }
    }
}

/// Uppercased codes, positive amounts, no duplicate currency, sorted by code.
fn normalize(prices: &[PriceOption]) -> Result<Vec<PriceOption>, SmartSaveError> {
    if prices.is_empty() {
        return Err(SmartSaveError::invalid("prices", "at least one price option is required"));
    }
    if prices.len() > MAX_OPTIONS {
        return Err(SmartSaveError::invalid(
            "prices",
            format!("at most {} price options", MAX_OPTIONS),
        ));
    }

    let zero = BigDecimal::from(0);
    let mut normalized = Vec::with_capacity(prices.len());
    for option in prices {
        let currency = option.currency.trim().to_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(SmartSaveError::invalid(
                "currency",
                format!("'{}' is not an ISO 4217 code", option.currency),
            ));
        }
        if option.amount <= zero {
            return Err(SmartSaveError::invalid(
                "amount",
                format!("{} amount must be positive", currency),
            ));
        }
        normalized.push(PriceOption {
            currency,
            amount: option.amount.normalized(),
        });
    }

    normalized.sort_by(|a, b| a.currency.cmp(&b.currency));
    if let Some(pair) = normalized.windows(2).find(|w| w[0].currency == w[1].currency) {
        return Err(SmartSaveError::invalid(
            "currency",
            format!("{} listed more than once", pair[0].currency),
        ));
    }
    Ok(normalized)
}

fn cache_key(product_type: ProductType, options: &[PriceOption]) -> SmartSaveResultKey {
    let mut hasher = Sha256::new();
    hasher.update(product_type.as_str().as_bytes());
    for option in options {
        hasher.update(b"|");
        hasher.update(option.currency.as_bytes());
        hasher.update(b"=");
        hasher.update(option.amount.to_string().as_bytes());
    }
    SmartSaveResultKey::new(hex::encode(hasher.finalize()))
}

/// Pure comparison over already-normalized options.
pub fn compare(
    product_type: ProductType,
    options: &[PriceOption],
    rates: &RateSnapshot,
    settings: &SmartSaveSettings,
) -> Result<SmartSaveResult, SmartSaveError> {
    let zero = BigDecimal::from(0);
    let hundred = BigDecimal::from(100);

    let mut quotes = Vec::with_capacity(options.len());
    for option in options {
        let rate = rates.usd_per_unit(&option.currency)?.clone();
        let fee_percent = settings.fee_percent.clone();
        let converted = &option.amount * &rate;
        let effective = &converted * (BigDecimal::from(1) + &fee_percent / &hundred);
        quotes.push(FxQuote {
            currency: option.currency.clone(),
            local_amount: option.amount.clone(),
            converted_usd: converted.round(OUTPUT_SCALE),
            effective_cost_usd: effective.round(OUTPUT_SCALE),
            rate,
            fee_percent,
        });
    }

    let mut best: Option<&FxQuote> = None;
    for quote in &quotes {
        best = match best {
            None => Some(quote),
            Some(current) => {
                let cheaper = quote.effective_cost_usd < current.effective_cost_usd;
                let tie_to_usd = quote.effective_cost_usd == current.effective_cost_usd
                    && quote.currency == BASE_CURRENCY;
                if cheaper || tie_to_usd {
                    Some(quote)
                } else {
                    Some(current)
                }
            }
        };
    }
    let best = best.ok_or_else(|| SmartSaveError::invalid("prices", "no price options"))?;

    let baseline = quotes
        .iter()
        .find(|q| q.currency == BASE_CURRENCY)
        .map(|q| q.effective_cost_usd.clone());
    let savings = match &baseline {
        Some(baseline) if baseline > &best.effective_cost_usd => {
            baseline - &best.effective_cost_usd
        }
        _ => zero.clone(),
    };

    Ok(SmartSaveResult {
        product_type,
        recommended_currency: best.currency.clone(),
        show_recommendation: savings > settings.min_savings_usd,
        baseline_usd: baseline,
        savings_usd: savings,
        rates_as_of: rates.fetched_at,
        quotes,
    })
}

pub struct FxSmartSaveEngine {
    rates: Arc<RateCache>,
    results: Arc<dyn Cache<SmartSaveResult>>,
    limiter: Arc<dyn RateLimiter>,
    settings: SmartSaveSettings,
}

impl FxSmartSaveEngine {
    pub fn new(
        rates: Arc<RateCache>,
        results: Arc<dyn Cache<SmartSaveResult>>,
        limiter: Arc<dyn RateLimiter>,
        settings: SmartSaveSettings,
    ) -> Self {
        Self {
            rates,
            results,
            limiter,
            settings,
        }
    }

    /// Rate-limited per `client`; identical inputs inside the result TTL are
    /// served from cache.
    pub async fn recommend(
        &self,
        client: &str,
        request: &SmartSaveRequest,
    ) -> Result<SmartSaveResult, SmartSaveError> {
        let decision = self.limiter.check(RATE_LIMIT_ACTION, client).await;
        if !decision.allowed {
            warn!(client, retry_after_secs = decision.retry_after_secs, "smart save rate limit exceeded");
            return Err(SmartSaveError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            });
        }

        let options = normalize(&request.prices)?;
        let key = cache_key(request.product_type, &options).to_string();

        match self.results.get(&key).await {
            Ok(Some(hit)) => {
                debug!(key = %key, "smart save result cache hit");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "smart save cache read failed"),
        }

        let snapshot = self.rates.current().await?;
        let result = compare(request.product_type, &options, &snapshot, &self.settings)?;

        if let Err(e) = self
            .results
            .set(&key, &result, Some(self.settings.result_ttl))
            .await
        {
            warn!(error = %e, "failed to cache smart save result");
        }

        info!(
            client,
            product_type = %request.product_type,
            options = options.len(),
            recommended = %result.recommended_currency,
            savings_usd = %result.savings_usd,
            shown = result.show_recommendation,
            context = ?request.context,
            "smart save computed"
        );
        Ok(result)
    }

    pub async fn rates(&self) -> Result<RateSnapshot, SmartSaveError> {
        Ok(self.rates.current().await?)
    }
}
