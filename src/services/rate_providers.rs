//! Rate providers for fetching exchange rates
//!
//! - FixedRateProvider: static table for local development and tests
//! - HttpRateProvider: live JSON rates API quoted against USD

use super::rate_cache::{RateError, RateProvider, RateResult, RateSnapshot, BASE_CURRENCY};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Decimal places kept after inverting a quoted rate
const RATE_SCALE: i64 = 10;

/// Fixed USD table
pub struct FixedRateProvider {
    rates: BTreeMap<String, BigDecimal>,
}

impl FixedRateProvider {
    pub fn new() -> Self {
        let table = [
            ("EUR", "1.08"),
            ("GBP", "1.27"),
            ("CAD", "0.74"),
            ("AUD", "0.66"),
            ("CHF", "1.13"),
            ("JPY", "0.0067"),
            ("NGN", "0.00065"),
        ];
        let rates = table
            .iter()
            .filter_map(|(code, rate)| {
                BigDecimal::from_str(rate)
                    .ok()
                    .map(|r| (code.to_string(), r))
            })
            .collect();
        Self { rates }
    }

    pub fn empty() -> Self {
        Self {
            rates: BTreeMap::new(),
        }
    }

    pub fn with_rate(mut self, currency: &str, usd_per_unit: BigDecimal) -> Self {
        self.rates.insert(currency.to_uppercase(), usd_per_unit);
        self
    }
}

impl Default for FixedRateProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateProvider for FixedRateProvider {
    async fn fetch_snapshot(&self) -> RateResult<RateSnapshot> {
        Ok(RateSnapshot::new(self.rates.clone(), "fixed", Utc::now()))
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "FixedRateProvider"
    }
}

/// `{"base": "USD", "rates": {"EUR": 0.9259, ...}}`, units of each
/// currency per one USD.
#[derive(Debug, Deserialize)]
struct RatesResponse {
    #[serde(default)]
    base: Option<String>,
    rates: BTreeMap<String, serde_json::Value>,
}

pub struct HttpRateProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    healthy: AtomicBool,
}

impl HttpRateProvider {
    pub fn new(api_url: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(client, api_url, api_key)
    }

    pub fn with_client(client: reqwest::Client, api_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            healthy: AtomicBool::new(true),
        }
    }

    async fn fetch(&self) -> RateResult<RateSnapshot> {
        let mut request = self
            .client
            .get(&self.api_url)
            .query(&[("base", BASE_CURRENCY)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RateError::Provider(format!("request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RateError::Provider(format!("rates API returned {}", status)));
        }
        let body: RatesResponse = response
            .json()
            .await
            .map_err(|e| RateError::Provider(format!("invalid rates payload: {}", e)))?;

        if let Some(base) = &body.base {
            if !base.eq_ignore_ascii_case(BASE_CURRENCY) {
                return Err(RateError::Provider(format!(
                    "rates quoted against {} instead of {}",
                    base, BASE_CURRENCY
                )));
            }
        }

        Ok(RateSnapshot::new(invert_quotes(&body.rates), "live", Utc::now()))
    }
}

/// Turn "units per USD" quotes into "USD per unit", dropping anything that
/// is not a positive number.
fn invert_quotes(quotes: &BTreeMap<String, serde_json::Value>) -> BTreeMap<String, BigDecimal> {
    let zero = BigDecimal::from(0);
    quotes
        .iter()
        .filter_map(|(code, value)| {
            let raw = match value {
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::String(s) => s.clone(),
                _ => return None,
            };
            match BigDecimal::from_str(&raw) {
                Ok(units_per_usd) if units_per_usd > zero => Some((
                    code.to_uppercase(),
                    (BigDecimal::from(1) / units_per_usd).round(RATE_SCALE),
                )),
                _ => {
                    debug!(currency = %code, raw = %raw, "skipping unusable quote");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn fetch_snapshot(&self) -> RateResult<RateSnapshot> {
        let result = self.fetch().await;
        if let Err(e) = &result {
            warn!(url = %self.api_url, error = %e, "live rate fetch failed");
        }
        self.healthy.store(result.is_ok(), Ordering::Relaxed);
        result
    }

    /// Reflects the outcome of the most recent fetch.
    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn name(&self) -> &str {
        "HttpRateProvider"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_provider_table() {
        let provider = FixedRateProvider::new();
        let snapshot = provider.fetch_snapshot().await.unwrap();

        assert_eq!(snapshot.base, "USD");
        assert_eq!(snapshot.usd_per_unit("USD").unwrap(), &BigDecimal::from(1));
        assert_eq!(
            snapshot.usd_per_unit("EUR").unwrap(),
            &BigDecimal::from_str("1.08").unwrap()
        );
        assert!(provider.is_healthy().await);
    }

    #[tokio::test]
    async fn test_fixed_provider_override() {
        let provider = FixedRateProvider::empty().with_rate("sek", BigDecimal::from_str("0.095").unwrap());
        let snapshot = provider.fetch_snapshot().await.unwrap();

        assert!(snapshot.supports("SEK"));
        assert!(!snapshot.supports("EUR"));
    }

    #[test]
    fn test_quotes_are_inverted_and_filtered() {
        let quotes: BTreeMap<String, serde_json::Value> = serde_json::from_str(
            r#"{"EUR": 0.8, "GBP": "0.5", "BAD": -1, "NUL": null, "ZER": 0}"#,
        )
        .unwrap();
        let rates = invert_quotes(&quotes);

        assert_eq!(rates.len(), 2);
        assert_eq!(rates["EUR"], BigDecimal::from_str("1.25").unwrap());
        assert_eq!(rates["GBP"], BigDecimal::from(2));
    }

    #[tokio::test]
    async fn test_unreachable_api_reports_unhealthy() {
        let provider = HttpRateProvider::new("http://127.0.0.1:9/rates".to_string(), None);
        assert!(provider.fetch_snapshot().await.is_err());
        assert!(!provider.is_healthy().await);
    }
}
