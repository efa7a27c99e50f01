//! Supplier calls with token management and rate-limit retries

use super::error::{SupplierError, SupplierResult};
use super::retry::{RetryOutcome, RetryPolicy};
use super::token::SupplierTokenProvider;
use super::types::SearchParams;
use crate::bookings::types::OfferSnapshot;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Raw supplier surface. One call, one HTTP exchange, no retries.
#[async_trait]
pub trait SupplierApi: Send + Sync {
    async fn search(
        &self,
        token: &str,
        params: &SearchParams,
        currency: &str,
    ) -> SupplierResult<Vec<OfferSnapshot>>;

    /// Current price of `offer`, quoted in `currency`.
    async fn reprice(
        &self,
        token: &str,
        offer: &OfferSnapshot,
        currency: &str,
    ) -> SupplierResult<OfferSnapshot>;
}

/// A retried call either produced a value or ran out of attempts against a
/// rate-limiting supplier. Permanent failures are returned as `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum SupplierOutcome<T> {
    Ready(T),
    TemporarilyUnavailable {
        attempts: u32,
        retry_after: Option<Duration>,
    },
}

impl<T> SupplierOutcome<T> {
    fn from_retry(outcome: RetryOutcome<T>) -> SupplierResult<Self> {
        match outcome {
            RetryOutcome::Success(value) => Ok(SupplierOutcome::Ready(value)),
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => Ok(SupplierOutcome::TemporarilyUnavailable {
                attempts,
                retry_after: last_error.retry_after(),
            }),
            RetryOutcome::Failed(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlexibleMatch {
    /// Days after the requested date that produced results
    pub day_offset: u32,
    pub params: SearchParams,
    pub offers: Vec<OfferSnapshot>,
}

pub struct SupplierClient {
    api: Arc<dyn SupplierApi>,
    tokens: Arc<SupplierTokenProvider>,
    policy: RetryPolicy,
    currency: String,
}

impl SupplierClient {
    pub fn new(
        api: Arc<dyn SupplierApi>,
        tokens: Arc<SupplierTokenProvider>,
        policy: RetryPolicy,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            api,
            tokens,
            policy,
            currency: currency.into().to_uppercase(),
        }
    }

    /// Currency every price from this client is quoted in.
    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub async fn search(
        &self,
        params: &SearchParams,
    ) -> SupplierResult<SupplierOutcome<Vec<OfferSnapshot>>> {
        params.validate().map_err(SupplierError::InvalidRequest)?;
        let outcome = self.policy.run("search", |_| self.search_once(params)).await;
        SupplierOutcome::from_retry(outcome)
    }

    pub async fn reprice(
        &self,
        offer: &OfferSnapshot,
    ) -> SupplierResult<SupplierOutcome<OfferSnapshot>> {
        let outcome = self.policy.run("reprice", |_| self.reprice_once(offer)).await;
        SupplierOutcome::from_retry(outcome)
    }

    /// Try the requested dates, then each following day up to `extra_days`,
    /// stopping at the first day with offers. A day whose search keeps being
    /// rate limited ends the walk instead of moving on.
    pub async fn search_flexible_dates(
        &self,
        params: &SearchParams,
        extra_days: u32,
    ) -> SupplierResult<SupplierOutcome<Option<FlexibleMatch>>> {
        for day_offset in 0..=extra_days {
            let shifted = params.shifted(i64::from(day_offset));
            match self.search(&shifted).await? {
                SupplierOutcome::Ready(offers) if !offers.is_empty() => {
                    info!(day_offset, offers = offers.len(), "flexible search matched");
                    return Ok(SupplierOutcome::Ready(Some(FlexibleMatch {
                        day_offset,
                        params: shifted,
                        offers,
                    })));
                }
                SupplierOutcome::Ready(_) => continue,
                SupplierOutcome::TemporarilyUnavailable {
                    attempts,
                    retry_after,
                } => {
                    warn!(day_offset, attempts, "flexible search stopped by supplier rate limit");
                    return Ok(SupplierOutcome::TemporarilyUnavailable {
                        attempts,
                        retry_after,
                    });
                }
            }
        }
        Ok(SupplierOutcome::Ready(None))
    }

    async fn search_once(&self, params: &SearchParams) -> SupplierResult<Vec<OfferSnapshot>> {
        let token = self.tokens.token().await?;
        match self.api.search(&token, params, &self.currency).await {
            Err(SupplierError::Unauthorized) => {
                warn!("supplier rejected token during search, refreshing");
                let token = self.tokens.refresh(&token).await?;
                self.api.search(&token, params, &self.currency).await
            }
            other => other,
        }
    }

    async fn reprice_once(&self, offer: &OfferSnapshot) -> SupplierResult<OfferSnapshot> {
        let token = self.tokens.token().await?;
        match self.api.reprice(&token, offer, &self.currency).await {
            Err(SupplierError::Unauthorized) => {
                warn!("supplier rejected token during reprice, refreshing");
                let token = self.tokens.refresh(&token).await?;
                self.api.reprice(&token, offer, &self.currency).await
            }
            other => other,
        }
    }
}
