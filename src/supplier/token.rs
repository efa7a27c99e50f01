//! Supplier bearer token lifecycle
//!
//! Tokens come from an OAuth2 client-credentials exchange and are cached
//! until shortly before they expire. Concurrent callers that find no usable
//! token share a single exchange.

use super::error::{SupplierError, SupplierResult};
use crate::cache::keys::supplier::TokenKey;
use crate::cache::Cache;
use crate::config::SupplierConfig;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl SupplierToken {
    /// Usable if it outlives `now + margin`.
    pub fn is_usable(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at - margin > now
    }
}

/// Anything able to mint a fresh token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> SupplierResult<SupplierToken>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// `grant_type=client_credentials` against the supplier's token endpoint.
pub struct ClientCredentialsSource {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl ClientCredentialsSource {
    pub fn new(http: reqwest::Client, config: &SupplierConfig) -> Self {
        Self {
            http,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsSource {
    async fn fetch_token(&self) -> SupplierResult<SupplierToken> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| SupplierError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(SupplierError::RateLimited {
                retry_after: super::http::parse_retry_after(response.headers()),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SupplierError::TokenExchange(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| SupplierError::InvalidResponse(e.to_string()))?;

        Ok(SupplierToken {
            access_token: parsed.access_token,
            expires_at: Utc::now() + Duration::seconds(parsed.expires_in.max(0)),
        })
    }
}

pub struct SupplierTokenProvider {
    source: Arc<dyn TokenSource>,
    cache: Arc<dyn Cache<SupplierToken>>,
    key: String,
    safety_margin: Duration,
    refresh_lock: Mutex<()>,
}

impl SupplierTokenProvider {
    pub fn new(
        source: Arc<dyn TokenSource>,
        cache: Arc<dyn Cache<SupplierToken>>,
        client_id: &str,
        safety_margin: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            key: TokenKey::new(client_id).to_string(),
            safety_margin,
            refresh_lock: Mutex::new(()),
        }
    }

    /// A token valid for at least the safety margin.
    pub async fn token(&self) -> SupplierResult<String> {
        if let Some(token) = self.cached().await {
            return Ok(token.access_token);
        }

        let _guard = self.refresh_lock.lock().await;
        // another caller may have refreshed while we waited
        if let Some(token) = self.cached().await {
            return Ok(token.access_token);
        }
        self.exchange().await
    }

    /// Replace a token the supplier rejected. Callers racing on the same
    /// rejected token end up with one exchange between them.
    pub async fn refresh(&self, rejected: &str) -> SupplierResult<String> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(token) = self.cached().await {
            if token.access_token != rejected {
                return Ok(token.access_token);
            }
        }
        self.invalidate().await;
        self.exchange().await
    }

    pub async fn invalidate(&self) {
        if let Err(e) = self.cache.delete(&self.key).await {
            warn!(error = %e, "failed to drop cached supplier token");
        }
    }

    async fn cached(&self) -> Option<SupplierToken> {
        match self.cache.get(&self.key).await {
            Ok(Some(token)) if token.is_usable(Utc::now(), self.safety_margin) => Some(token),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "supplier token cache read failed");
                None
            }
        }
    }

    async fn exchange(&self) -> SupplierResult<String> {
        debug!("requesting supplier token");
        let token = self.source.fetch_token().await?;

        let usable_for = token.expires_at - self.safety_margin - Utc::now();
        match usable_for.to_std() {
            Ok(ttl) if !ttl.is_zero() => {
                if let Err(e) = self.cache.set(&self.key, &token, Some(ttl)).await {
                    warn!(error = %e, "failed to cache supplier token");
                }
                info!(expires_at = %token.expires_at, "supplier token refreshed");
            }
            _ => warn!(
                expires_at = %token.expires_at,
                "supplier token expires within the safety margin; not caching"
            ),
        }

        Ok(token.access_token)
    }
}
