use super::client::SupplierApi;
use super::error::{SupplierError, SupplierResult};
use super::types::SearchParams;
use crate::bookings::types::OfferSnapshot;
use crate::config::SupplierConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// `Retry-After` in its delta-seconds form; HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    search: &'a SearchParams,
    currency: &'a str,
}

#[derive(Serialize)]
struct PricingRequest<'a> {
    offer: &'a OfferSnapshot,
    currency: &'a str,
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

/// JSON-over-HTTPS supplier adapter.
pub struct HttpSupplierApi {
    http: Client,
    base_url: String,
}

impl HttpSupplierApi {
    pub fn new(config: &SupplierConfig) -> SupplierResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SupplierError::Network(format!("failed to initialize HTTP client: {}", e)))?;

        Ok(Self::with_client(http, &config.base_url))
    }

    pub fn with_client(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn http_client(&self) -> &Client {
        &self.http
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
        body: &B,
        offer_id: Option<&str>,
    ) -> SupplierResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "supplier request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| SupplierError::Network(e.to_string()))?;

        let response = check_status(response, offer_id).await?;
        let text = response
            .text()
            .await
            .map_err(|e| SupplierError::Network(e.to_string()))?;
        let envelope: DataEnvelope<T> = serde_json::from_str(&text)
            .map_err(|e| SupplierError::InvalidResponse(e.to_string()))?;
        Ok(envelope.data)
    }
}

async fn check_status(response: Response, offer_id: Option<&str>) -> SupplierResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED => Err(SupplierError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => Err(SupplierError::RateLimited {
            retry_after: parse_retry_after(response.headers()),
        }),
        StatusCode::NOT_FOUND | StatusCode::GONE if offer_id.is_some() => {
            Err(SupplierError::OfferUnavailable {
                offer_id: offer_id.unwrap_or_default().to_string(),
            })
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            let body = response.text().await.unwrap_or_default();
            Err(SupplierError::InvalidRequest(body))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(SupplierError::Upstream {
                status: status.as_u16(),
                message: body,
            })
        }
    }
}

#[async_trait]
impl SupplierApi for HttpSupplierApi {
    async fn search(
        &self,
        token: &str,
        params: &SearchParams,
        currency: &str,
    ) -> SupplierResult<Vec<OfferSnapshot>> {
        let path = format!("/v1/{}/offers/search", params.product_type());
        self.post(&path, token, &SearchRequest { search: params, currency }, None)
            .await
    }

    async fn reprice(
        &self,
        token: &str,
        offer: &OfferSnapshot,
        currency: &str,
    ) -> SupplierResult<OfferSnapshot> {
        let path = format!("/v1/{}/offers/pricing", offer.product_type());
        let priced: OfferSnapshot = self
            .post(
                &path,
                token,
                &PricingRequest { offer, currency },
                Some(offer.offer_id()),
            )
            .await?;

        if priced.offer_id() != offer.offer_id() {
            return Err(SupplierError::InvalidResponse(format!(
                "priced offer {} does not match requested {}",
                priced.offer_id(),
                offer.offer_id()
            )));
        }
        Ok(priced)
    }
}
