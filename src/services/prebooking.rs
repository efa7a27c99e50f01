//! Price re-validation immediately before booking
//!
//! Read-only against our own state: repeating a validation for the same
//! client request id only costs another supplier reprice.

use crate::bookings::types::{OfferSnapshot, Price, ProductType};
use crate::error::{AppError, AppErrorKind, DomainError, ExternalError};
use crate::supplier::{SupplierClient, SupplierError, SupplierOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    Ok,
    PriceChanged,
    OfferUnavailable,
    SupplierUnavailable,
}

/// An offer whose price the supplier confirmed for one client request.
/// Only the validator constructs these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedOffer {
    offer: OfferSnapshot,
    client_request_id: String,
    validated_at: DateTime<Utc>,
}

impl ValidatedOffer {
    pub fn offer(&self) -> &OfferSnapshot {
        &self.offer
    }

    pub fn price(&self) -> &Price {
        self.offer.price()
    }

    pub fn client_request_id(&self) -> &str {
        &self.client_request_id
    }

    pub fn validated_at(&self) -> DateTime<Utc> {
        self.validated_at
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PrebookingResult {
    pub ok: bool,
    pub code: ValidationCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_price: Option<Price>,
    /// Supplier's current view of the offer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<OfferSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// Supplier calls made before giving up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip)]
    validated: Option<ValidatedOffer>,
}

impl PrebookingResult {
    fn failed(code: ValidationCode, original_price: Price) -> Self {
        Self {
            ok: false,
            code,
            price: None,
            original_price: Some(original_price),
            offer: None,
            retry_after_secs: None,
            attempts: None,
            validated: None,
        }
    }

    pub fn validated_offer(&self) -> Option<&ValidatedOffer> {
        self.validated.as_ref()
    }

    /// The validated offer, or the business error that blocks booking.
    pub fn into_validated(self) -> Result<ValidatedOffer, AppError> {
        let details = serde_json::to_value(&self).ok();
        let err = match self.code {
            ValidationCode::Ok => match self.validated {
                Some(validated) => return Ok(validated),
                None => AppError::new(AppErrorKind::External(ExternalError::Supplier {
                    message: "validation succeeded without an offer".to_string(),
                })),
            },
            ValidationCode::PriceChanged => match (self.original_price, self.price) {
                (Some(original), Some(current)) => {
                    AppError::domain(DomainError::PriceChanged { original, current })
                }
                _ => AppError::new(AppErrorKind::External(ExternalError::Supplier {
                    message: "incomplete price change result".to_string(),
                })),
            },
            ValidationCode::SupplierUnavailable => {
                AppError::new(AppErrorKind::External(ExternalError::SupplierUnavailable {
                    attempts: self.attempts.unwrap_or_default(),
                    retry_after: self.retry_after_secs,
                }))
            }
            ValidationCode::OfferUnavailable => AppError::domain(DomainError::OfferUnavailable {
                offer_id: self
                    .offer
                    .as_ref()
                    .map(|o| o.offer_id().to_string())
                    .unwrap_or_default(),
            }),
        };
        Err(match details {
            Some(details) => err.with_details(details),
            None => err,
        })
    }
}

#[derive(Debug, Clone, Error)]
pub enum PrebookingError {
    #[error("offer is a {offer} offer but {requested} was requested")]
    ProductMismatch {
        requested: ProductType,
        offer: ProductType,
    },

    #[error("client_request_id is required")]
    MissingClientRequestId,

    #[error(transparent)]
    Supplier(#[from] SupplierError),
}

impl From<PrebookingError> for AppError {
    fn from(err: PrebookingError) -> Self {
        match err {
            PrebookingError::ProductMismatch { .. } => {
                AppError::invalid_field("product_type", err.to_string())
            }
            PrebookingError::MissingClientRequestId => {
                AppError::invalid_field("client_request_id", err.to_string())
            }
            PrebookingError::Supplier(e) => e.into(),
        }
    }
}

pub struct PrebookingValidator {
    supplier: Arc<SupplierClient>,
}

impl PrebookingValidator {
    pub fn new(supplier: Arc<SupplierClient>) -> Self {
        Self { supplier }
    }

    pub async fn validate(
        &self,
        product_type: ProductType,
        offer: &OfferSnapshot,
        client_request_id: &str,
    ) -> Result<PrebookingResult, PrebookingError> {
        if offer.product_type() != product_type {
            return Err(PrebookingError::ProductMismatch {
                requested: product_type,
                offer: offer.product_type(),
            });
        }
        if client_request_id.trim().is_empty() {
            return Err(PrebookingError::MissingClientRequestId);
        }

        let displayed = offer.price().clone();
        let fresh = match self.supplier.reprice(offer).await {
            Ok(SupplierOutcome::Ready(fresh)) => fresh,
            Ok(SupplierOutcome::TemporarilyUnavailable {
                attempts,
                retry_after,
            }) => {
                warn!(
                    client_request_id,
                    offer_id = offer.offer_id(),
                    attempts,
                    "supplier unavailable during prebooking"
                );
                let mut result = PrebookingResult::failed(ValidationCode::SupplierUnavailable, displayed);
                result.retry_after_secs = retry_after.map(|d| d.as_secs());
                result.attempts = Some(attempts);
                return Ok(result);
            }
            Err(SupplierError::OfferUnavailable { .. }) => {
                info!(client_request_id, offer_id = offer.offer_id(), "offer no longer available");
                let mut result = PrebookingResult::failed(ValidationCode::OfferUnavailable, displayed);
                result.offer = Some(offer.clone());
                return Ok(result);
            }
            Err(e) => return Err(e.into()),
        };

        let current = fresh.price().clone();
        if current == displayed {
            return Ok(PrebookingResult {
                ok: true,
                code: ValidationCode::Ok,
                price: Some(current),
                original_price: None,
                offer: Some(fresh.clone()),
                retry_after_secs: None,
                attempts: None,
                validated: Some(ValidatedOffer {
                    offer: fresh,
                    client_request_id: client_request_id.to_string(),
                    validated_at: Utc::now(),
                }),
            });
        }

        info!(
            client_request_id,
            offer_id = offer.offer_id(),
            original = %displayed,
            current = %current,
            "price changed since display"
        );
        Ok(PrebookingResult {
            ok: false,
            code: ValidationCode::PriceChanged,
            price: Some(current),
            original_price: Some(displayed),
            offer: Some(fresh),
            retry_after_secs: None,
            attempts: None,
            validated: None,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Test-only constructor for code that consumes validated offers.
    pub fn validated(offer: OfferSnapshot, client_request_id: &str) -> ValidatedOffer {
        ValidatedOffer {
            offer,
            client_request_id: client_request_id.to_string(),
            validated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookings::types::fixtures::hotel_offer;
    use crate::error::ErrorCode;
    use crate::cache::InMemoryCache;
    use crate::supplier::token::testing::CountingSource;
    use crate::supplier::token::SupplierToken;
    use crate::supplier::{RetryPolicy, SearchParams, SupplierApi, SupplierResult, SupplierTokenProvider};
    use async_trait::async_trait;
    use std::time::Duration;

    struct RepricingApi {
        result: SupplierResult<OfferSnapshot>,
    }

    #[async_trait]
    impl SupplierApi for RepricingApi {
        async fn search(
            &self,
            _token: &str,
            _params: &SearchParams,
            _currency: &str,
        ) -> SupplierResult<Vec<OfferSnapshot>> {
            Ok(vec![])
        }

        async fn reprice(
            &self,
            _token: &str,
            _offer: &OfferSnapshot,
            _currency: &str,
        ) -> SupplierResult<OfferSnapshot> {
            self.result.clone()
        }
    }

    fn validator(result: SupplierResult<OfferSnapshot>) -> PrebookingValidator {
        let tokens = Arc::new(SupplierTokenProvider::new(
            Arc::new(CountingSource::default()),
            Arc::new(InMemoryCache::<SupplierToken>::default()),
            "client-abc",
            chrono::Duration::seconds(60),
        ));
        let client = SupplierClient::new(
            Arc::new(RepricingApi { result }),
            tokens,
            RetryPolicy::new(2, Duration::from_millis(1)).with_max_delay(Duration::from_millis(5)),
            "USD",
        );
        PrebookingValidator::new(Arc::new(client))
    }

    #[tokio::test]
    async fn same_price_is_ok() {
        let offer = hotel_offer(45_000, "USD");
        let result = validator(Ok(offer.clone()))
            .validate(ProductType::Hotel, &offer, "req-1")
            .await
            .unwrap();

        assert!(result.ok);
        assert_eq!(result.code, ValidationCode::Ok);
        let validated = result.into_validated().unwrap();
        assert_eq!(validated.price(), &Price::new(45_000, "USD"));
        assert_eq!(validated.client_request_id(), "req-1");
    }

    #[tokio::test]
    async fn drift_blocks_booking() {
        let offer = hotel_offer(45_000, "USD");
        let result = validator(Ok(hotel_offer(47_500, "USD")))
            .validate(ProductType::Hotel, &offer, "req-1")
            .await
            .unwrap();

        assert!(!result.ok);
        assert_eq!(result.code, ValidationCode::PriceChanged);
        assert_eq!(result.original_price, Some(Price::new(45_000, "USD")));
        assert_eq!(result.price, Some(Price::new(47_500, "USD")));
        assert!(result.validated_offer().is_none());

        let err = result.into_validated().unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::PriceChanged);
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn sold_out_has_its_own_code() {
        let offer = hotel_offer(45_000, "USD");
        let result = validator(Err(SupplierError::OfferUnavailable {
            offer_id: "HOTEL-OFFER-1".to_string(),
        }))
        .validate(ProductType::Hotel, &offer, "req-1")
        .await
        .unwrap();

        assert_eq!(result.code, ValidationCode::OfferUnavailable);
        assert_eq!(
            result.into_validated().unwrap_err().error_code(),
            ErrorCode::OfferUnavailable
        );
    }

    #[tokio::test]
    async fn rate_limited_supplier_is_temporarily_unavailable() {
        let offer = hotel_offer(45_000, "USD");
        let result = validator(Err(SupplierError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        }))
        .validate(ProductType::Hotel, &offer, "req-1")
        .await
        .unwrap();

        assert_eq!(result.code, ValidationCode::SupplierUnavailable);
        assert_eq!(result.retry_after_secs, Some(3));
        assert_eq!(result.attempts, Some(2));

        let err = result.into_validated().unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::SupplierUnavailable);
        assert!(matches!(
            err.kind,
            AppErrorKind::External(ExternalError::SupplierUnavailable {
                attempts: 2,
                retry_after: Some(3),
            })
        ));
    }

    #[tokio::test]
    async fn product_type_must_match_offer() {
        let offer = hotel_offer(45_000, "USD");
        let err = validator(Ok(offer.clone()))
            .validate(ProductType::Flight, &offer, "req-1")
            .await
            .unwrap_err();
        assert!(matches!(err, PrebookingError::ProductMismatch { .. }));
    }
}
