//! Unified error handling for the booking backend
//!
//! Every failure that reaches an HTTP boundary is an [`AppError`]: a kind that
//! groups the cause (domain rule, infrastructure, external party, validation,
//! integrity), a stable machine-readable [`ErrorCode`] the client branches on,
//! an HTTP status, and a user-facing message.

use crate::bookings::types::Price;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable error codes returned to clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Business rules (4xx)
    PriceChanged,
    OfferUnavailable,
    BookingNotFound,
    InvalidState,
    PriceMismatch,

    // Integrity
    InvalidSignature,
    IntegrityError,

    // Validation
    UnsupportedCurrency,
    ValidationError,

    // Infrastructure (5xx)
    DatabaseError,
    CacheError,
    ConfigurationError,

    // External parties
    SupplierUnavailable,
    SupplierError,
    PaymentProviderError,
    RatesUnavailable,
    RateLimited,

    InternalError,
}

/// Business-rule violations. Never retried automatically.
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Supplier re-price differs from what the customer saw
    PriceChanged { original: Price, current: Price },
    /// Offer expired or sold out at the supplier
    OfferUnavailable { offer_id: String },
    BookingNotFound { booking_id: String },
    /// Booking is not in a status that allows the operation
    InvalidState {
        booking_id: String,
        status: String,
        operation: String,
    },
    /// Create request carried a price other than the validated one
    PriceMismatch { expected: Price, provided: Price },
}

/// Database, cache and configuration failures
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Cache { message: String },
    Configuration { message: String },
}

/// Failures of the supplier, the checkout provider or the FX rate source
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Retry budget exhausted against a rate-limiting or flaky supplier
    SupplierUnavailable {
        attempts: u32,
        retry_after: Option<u64>,
    },
    Supplier { message: String },
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    RateSource { message: String },
    /// Our own per-client limiter said no
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
}

/// Untrusted or inconsistent input that must never be applied to state
#[derive(Debug, Clone)]
pub enum IntegrityError {
    InvalidSignature { reason: String },
    MissingIdentifier { field: String },
    PaymentMismatch {
        booking_id: String,
        expected: Price,
        reported: Price,
    },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidField { field: String, reason: String },
    MissingField { field: String },
    UnsupportedCurrency { currency: String },
    InvalidAmount { amount: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Integrity(IntegrityError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
            details: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        })
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PriceChanged { .. } => 409,
                DomainError::OfferUnavailable { .. } => 410,
                DomainError::BookingNotFound { .. } => 404,
                DomainError::InvalidState { .. } => 409,
                DomainError::PriceMismatch { .. } => 422,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::SupplierUnavailable { .. } => 503,
                ExternalError::Supplier { .. } => 502,
                ExternalError::PaymentProvider { .. } => 502,
                ExternalError::RateSource { .. } => 503,
                ExternalError::RateLimit { .. } => 429,
            },
            AppErrorKind::Integrity(err) => match err {
                IntegrityError::InvalidSignature { .. } => 401,
                IntegrityError::MissingIdentifier { .. } => 400,
                IntegrityError::PaymentMismatch { .. } => 409,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PriceChanged { .. } => ErrorCode::PriceChanged,
                DomainError::OfferUnavailable { .. } => ErrorCode::OfferUnavailable,
                DomainError::BookingNotFound { .. } => ErrorCode::BookingNotFound,
                DomainError::InvalidState { .. } => ErrorCode::InvalidState,
                DomainError::PriceMismatch { .. } => ErrorCode::PriceMismatch,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::SupplierUnavailable { .. } => ErrorCode::SupplierUnavailable,
                ExternalError::Supplier { .. } => ErrorCode::SupplierError,
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::RateSource { .. } => ErrorCode::RatesUnavailable,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimited,
            },
            AppErrorKind::Integrity(err) => match err {
                IntegrityError::InvalidSignature { .. } => ErrorCode::InvalidSignature,
                _ => ErrorCode::IntegrityError,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::UnsupportedCurrency { .. } => ErrorCode::UnsupportedCurrency,
                _ => ErrorCode::ValidationError,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PriceChanged { original, current } => format!(
                    "The price changed from {} to {}. Please confirm the new price to continue",
                    original, current
                ),
                DomainError::OfferUnavailable { .. } => {
                    "This offer is no longer available. Please search again".to_string()
                }
                DomainError::BookingNotFound { booking_id } => {
                    format!("Booking '{}' not found", booking_id)
                }
                DomainError::InvalidState {
                    status, operation, ..
                } => format!("Cannot {} a booking that is {}", operation, status),
                DomainError::PriceMismatch { expected, provided } => format!(
                    "Booking amount {} does not match the validated price {}",
                    provided, expected
                ),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::SupplierUnavailable { retry_after, .. } => match retry_after {
                    Some(secs) => format!(
                        "Our travel supplier is busy. Please try again in {} seconds",
                        secs
                    ),
                    None => "Our travel supplier is busy. Please try again shortly".to_string(),
                },
                ExternalError::Supplier { .. } => {
                    "Our travel supplier returned an error. Please try again".to_string()
                }
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::RateSource { .. } => {
                    "Exchange rates are temporarily unavailable".to_string()
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "Rate limit exceeded for {}. Please try again in {} seconds",
                        service, secs
                    ),
                    None => format!("Rate limit exceeded for {}. Please try again later", service),
                },
            },
            AppErrorKind::Integrity(err) => match err {
                IntegrityError::InvalidSignature { .. } => "Invalid signature".to_string(),
                IntegrityError::MissingIdentifier { field } => {
                    format!("Required identifier '{}' is missing", field)
                }
                IntegrityError::PaymentMismatch { .. } => {
                    "Payment does not match the booking and was not applied".to_string()
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::UnsupportedCurrency { currency } => {
                    format!("Currency '{}' is not supported", currency)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::SupplierUnavailable { .. } => true,
                ExternalError::Supplier { .. } => false,
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::RateSource { .. } => true,
                ExternalError::RateLimit { .. } => true,
            },
            AppErrorKind::Integrity(_) => false,
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{}: {}", context, self.user_message()),
            None => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

// Conversions from module errors live next to those errors.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
