use std::time::Duration;
use thiserror::Error;

pub type SupplierResult<T> = Result<T, SupplierError>;

#[derive(Debug, Clone, Error)]
pub enum SupplierError {
    #[error("supplier rejected the bearer token")]
    Unauthorized,

    #[error("supplier rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("offer {offer_id} is no longer available")]
    OfferUnavailable { offer_id: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("supplier returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("invalid supplier response: {0}")]
    InvalidResponse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),
}

impl SupplierError {
    /// Worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            SupplierError::RateLimited { .. } | SupplierError::Network(_) => true,
            SupplierError::Upstream { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SupplierError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<SupplierError> for crate::error::AppError {
    fn from(err: SupplierError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, ExternalError};

        match err {
            SupplierError::OfferUnavailable { offer_id } => {
                AppError::domain(DomainError::OfferUnavailable { offer_id })
            }
            SupplierError::InvalidRequest(reason) => AppError::invalid_field("search", reason),
            e if e.is_transient() => {
                AppError::new(AppErrorKind::External(ExternalError::SupplierUnavailable {
                    attempts: 1,
                    retry_after: e.retry_after().map(|d| d.as_secs()),
                }))
            }
            e => AppError::new(AppErrorKind::External(ExternalError::Supplier {
                message: e.to_string(),
            })),
        }
    }
}
