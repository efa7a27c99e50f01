use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Checkout session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::SessionNotFound { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::SessionNotFound { .. } => 404,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::WebhookVerificationError { .. } => 401,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::SessionNotFound { .. } => "Checkout session not found".to_string(),
            PaymentError::NetworkError { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment provider. Please retry shortly".to_string()
            }
            PaymentError::WebhookVerificationError { .. } => {
                "Invalid webhook signature".to_string()
            }
            PaymentError::ProviderError { .. } => "Payment provider returned an error".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, IntegrityError};

        match err {
            PaymentError::WebhookVerificationError { message } => {
                AppError::new(AppErrorKind::Integrity(IntegrityError::InvalidSignature {
                    reason: message,
                }))
            }
            PaymentError::ValidationError { message, field } => {
                AppError::invalid_field(field.unwrap_or_else(|| "payment".to_string()), message)
            }
            other => AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "checkout".to_string(),
                message: other.to_string(),
                is_retryable: other.is_retryable(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::ValidationError {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::RateLimitError {
                message: "limited".to_string(),
                retry_after_seconds: Some(30)
            }
            .http_status_code(),
            429
        );
    }

    #[test]
    fn bad_signature_becomes_unauthorized() {
        let err: AppError = PaymentError::WebhookVerificationError {
            message: "timestamp outside tolerance".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::SessionNotFound {
            session_id: "cs_1".to_string()
        }
        .is_retryable());
    }
}
