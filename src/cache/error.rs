//! Cache-specific error types
//!
//! Callers treat every variant as a miss; none of these ever fail a booking
//! or a SmartSave request on their own.

use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis down, pool exhausted or the connection dropped mid-command
    #[error("cache connection error: {0}")]
    ConnectionError(String),

    /// Stored value no longer matches the type it is read back as
    #[error("cache value could not be (de)serialized: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("cache operation failed: {0}")]
    OperationError(String),
}

#[cfg(feature = "cache")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::ConnectionError(err.to_string())
    }
}

#[cfg(feature = "cache")]
impl From<bb8::RunError<redis::RedisError>> for CacheError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        match err {
            bb8::RunError::User(e) => e.into(),
            bb8::RunError::TimedOut => {
                CacheError::ConnectionError("timed out waiting for a pooled connection".to_string())
            }
        }
    }
}

impl From<CacheError> for crate::error::AppError {
    fn from(err: CacheError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Cache {
            message: err.to_string(),
        }))
    }
}
