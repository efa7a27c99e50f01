//! Database error types

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    UniqueViolation { constraint: String },
    ConnectionError { message: String },
    PoolExhausted,
    /// Stored row could not be turned into a domain value
    Corrupt { message: String },
    QueryError { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{}", describe(&self.kind))]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

fn describe(kind: &DatabaseErrorKind) -> String {
    match kind {
        DatabaseErrorKind::NotFound { entity, id } => format!("{} '{}' not found", entity, id),
        DatabaseErrorKind::UniqueViolation { constraint } => {
            format!("unique constraint violated: {}", constraint)
        }
        DatabaseErrorKind::ConnectionError { message } => {
            format!("database connection error: {}", message)
        }
        DatabaseErrorKind::PoolExhausted => "database pool exhausted".to_string(),
        DatabaseErrorKind::Corrupt { message } => format!("corrupt row: {}", message),
        DatabaseErrorKind::QueryError { message } => format!("query failed: {}", message),
    }
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Corrupt {
            message: message.into(),
        })
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::PoolExhausted,
            sqlx::Error::Io(e) => DatabaseErrorKind::ConnectionError {
                message: e.to_string(),
            },
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db.constraint().unwrap_or("unknown").to_string(),
                }
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseErrorKind::Corrupt {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::QueryError {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::ConnectionError { .. } | DatabaseErrorKind::PoolExhausted
        )
    }
}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable: err.is_retryable(),
        }))
    }
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;
