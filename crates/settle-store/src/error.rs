//! sqlx error classification

use settle_core::PaymentError;
use sqlx::error::{DatabaseError, ErrorKind};

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error.as_database_error().map(DatabaseError::kind),
        Some(ErrorKind::UniqueViolation)
    )
}

pub(crate) fn storage_error(error: sqlx::Error) -> PaymentError {
    PaymentError::Persistence(error.to_string())
}

/// Stored JSON or text that no longer decodes
pub(crate) fn corrupt(column: &str, error: impl std::fmt::Display) -> PaymentError {
    PaymentError::Serialization(format!("column {}: {}", column, error))
}
