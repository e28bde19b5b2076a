//! # Settlement Error Types
//!
//! Typed error handling for the settlement pipeline.
//! Everything before money moves returns `Result<T, PaymentError>` to the caller;
//! failures after the processor approved a payment are carried as
//! [`SettlementError`](crate::webhook::SettlementError) instead.

use crate::discount::DiscountError;
use thiserror::Error;

/// Core error type for checkout, verification and persistence operations
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Configuration errors (missing keys, missing markups, stale exchange rate)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed cart or request data
    #[error("Validation error: {0}")]
    Validation(String),

    /// Catalog item referenced by a cart line does not exist
    #[error("Item not found: {item_id}")]
    ItemNotFound { item_id: String },

    /// Catalog item has no list price or weight, so no quote can be made
    #[error("Item cannot be priced: {item_id}")]
    Unpriceable { item_id: String },

    /// Discount code rejected during validation
    #[error("Discount rejected: {0}")]
    Discount(#[from] DiscountError),

    /// Payment processor API error
    #[error("Provider error [{provider}]: {message}")]
    ProviderError { provider: String, message: String },

    /// Network/HTTP error communicating with the processor
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Payment could not be verified against the processor
    #[error("Payment verification failed: {0}")]
    VerificationFailed(String),

    /// Payment id unknown to the processor
    #[error("Payment not found: {payment_id}")]
    PaymentNotFound { payment_id: String },

    /// Order or discount write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Rate limited by provider
    #[error("Rate limited by {provider}, retry after {retry_after_secs} seconds")]
    RateLimited {
        provider: String,
        retry_after_secs: u64,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::NetworkError(_) | PaymentError::RateLimited { .. } => true,
            PaymentError::ProviderError { message, .. } => message.starts_with("HTTP 5"),
            _ => false,
        }
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            PaymentError::Configuration(_) => 500,
            PaymentError::Validation(_) => 400,
            PaymentError::ItemNotFound { .. } => 400,
            PaymentError::Unpriceable { .. } => 400,
            PaymentError::Discount(err) => err.status_code(),
            PaymentError::ProviderError { .. } => 502,
            PaymentError::NetworkError(_) => 503,
            PaymentError::VerificationFailed(_) => 503,
            PaymentError::PaymentNotFound { .. } => 404,
            PaymentError::Persistence(_) => 500,
            PaymentError::RateLimited { .. } => 429,
            PaymentError::Serialization(_) => 500,
            PaymentError::Internal(_) => 500,
        }
    }

    /// Machine-readable code for API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Configuration(_) => "CONFIGURATION",
            PaymentError::Validation(_) => "VALIDATION",
            PaymentError::ItemNotFound { .. } => "ITEM_NOT_FOUND",
            PaymentError::Unpriceable { .. } => "UNPRICEABLE",
            PaymentError::Discount(err) => err.code(),
            PaymentError::ProviderError { .. } => "PROVIDER",
            PaymentError::NetworkError(_) => "NETWORK",
            PaymentError::VerificationFailed(_) => "VERIFICATION_FAILED",
            PaymentError::PaymentNotFound { .. } => "PAYMENT_NOT_FOUND",
            PaymentError::Persistence(_) => "PERSISTENCE",
            PaymentError::RateLimited { .. } => "RATE_LIMITED",
            PaymentError::Serialization(_) => "SERIALIZATION",
            PaymentError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::Serialization(err.to_string())
    }
}

/// Result type alias for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;
