//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Rejection of client input before it reaches storage.
///
/// Storage and transport failures have their own types in `ferrobank-infra`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Non-positive or unparseable row id.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A currency code outside the supported set.
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
