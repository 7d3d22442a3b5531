//! Unified error handling for the charging engine
//!
//! Every failure surfaced by the engine, its collaborators and the admin
//! operations is expressed as an [`AppError`]. Partial coverage of a usage
//! request is never an error.

use thiserror::Error;

/// Main application error type
///
/// All errors in the workspace should be converted to this type.
/// `error_code()` gives a stable identifier for logs and callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    // ==================== Storage Errors ====================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache connection failed: {0}")]
    CacheConnection(String),

    // ==================== Charging Errors ====================
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Balance {balance} not found on account {account}")]
    BalanceNotFound { account: String, balance: String },

    #[error("Insufficient credit on account {account}: required {required}, available {available}")]
    InsufficientCredit {
        account: String,
        required: String,
        available: String,
    },

    #[error("Rating engine unavailable: {0}")]
    RatingUnavailable(String),

    #[error("Rating failed: {0}")]
    Rating(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ==================== Filter Errors ====================
    #[error("Broken reference: {0}")]
    BrokenReference(String),

    #[error("Invalid filter: {0}")]
    FilterParse(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Mandatory field missing: {0}")]
    MissingField(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the error code used in logs and responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Storage(_) => "storage_error",
            AppError::Cache(_) => "cache_error",
            AppError::CacheConnection(_) => "cache_connection_error",
            AppError::AccountNotFound(_) => "account_not_found",
            AppError::BalanceNotFound { .. } => "balance_not_found",
            AppError::InsufficientCredit { .. } => "insufficient_credit",
            AppError::RatingUnavailable(_) => "rating_unavailable",
            AppError::Rating(_) => "rating_error",
            AppError::Timeout(_) => "timeout",
            AppError::BrokenReference(_) => "broken_reference",
            AppError::FilterParse(_) => "filter_parse_error",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::MissingField(_) => "mandatory_ie_missing",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the error reports a missing entity
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::NotFound(_) | AppError::AccountNotFound(_) | AppError::BalanceNotFound { .. }
        )
    }

    /// Whether the error comes from an external collaborator (store, rating)
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            AppError::Storage(_)
                | AppError::Cache(_)
                | AppError::CacheConnection(_)
                | AppError::Rating(_)
                | AppError::RatingUnavailable(_)
        )
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(err: rust_decimal::Error) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}
