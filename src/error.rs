//! Error types for formgate.

use thiserror::Error;

/// Main error type for formgate operations.
///
/// Limiter operations never return these; they only surface from
/// configuration loading and from the slot storage layer.
#[derive(Error, Debug)]
pub enum FormgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Slot storage is unavailable or refused the operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// A write would push the slot store past its byte quota
    #[error("Storage quota exceeded for slot '{key}': {needed} bytes needed, {quota} allowed")]
    QuotaExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },

    /// A slot holds content that is not a JSON array of timestamps
    #[error("Corrupt request log in slot '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for formgate operations.
pub type Result<T> = std::result::Result<T, FormgateError>;
