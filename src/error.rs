//! Error types for Booking Edge
//!
//! This module provides the error hierarchy shared by the cache layer, the
//! configuration loader and the HTTP surface. Webhook-specific errors live in
//! [`crate::webhook::error`] because they carry their own HTTP status contract.

use thiserror::Error;

use crate::webhook::WebhookError;

/// The main error type for Booking Edge operations
#[derive(Error, Debug)]
pub enum Error {
    /// Shared cache backend errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Webhook pipeline errors
    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the key-value backend and the cache components built on it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Transport failure or timeout talking to the shared store
    #[error("Backend unavailable during {op}: {reason}")]
    BackendUnavailable {
        /// Backend operation that failed (GET, INCR, ...)
        op: &'static str,
        /// Underlying cause
        reason: String,
    },

    /// A key held a value of the wrong shape (e.g. a non-integer version)
    #[error("Invalid value stored at {key}")]
    InvalidValue {
        /// Offending key
        key: String,
    },

    /// Namespace string rejected
    #[error("Invalid namespace: {0:?}")]
    InvalidNamespace(String),
}

impl CacheError {
    /// Shorthand for a transport-level failure.
    pub fn unavailable(op: &'static str, reason: impl ToString) -> Self {
        CacheError::BackendUnavailable {
            op,
            reason: reason.to_string(),
        }
    }

    /// Whether retrying later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::BackendUnavailable { .. })
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable present but unparseable
    #[error("Invalid value for {var}: {reason}")]
    InvalidVar {
        /// Variable name
        var: String,
        /// Why it was rejected
        reason: String,
    },

    /// Catalog file could not be loaded
    #[error("Failed to load catalog from {path}: {reason}")]
    Catalog {
        /// File path
        path: String,
        /// Underlying cause
        reason: String,
    },
}

/// Result type alias for Booking Edge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Cache(CacheError::unavailable("INCR", "connection refused"));
        assert!(err.to_string().contains("Backend unavailable during INCR"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(CacheError::unavailable("GET", "timeout").is_transient());
        assert!(!CacheError::InvalidValue {
            key: "cache:version:trips".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_config_error() {
        let err = ConfigError::InvalidVar {
            var: "BOOKING_EDGE_ETAG_TTL_SECS".to_string(),
            reason: "not a number".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid value for BOOKING_EDGE_ETAG_TTL_SECS: not a number"
        );
    }

    #[test]
    fn test_webhook_error_converts() {
        let err: Error = crate::webhook::WebhookError::MalformedPayload("no id".to_string()).into();
        assert!(matches!(err, Error::Webhook(_)));
    }
}
