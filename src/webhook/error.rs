//! Webhook error types and their HTTP status contract.
//!
//! | Error               | Status | Persisted |
//! |---------------------|--------|-----------|
//! | `SignatureInvalid`  | 401    | no        |
//! | `MalformedPayload`  | 400    | only if the event id could be read |
//! | `ProviderDisabled`  | 404    | no        |
//! | `HandlerFailure`    | 500    | yes, marked failed |
//! | `Storage`           | 500    | unknown   |
//!
//! Providers retry on 5xx, so only transient conditions map there.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use super::events::Provider;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    /// Missing, unparseable, expired or mismatched signature
    #[error("Invalid webhook signature: {0}")]
    SignatureInvalid(&'static str),

    /// Body is not a valid event for the provider
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// No signing secret configured for the provider
    #[error("Webhooks from {0} are not enabled")]
    ProviderDisabled(Provider),

    /// The business handler failed or timed out
    #[error("Webhook handler failed: {0}")]
    HandlerFailure(String),

    /// The event log could not be read or written
    #[error("Webhook event log unavailable: {0}")]
    Storage(String),
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SignatureInvalid(_) => StatusCode::UNAUTHORIZED,
            Self::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            Self::ProviderDisabled(_) => StatusCode::NOT_FOUND,
            Self::HandlerFailure(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to the caller.
    fn public_message(&self) -> String {
        match self {
            Self::SignatureInvalid(_) => "invalid signature".to_string(),
            Self::HandlerFailure(_) | Self::Storage(_) => "processing failed".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<crate::error::CacheError> for WebhookError {
    fn from(err: crate::error::CacheError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "received": false,
            "error": self.public_message(),
        }));
        (self.status_code(), body).into_response()
    }
}

pub type WebhookResult<T> = std::result::Result<T, WebhookError>;
