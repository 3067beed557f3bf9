//! Axum endpoints for provider webhooks.
//!
//! The body is taken as raw [`Bytes`] so the signature is checked against the
//! exact bytes the provider signed.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::events::Provider;
use super::processor::WebhookPipeline;

/// Body returned for accepted deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
    /// `processed`, `duplicate` or `ignored`
    pub status: String,
    pub event_id: String,
}

async fn receive(
    pipeline: &WebhookPipeline,
    provider: Provider,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let signature = headers
        .get(provider.signature_header())
        .and_then(|v| v.to_str().ok());

    match pipeline.ingest(provider, body, signature).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(WebhookAck {
                received: true,
                status: outcome.as_str().to_string(),
                event_id: outcome.event_id().id.clone(),
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /webhooks/stripe`
pub async fn stripe_webhook_handler(
    State(pipeline): State<Arc<WebhookPipeline>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    receive(&pipeline, Provider::Stripe, &headers, &body).await
}

/// `POST /webhooks/paystack`
pub async fn paystack_webhook_handler(
    State(pipeline): State<Arc<WebhookPipeline>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    receive(&pipeline, Provider::Paystack, &headers, &body).await
}

/// Routes for every provider with a configured secret.
pub fn webhook_router<S>(pipeline: Arc<WebhookPipeline>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let mut router: Router<Arc<WebhookPipeline>> = Router::new();
    for provider in pipeline.config().enabled_providers() {
        router = match provider {
            Provider::Stripe => router.route("/webhooks/stripe", post(stripe_webhook_handler)),
            Provider::Paystack => {
                router.route("/webhooks/paystack", post(paystack_webhook_handler))
            }
        };
    }
    router.with_state(pipeline)
}
