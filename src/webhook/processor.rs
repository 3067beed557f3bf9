//! Idempotent webhook processing.
//!
//! # Pipeline
//!
//! ```text
//! raw body + signature header
//!       |
//!       v
//! [Verify Signature] --fail--> 401 (nothing stored)
//!       |
//!       v
//! [Parse envelope] --no id/type--> 400 (nothing stored)
//!       |
//!       v
//! [Persist event] --store down--> 500
//!       |
//!       v
//! [Already settled?] --yes--> 200 duplicate
//!       |
//!       v
//! [Classify] --known type, no booking ref--> mark failed, 400
//!       |        \--unknown type--> mark success, 200 ignored
//!       v
//! [PaymentHandler under timeout] --error/timeout--> mark failed, 500
//!       |
//!       v
//! [Mark processed] --> 200 processed
//! ```
//!
//! Processing is synchronous with the request: a 200 means the business effect
//! has been applied. Exactly-once comes from the settled check plus handlers
//! being idempotent per booking; a stored failure is reprocessed on the next
//! delivery so provider retries can succeed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::config::WebhookConfig;
use super::error::{WebhookError, WebhookResult};
use super::events::{InboundEvent, PaymentDetails, PaymentEvent, Provider, WebhookEventId};
use super::signature::SignatureVerifier;
use super::store::{MarkOutcome, NewWebhookEvent, WebhookEventStore};
use crate::forwarder::{AnalyticsEvent, AnalyticsForwarder};
use crate::metrics::Metrics;

/// What a handler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerOutcome {
    /// The business effect was applied now.
    Applied,
    /// The effect was already in place; nothing changed.
    AlreadyApplied,
}

/// Business side of payment events.
///
/// Implementations must be idempotent: the same event id may be delivered
/// again after a failure or by concurrent processes, and must then report
/// [`HandlerOutcome::AlreadyApplied`] rather than repeat the effect.
#[async_trait]
pub trait PaymentHandler: Send + Sync + 'static {
    /// Confirm the booking's payment
    async fn on_payment_succeeded(
        &self,
        event_id: &WebhookEventId,
        details: &PaymentDetails,
    ) -> anyhow::Result<HandlerOutcome>;

    /// Record a failed payment attempt
    async fn on_payment_failed(
        &self,
        event_id: &WebhookEventId,
        details: &PaymentDetails,
        reason: Option<&str>,
    ) -> anyhow::Result<HandlerOutcome>;

    /// Record a refund
    async fn on_refunded(
        &self,
        event_id: &WebhookEventId,
        details: &PaymentDetails,
    ) -> anyhow::Result<HandlerOutcome>;
}

/// Logging handler that logs all events
#[derive(Clone, Debug, Default)]
pub struct LoggingHandler;

#[async_trait]
impl PaymentHandler for LoggingHandler {
    async fn on_payment_succeeded(
        &self,
        event_id: &WebhookEventId,
        details: &PaymentDetails,
    ) -> anyhow::Result<HandlerOutcome> {
        info!(
            event_id = %event_id,
            booking = %details.booking_reference,
            amount = ?details.amount_minor,
            currency = ?details.currency,
            "Payment succeeded"
        );
        Ok(HandlerOutcome::Applied)
    }

    async fn on_payment_failed(
        &self,
        event_id: &WebhookEventId,
        details: &PaymentDetails,
        reason: Option<&str>,
    ) -> anyhow::Result<HandlerOutcome> {
        warn!(
            event_id = %event_id,
            booking = %details.booking_reference,
            reason = reason.unwrap_or("unspecified"),
            "Payment failed"
        );
        Ok(HandlerOutcome::Applied)
    }

    async fn on_refunded(
        &self,
        event_id: &WebhookEventId,
        details: &PaymentDetails,
    ) -> anyhow::Result<HandlerOutcome> {
        info!(
            event_id = %event_id,
            booking = %details.booking_reference,
            amount = ?details.amount_minor,
            "Payment refunded"
        );
        Ok(HandlerOutcome::Applied)
    }
}

/// Payment state of a booking as seen by [`InMemoryBookings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingPaymentState {
    Paid,
    PaymentFailed,
    Refunded,
}

/// Idempotent in-process booking ledger.
///
/// Backs the development binary and tests. An event id is applied at most
/// once, and a transition to the state a booking already has is reported as
/// already applied.
#[derive(Debug, Default)]
pub struct InMemoryBookings {
    inner: Mutex<Ledger>,
}

#[derive(Debug, Default)]
struct Ledger {
    states: HashMap<String, BookingPaymentState>,
    applied_events: HashSet<WebhookEventId>,
    effects: u64,
}

impl InMemoryBookings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, booking_reference: &str) -> Option<BookingPaymentState> {
        self.inner.lock().states.get(booking_reference).copied()
    }

    /// Number of business effects applied so far.
    pub fn effects(&self) -> u64 {
        self.inner.lock().effects
    }

    fn apply(
        &self,
        event_id: &WebhookEventId,
        booking_reference: &str,
        next: BookingPaymentState,
    ) -> HandlerOutcome {
        let mut ledger = self.inner.lock();
        if ledger.applied_events.contains(event_id) {
            return HandlerOutcome::AlreadyApplied;
        }
        ledger.applied_events.insert(event_id.clone());
        let current = ledger.states.get(booking_reference).copied();
        let settled = match (current, next) {
            (Some(state), next) if state == next => true,
            // A refunded booking cannot become paid again through a stale event.
            (Some(BookingPaymentState::Refunded), _) => true,
            // A late failure never downgrades a paid booking.
            (Some(BookingPaymentState::Paid), BookingPaymentState::PaymentFailed) => true,
            _ => false,
        };
        if settled {
            return HandlerOutcome::AlreadyApplied;
        }
        ledger.states.insert(booking_reference.to_string(), next);
        ledger.effects += 1;
        HandlerOutcome::Applied
    }
}

#[async_trait]
impl PaymentHandler for InMemoryBookings {
    async fn on_payment_succeeded(
        &self,
        event_id: &WebhookEventId,
        details: &PaymentDetails,
    ) -> anyhow::Result<HandlerOutcome> {
        Ok(self.apply(event_id, &details.booking_reference, BookingPaymentState::Paid))
    }

    async fn on_payment_failed(
        &self,
        event_id: &WebhookEventId,
        details: &PaymentDetails,
        _reason: Option<&str>,
    ) -> anyhow::Result<HandlerOutcome> {
        Ok(self.apply(
            event_id,
            &details.booking_reference,
            BookingPaymentState::PaymentFailed,
        ))
    }

    async fn on_refunded(
        &self,
        event_id: &WebhookEventId,
        details: &PaymentDetails,
    ) -> anyhow::Result<HandlerOutcome> {
        Ok(self.apply(
            event_id,
            &details.booking_reference,
            BookingPaymentState::Refunded,
        ))
    }
}

/// How an accepted delivery was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The event was dispatched to the handler.
    Processed {
        event_id: WebhookEventId,
        handler: HandlerOutcome,
    },
    /// The event was already settled by an earlier delivery.
    Duplicate { event_id: WebhookEventId },
    /// The event type is not one we act on.
    Ignored { event_id: WebhookEventId },
}

impl IngestOutcome {
    pub fn event_id(&self) -> &WebhookEventId {
        match self {
            Self::Processed { event_id, .. }
            | Self::Duplicate { event_id }
            | Self::Ignored { event_id } => event_id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed { .. } => "processed",
            Self::Duplicate { .. } => "duplicate",
            Self::Ignored { .. } => "ignored",
        }
    }
}

/// The webhook ingestion pipeline.
#[derive(Clone)]
pub struct WebhookPipeline {
    store: Arc<dyn WebhookEventStore>,
    handler: Arc<dyn PaymentHandler>,
    config: WebhookConfig,
    metrics: Arc<Metrics>,
    analytics: Option<AnalyticsForwarder>,
}

impl WebhookPipeline {
    pub fn new(
        store: Arc<dyn WebhookEventStore>,
        handler: Arc<dyn PaymentHandler>,
        config: WebhookConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            handler,
            config,
            metrics,
            analytics: None,
        }
    }

    /// Forward processed payment events to analytics.
    pub fn with_analytics(mut self, forwarder: AnalyticsForwarder) -> Self {
        self.analytics = Some(forwarder);
        self
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn WebhookEventStore> {
        &self.store
    }

    /// Handle one delivery from `provider`.
    #[instrument(skip_all, fields(provider = %provider))]
    pub async fn ingest(
        &self,
        provider: Provider,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> WebhookResult<IngestOutcome> {
        let result = self.ingest_inner(provider, raw_body, signature).await;
        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(WebhookError::SignatureInvalid(_))
            | Err(WebhookError::MalformedPayload(_))
            | Err(WebhookError::ProviderDisabled(_)) => "rejected",
            Err(_) => "failed",
        };
        self.metrics.record_webhook_outcome(provider.as_str(), outcome);
        result
    }

    async fn ingest_inner(
        &self,
        provider: Provider,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> WebhookResult<IngestOutcome> {
        let secret = self
            .config
            .secret_for(provider)
            .ok_or(WebhookError::ProviderDisabled(provider))?;
        let signature = signature.ok_or(WebhookError::SignatureInvalid("missing header"))?;
        let verifier = SignatureVerifier::new(provider, secret, self.config.tolerance);
        if !verifier.verify_signature(raw_body, signature) {
            warn!("Rejected webhook with invalid signature");
            return Err(WebhookError::SignatureInvalid("verification failed"));
        }

        let inbound = InboundEvent::parse(provider, raw_body)?;
        let event_id = inbound.event_id.clone();
        self.metrics.record_webhook_received(provider.as_str());

        let stored = self
            .store
            .store_webhook_event(NewWebhookEvent {
                event_id: event_id.clone(),
                event_type: inbound.event_type.clone(),
                payload: String::from_utf8_lossy(raw_body).into_owned(),
                signature: signature.to_string(),
            })
            .await?;

        if stored.record.is_settled() {
            info!(
                event_id = %event_id,
                deliveries = stored.record.delivery_count,
                "Duplicate webhook delivery acknowledged"
            );
            return Ok(IngestOutcome::Duplicate { event_id });
        }
        if !stored.first_delivery {
            debug!(event_id = %event_id, "Reprocessing previously failed event");
        }

        let event = match inbound.classify() {
            Ok(event) => event,
            Err(e) => {
                self.mark(&event_id, false, Some(&e.to_string())).await?;
                return Err(e);
            }
        };

        if let PaymentEvent::Unknown { event_type } = &event {
            debug!(event_id = %event_id, event_type, "Ignoring unhandled event type");
            self.mark(&event_id, true, None).await?;
            return Ok(IngestOutcome::Ignored { event_id });
        }

        match self.process(&event_id, &event).await {
            Ok(handler) => {
                self.mark(&event_id, true, None).await?;
                info!(event_id = %event_id, kind = event.kind(), ?handler, "Webhook processed");
                self.forward(&event_id, &event, handler);
                Ok(IngestOutcome::Processed { event_id, handler })
            }
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "Webhook processing failed");
                self.mark(&event_id, false, Some(&e.to_string())).await?;
                Err(e)
            }
        }
    }

    /// Dispatch `event` to the handler under the processing timeout.
    ///
    /// `AlreadyApplied` is a success. `Unknown` events do nothing.
    pub async fn process(
        &self,
        event_id: &WebhookEventId,
        event: &PaymentEvent,
    ) -> WebhookResult<HandlerOutcome> {
        let handler = &self.handler;
        let dispatch = async {
            match event {
                PaymentEvent::PaymentSucceeded(details) => {
                    handler.on_payment_succeeded(event_id, details).await
                }
                PaymentEvent::PaymentFailed { details, reason } => {
                    handler
                        .on_payment_failed(event_id, details, reason.as_deref())
                        .await
                }
                PaymentEvent::Refunded(details) => handler.on_refunded(event_id, details).await,
                PaymentEvent::Unknown { .. } => Ok(HandlerOutcome::AlreadyApplied),
            }
        };

        match timeout(self.config.processing_timeout, dispatch).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(WebhookError::HandlerFailure(format!("{e:#}"))),
            Err(_) => Err(WebhookError::HandlerFailure(format!(
                "timed out after {:?}",
                self.config.processing_timeout
            ))),
        }
    }

    async fn mark(
        &self,
        event_id: &WebhookEventId,
        success: bool,
        failure_reason: Option<&str>,
    ) -> WebhookResult<()> {
        match self
            .store
            .mark_processed(event_id, success, failure_reason)
            .await?
        {
            MarkOutcome::Recorded | MarkOutcome::Unchanged => {}
            MarkOutcome::Recovered => {
                warn!(
                    event_id = %event_id,
                    "Stored failure replaced by a success on redelivery"
                );
                self.metrics
                    .record_outcome_recovery(event_id.provider.as_str());
            }
            MarkOutcome::Conflict => {
                warn!(
                    event_id = %event_id,
                    reason = failure_reason.unwrap_or(""),
                    "Failure reported for an event already marked successful; keeping success"
                );
                self.metrics
                    .record_outcome_conflict(event_id.provider.as_str());
            }
        }
        Ok(())
    }

    fn forward(&self, event_id: &WebhookEventId, event: &PaymentEvent, handler: HandlerOutcome) {
        let (Some(analytics), Some(details)) = (&self.analytics, event.details()) else {
            return;
        };
        if handler == HandlerOutcome::AlreadyApplied {
            return;
        }
        analytics.publish(AnalyticsEvent::now(
            event.kind(),
            json!({
                "event_id": event_id.to_string(),
                "provider": event_id.provider,
                "booking_reference": details.booking_reference,
                "amount_minor": details.amount_minor,
                "currency": details.currency,
            }),
        ));
    }
}
