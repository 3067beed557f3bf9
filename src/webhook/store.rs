//! Webhook event log.
//!
//! Every authenticated event is written here before any business effect runs.
//! Records are never deleted: the log is both the deduplication index and the
//! audit trail for payment state changes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::{WebhookError, WebhookResult};
use super::events::{Provider, WebhookEventId};
use crate::cache::KvBackend;

/// Data captured from a delivery before processing.
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub event_id: WebhookEventId,
    pub event_type: String,
    /// Raw request body
    pub payload: String,
    /// Signature header as received
    pub signature: String,
}

/// A persisted webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider: Provider,
    pub provider_event_id: String,
    pub event_type: String,
    pub payload: String,
    pub signature: String,
    pub received_at: DateTime<Utc>,
    /// Number of deliveries seen, including the first
    pub delivery_count: u32,
    pub processed: bool,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookEvent {
    fn from_new(event: NewWebhookEvent, now: DateTime<Utc>) -> Self {
        Self {
            provider: event.event_id.provider,
            provider_event_id: event.event_id.id,
            event_type: event.event_type,
            payload: event.payload,
            signature: event.signature,
            received_at: now,
            delivery_count: 1,
            processed: false,
            success: false,
            failure_reason: None,
            processed_at: None,
        }
    }

    pub fn event_id(&self) -> WebhookEventId {
        WebhookEventId::new(self.provider, self.provider_event_id.clone())
    }

    /// Whether a redelivery can be acknowledged without reprocessing.
    pub fn is_settled(&self) -> bool {
        self.processed && self.success
    }

    /// Apply a terminal outcome, following the transition rules of [`MarkOutcome`].
    fn apply_outcome(
        &mut self,
        success: bool,
        failure_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> MarkOutcome {
        let outcome = match (self.processed, self.success, success) {
            (false, _, _) => MarkOutcome::Recorded,
            (true, true, true) | (true, false, false) => return MarkOutcome::Unchanged,
            (true, false, true) => MarkOutcome::Recovered,
            (true, true, false) => return MarkOutcome::Conflict,
        };
        self.processed = true;
        self.success = success;
        self.failure_reason = if success {
            None
        } else {
            failure_reason.map(str::to_owned)
        };
        self.processed_at = Some(now);
        outcome
    }
}

/// Result of a store write for one delivery.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    /// The record after this delivery was counted
    pub record: WebhookEvent,
    /// Whether this delivery created the record
    pub first_delivery: bool,
}

/// What `mark_processed` did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// First terminal outcome recorded.
    Recorded,
    /// Same outcome as already recorded; nothing changed.
    Unchanged,
    /// A recorded failure was replaced by a success.
    Recovered,
    /// A failure was reported for an event already marked successful. The
    /// success is kept.
    Conflict,
}

/// Persistence for webhook events.
#[async_trait]
pub trait WebhookEventStore: Send + Sync + 'static {
    /// Persist a delivery. A redelivery of a known event increments its
    /// delivery count and returns the stored record.
    async fn store_webhook_event(&self, event: NewWebhookEvent) -> WebhookResult<StoredEvent>;

    async fn get(&self, event_id: &WebhookEventId) -> WebhookResult<Option<WebhookEvent>>;

    /// Record the terminal outcome of processing.
    async fn mark_processed(
        &self,
        event_id: &WebhookEventId,
        success: bool,
        failure_reason: Option<&str>,
    ) -> WebhookResult<MarkOutcome>;
}

fn unknown_event(event_id: &WebhookEventId) -> WebhookError {
    WebhookError::Storage(format!("no stored event {event_id}"))
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local event log for tests and development.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: Mutex<HashMap<WebhookEventId, WebhookEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl WebhookEventStore for InMemoryEventStore {
    async fn store_webhook_event(&self, event: NewWebhookEvent) -> WebhookResult<StoredEvent> {
        let mut events = self.events.lock();
        if let Some(existing) = events.get_mut(&event.event_id) {
            existing.delivery_count = existing.delivery_count.saturating_add(1);
            return Ok(StoredEvent {
                record: existing.clone(),
                first_delivery: false,
            });
        }
        let id = event.event_id.clone();
        let record = WebhookEvent::from_new(event, Utc::now());
        events.insert(id, record.clone());
        Ok(StoredEvent {
            record,
            first_delivery: true,
        })
    }

    async fn get(&self, event_id: &WebhookEventId) -> WebhookResult<Option<WebhookEvent>> {
        Ok(self.events.lock().get(event_id).cloned())
    }

    async fn mark_processed(
        &self,
        event_id: &WebhookEventId,
        success: bool,
        failure_reason: Option<&str>,
    ) -> WebhookResult<MarkOutcome> {
        let mut events = self.events.lock();
        let record = events
            .get_mut(event_id)
            .ok_or_else(|| unknown_event(event_id))?;
        Ok(record.apply_outcome(success, failure_reason, Utc::now()))
    }
}

// ============================================================================
// Key-value store
// ============================================================================

/// Key prefix for event records in the shared backend.
pub const EVENT_KEY_PREFIX: &str = "webhook:event:";

/// Event log kept as JSON documents in the shared key-value backend.
///
/// Records are written without expiry. Read-modify-write is not atomic across
/// processes: two simultaneous first deliveries of the same event may both be
/// processed, which the payment handler's own idempotency absorbs.
#[derive(Clone)]
pub struct KvEventStore {
    backend: Arc<dyn KvBackend>,
}

impl KvEventStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    pub fn event_key(event_id: &WebhookEventId) -> String {
        format!("{EVENT_KEY_PREFIX}{}:{}", event_id.provider, event_id.id)
    }

    async fn load(&self, key: &str) -> WebhookResult<Option<WebhookEvent>> {
        match self.backend.get(key).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                warn!(key, error = %e, "Corrupt webhook event record");
                WebhookError::Storage(format!("corrupt record at {key}: {e}"))
            }),
        }
    }

    async fn save(&self, key: &str, record: &WebhookEvent) -> WebhookResult<()> {
        let raw = serde_json::to_string(record)
            .map_err(|e| WebhookError::Storage(e.to_string()))?;
        self.backend.set(key, &raw, None).await?;
        Ok(())
    }
}

#[async_trait]
impl WebhookEventStore for KvEventStore {
    async fn store_webhook_event(&self, event: NewWebhookEvent) -> WebhookResult<StoredEvent> {
        let key = Self::event_key(&event.event_id);
        let stored = match self.load(&key).await? {
            Some(mut existing) => {
                existing.delivery_count = existing.delivery_count.saturating_add(1);
                StoredEvent {
                    record: existing,
                    first_delivery: false,
                }
            }
            None => StoredEvent {
                record: WebhookEvent::from_new(event, Utc::now()),
                first_delivery: true,
            },
        };
        self.save(&key, &stored.record).await?;
        Ok(stored)
    }

    async fn get(&self, event_id: &WebhookEventId) -> WebhookResult<Option<WebhookEvent>> {
        self.load(&Self::event_key(event_id)).await
    }

    async fn mark_processed(
        &self,
        event_id: &WebhookEventId,
        success: bool,
        failure_reason: Option<&str>,
    ) -> WebhookResult<MarkOutcome> {
        let key = Self::event_key(event_id);
        let mut record = self
            .load(&key)
            .await?
            .ok_or_else(|| unknown_event(event_id))?;
        let outcome = record.apply_outcome(success, failure_reason, Utc::now());
        if matches!(outcome, MarkOutcome::Recorded | MarkOutcome::Recovered) {
            self.save(&key, &record).await?;
        }
        Ok(outcome)
    }
}
