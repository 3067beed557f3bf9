//! Best-effort analytics forwarding.
//!
//! # Architecture
//!
//! ```text
//! pipeline ──try_send──> [bounded queue] ──> worker ──> AnalyticsSink (HTTP)
//!              │ full                           │ error
//!              v                                v
//!         dropped++                    retry with backoff + jitter,
//!                                      then failed++
//! ```
//!
//! Publishing never blocks and never fails the caller. The worker owns the
//! receiving end; [`ForwarderHandle::shutdown`] stops intake and drains what is
//! already queued before returning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::{parse_var, var, Lookup};
use crate::error::ConfigError;
use crate::metrics::Metrics;

/// An analytics event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    /// Unique per event; retries reuse it so the collector can deduplicate
    pub id: Uuid,
    /// Event name, e.g. `payment_succeeded`
    pub name: String,
    /// When the underlying fact happened
    pub occurred_at: DateTime<Utc>,
    /// Free-form properties
    pub properties: serde_json::Value,
}

impl AnalyticsEvent {
    /// Build an event stamped with the current time.
    pub fn now(name: impl Into<String>, properties: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            occurred_at: Utc::now(),
            properties,
        }
    }
}

/// Destination for analytics events.
#[async_trait]
pub trait AnalyticsSink: Send + Sync + 'static {
    /// Deliver one event.
    async fn send(&self, event: &AnalyticsEvent) -> anyhow::Result<()>;
}

/// Posts events as JSON to an HTTP collector.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpSink {
    /// Create a sink posting to `endpoint` with a per-request timeout.
    pub fn new(endpoint: Url, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl AnalyticsSink for HttpSink {
    async fn send(&self, event: &AnalyticsEvent) -> anyhow::Result<()> {
        self.client
            .post(self.endpoint.clone())
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Forwarder settings.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Collector URL
    pub endpoint: Url,
    /// Queue capacity; events beyond it are dropped
    pub queue_capacity: usize,
    /// Retry policy per event
    pub retry: RetryPolicy,
    /// Timeout for each HTTP request
    pub request_timeout: Duration,
}

impl ForwarderConfig {
    /// Create a config with default queue, retry and timeout settings.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            queue_capacity: 1024,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(2),
        }
    }

    /// Load through `lookup`; `None` when no collector URL is configured.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Option<Self>, ConfigError> {
        let Some(raw) = var(lookup, "ANALYTICS_URL") else {
            return Ok(None);
        };
        let endpoint = Url::parse(&raw).map_err(|e| ConfigError::InvalidVar {
            var: "BOOKING_EDGE_ANALYTICS_URL".to_string(),
            reason: e.to_string(),
        })?;
        let mut config = Self::new(endpoint);
        if let Some(capacity) = parse_var::<usize>(lookup, "ANALYTICS_QUEUE")? {
            config.queue_capacity = capacity.max(1);
        }
        if let Some(attempts) = parse_var::<u32>(lookup, "ANALYTICS_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts.max(1);
        }
        Ok(Some(config))
    }
}

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped,
    /// then jittered into the upper half of that window.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        let ceiling = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::rng().random_range(ceiling_ms / 2..=ceiling_ms);
        Duration::from_millis(jittered)
    }
}

/// Cloneable publishing side of the forwarder.
#[derive(Clone)]
pub struct AnalyticsForwarder {
    tx: mpsc::Sender<AnalyticsEvent>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for AnalyticsForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsForwarder")
            .field("capacity", &self.tx.max_capacity())
            .finish()
    }
}

impl AnalyticsForwarder {
    /// Start the worker task.
    pub fn spawn(
        sink: Arc<dyn AnalyticsSink>,
        queue_capacity: usize,
        retry: RetryPolicy,
        metrics: Arc<Metrics>,
    ) -> (Self, ForwarderHandle) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = Worker {
            rx,
            sink,
            retry,
            metrics: metrics.clone(),
        };
        let join = tokio::spawn(worker.run(shutdown_rx));
        (
            Self { tx, metrics },
            ForwarderHandle {
                shutdown: shutdown_tx,
                join,
            },
        )
    }

    /// Start a forwarder posting to the configured HTTP collector.
    pub fn from_config(
        config: &ForwarderConfig,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<(Self, ForwarderHandle)> {
        let sink = HttpSink::new(config.endpoint.clone(), config.request_timeout)?;
        Ok(Self::spawn(
            Arc::new(sink),
            config.queue_capacity,
            config.retry,
            metrics,
        ))
    }

    /// Enqueue `event` without waiting. Returns whether it was accepted.
    pub fn publish(&self, event: AnalyticsEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!(name = %event.name, "Analytics queue full, dropping event");
                self.metrics.record_analytics("dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(name = %event.name, "Analytics forwarder stopped, dropping event");
                self.metrics.record_analytics("dropped");
                false
            }
        }
    }
}

/// Owner handle used to stop the worker.
#[derive(Debug)]
pub struct ForwarderHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl ForwarderHandle {
    /// Stop accepting events, deliver what is queued, and wait for the worker.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.join.await {
            warn!(error = %e, "Analytics worker ended abnormally");
        }
    }
}

struct Worker {
    rx: mpsc::Receiver<AnalyticsEvent>,
    sink: Arc<dyn AnalyticsSink>,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl Worker {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!("Analytics forwarder started");
        loop {
            tokio::select! {
                maybe_event = self.rx.recv() => match maybe_event {
                    Some(event) => self.deliver(event).await,
                    None => break,
                },
                _ = &mut shutdown => {
                    self.rx.close();
                    while let Some(event) = self.rx.recv().await {
                        self.deliver(event).await;
                    }
                    break;
                }
            }
        }
        info!("Analytics forwarder stopped");
    }

    async fn deliver(&self, event: AnalyticsEvent) {
        let attempts = self.retry.max_attempts.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay_for(attempt - 1)).await;
            }
            match self.sink.send(&event).await {
                Ok(()) => {
                    self.metrics.record_analytics("sent");
                    return;
                }
                Err(e) => {
                    debug!(
                        name = %event.name,
                        attempt = attempt + 1,
                        error = %e,
                        "Analytics delivery attempt failed"
                    );
                }
            }
        }
        warn!(name = %event.name, attempts, "Giving up on analytics event");
        self.metrics.record_analytics("failed");
    }
}
