//! Metrics collection for booking-edge observability.
//!
//! A [`Metrics`] instance is owned by the application context and shared by
//! every component that records something:
//! - Atomic counters for requests, cache lookups, version bumps and webhooks
//! - Labeled breakdowns (per namespace kind, per provider)
//! - A ring buffer of request durations for percentile export
//! - Prometheus text format export for `GET /metrics`
//!
//! Every counter is also mirrored to the [`metrics`](::metrics) facade, so an
//! installed recorder sees the same numbers without scraping our endpoint.
//!
//! # Example
//!
//! ```rust
//! use booking_edge::metrics::Metrics;
//! use std::time::Duration;
//!
//! let metrics = Metrics::new();
//! metrics.record_request("/api/trips", 200, Duration::from_millis(12));
//! metrics.record_cache_lookup("trips", "hit");
//! assert!(metrics.to_prometheus_format().contains("booking_edge_cache_hits_total 1"));
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ::metrics::{counter, describe_counter};
use parking_lot::RwLock;
use serde::Serialize;

use crate::cache::{TRIPS, TRIP_SCHEDULES};

/// Maximum number of duration samples kept for percentiles.
const MAX_HISTOGRAM_SAMPLES: usize = 1000;

/// Metric name prefix.
const PREFIX: &str = "booking_edge";

/// Bounded `kind` label: known namespace kinds pass through, anything else is `other`.
fn kind_label(kind: &str) -> &'static str {
    match kind {
        TRIPS => TRIPS,
        TRIP_SCHEDULES => TRIP_SCHEDULES,
        _ => "other",
    }
}

/// Metrics collection for booking-edge.
#[derive(Debug)]
pub struct Metrics {
    // === Requests ===
    requests_total: AtomicU64,
    request_durations: RwLock<RingBuffer<Duration>>,

    // === Read path ===
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_revalidated: AtomicU64,
    cache_fail_open: AtomicU64,
    version_bumps: AtomicU64,
    version_bump_failures: AtomicU64,

    // === Webhooks ===
    webhooks_received: AtomicU64,
    webhooks_processed: AtomicU64,
    webhooks_duplicate: AtomicU64,
    webhooks_ignored: AtomicU64,
    webhooks_rejected: AtomicU64,
    webhooks_failed: AtomicU64,
    webhook_outcome_conflicts: AtomicU64,
    webhook_outcome_recoveries: AtomicU64,

    // === Analytics forwarding ===
    analytics_sent: AtomicU64,
    analytics_failed: AtomicU64,
    analytics_dropped: AtomicU64,

    // === Labeled breakdowns ===
    /// (namespace kind, outcome) -> count
    cache_by_kind: RwLock<BTreeMap<(&'static str, &'static str), u64>>,
    /// (provider, outcome) -> count
    webhooks_by_provider: RwLock<BTreeMap<(&'static str, &'static str), u64>>,

    start_time: Instant,
}

/// Point-in-time copy of the counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_revalidated: u64,
    pub cache_fail_open: u64,
    pub version_bumps: u64,
    pub version_bump_failures: u64,
    pub webhooks_received: u64,
    pub webhooks_processed: u64,
    pub webhooks_duplicate: u64,
    pub webhooks_ignored: u64,
    pub webhooks_rejected: u64,
    pub webhooks_failed: u64,
    pub webhook_outcome_conflicts: u64,
    pub webhook_outcome_recoveries: u64,
    pub analytics_sent: u64,
    pub analytics_failed: u64,
    pub analytics_dropped: u64,
}

/// Memory-efficient ring buffer for histogram samples
#[derive(Debug)]
struct RingBuffer<T> {
    data: Vec<T>,
    capacity: usize,
    /// Position of next write (wraps around)
    write_pos: usize,
}

impl<T: Clone + Ord> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            write_pos: 0,
        }
    }

    fn push(&mut self, value: T) {
        if self.data.len() < self.capacity {
            self.data.push(value);
        } else {
            self.data[self.write_pos] = value;
        }
        self.write_pos = (self.write_pos + 1) % self.capacity;
    }

    /// Percentile over retained samples (0.0 to 1.0)
    fn percentile(&self, p: f64) -> Option<T> {
        if self.data.is_empty() {
            return None;
        }
        let mut sorted = self.data.clone();
        sorted.sort();
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted.get(idx).cloned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            request_durations: RwLock::new(RingBuffer::new(MAX_HISTOGRAM_SAMPLES)),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_revalidated: AtomicU64::new(0),
            cache_fail_open: AtomicU64::new(0),
            version_bumps: AtomicU64::new(0),
            version_bump_failures: AtomicU64::new(0),
            webhooks_received: AtomicU64::new(0),
            webhooks_processed: AtomicU64::new(0),
            webhooks_duplicate: AtomicU64::new(0),
            webhooks_ignored: AtomicU64::new(0),
            webhooks_rejected: AtomicU64::new(0),
            webhooks_failed: AtomicU64::new(0),
            webhook_outcome_conflicts: AtomicU64::new(0),
            webhook_outcome_recoveries: AtomicU64::new(0),
            analytics_sent: AtomicU64::new(0),
            analytics_failed: AtomicU64::new(0),
            analytics_dropped: AtomicU64::new(0),
            cache_by_kind: RwLock::new(BTreeMap::new()),
            webhooks_by_provider: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Register descriptions with the installed `metrics` recorder.
    pub fn describe() {
        describe_counter!("booking_edge_requests_total", "HTTP requests served");
        describe_counter!(
            "booking_edge_cache_lookups_total",
            "Conditional reads by namespace kind and outcome"
        );
        describe_counter!(
            "booking_edge_cache_fail_open_total",
            "Backend errors absorbed by the read path"
        );
        describe_counter!(
            "booking_edge_version_bumps_total",
            "Namespace version bumps by kind and result"
        );
        describe_counter!(
            "booking_edge_webhooks_total",
            "Webhook deliveries by provider and outcome"
        );
        describe_counter!(
            "booking_edge_webhook_outcome_conflicts_total",
            "Attempts to overwrite a successful webhook outcome with a failure"
        );
        describe_counter!(
            "booking_edge_webhook_outcome_recoveries_total",
            "Recorded webhook failures later replaced by a success"
        );
        describe_counter!(
            "booking_edge_analytics_events_total",
            "Analytics forwarding results"
        );
    }

    /// Time since this instance was created.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Record a served request.
    pub fn record_request(&self, path: &str, status_code: u16, duration: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.request_durations.write().push(duration);
        counter!(
            "booking_edge_requests_total",
            "path" => path.to_owned(),
            "status" => status_code.to_string()
        )
        .increment(1);
    }

    /// Record a conditional read outcome: `hit`, `miss` or `revalidated`.
    pub fn record_cache_lookup(&self, kind: &str, outcome: &'static str) {
        let kind = kind_label(kind);
        let total = match outcome {
            "hit" => &self.cache_hits,
            "revalidated" => &self.cache_revalidated,
            _ => &self.cache_misses,
        };
        total.fetch_add(1, Ordering::Relaxed);
        *self
            .cache_by_kind
            .write()
            .entry((kind, outcome))
            .or_insert(0) += 1;
        counter!(
            "booking_edge_cache_lookups_total",
            "kind" => kind,
            "outcome" => outcome
        )
        .increment(1);
    }

    /// Record a backend error absorbed by the read path (`lookup`, `store`, `version`).
    pub fn record_fail_open(&self, stage: &'static str) {
        self.cache_fail_open.fetch_add(1, Ordering::Relaxed);
        counter!("booking_edge_cache_fail_open_total", "stage" => stage).increment(1);
    }

    /// Record a successful namespace version bump.
    pub fn record_version_bump(&self, kind: &str) {
        self.version_bumps.fetch_add(1, Ordering::Relaxed);
        counter!(
            "booking_edge_version_bumps_total",
            "kind" => kind_label(kind),
            "result" => "ok"
        )
        .increment(1);
    }

    /// Record a failed namespace version bump.
    pub fn record_version_bump_failure(&self, kind: &str) {
        self.version_bump_failures.fetch_add(1, Ordering::Relaxed);
        counter!(
            "booking_edge_version_bumps_total",
            "kind" => kind_label(kind),
            "result" => "error"
        )
        .increment(1);
    }

    /// Record an authenticated, parseable webhook delivery.
    pub fn record_webhook_received(&self, provider: &'static str) {
        self.webhooks_received.fetch_add(1, Ordering::Relaxed);
        self.bump_provider(provider, "received");
    }

    /// Record how a webhook delivery was answered.
    ///
    /// Outcomes: `processed`, `duplicate`, `ignored`, `rejected`, `failed`.
    pub fn record_webhook_outcome(&self, provider: &'static str, outcome: &'static str) {
        let total = match outcome {
            "processed" => &self.webhooks_processed,
            "duplicate" => &self.webhooks_duplicate,
            "ignored" => &self.webhooks_ignored,
            "rejected" => &self.webhooks_rejected,
            _ => &self.webhooks_failed,
        };
        total.fetch_add(1, Ordering::Relaxed);
        self.bump_provider(provider, outcome);
        counter!(
            "booking_edge_webhooks_total",
            "provider" => provider,
            "outcome" => outcome
        )
        .increment(1);
    }

    /// Record a refused success-to-failure transition.
    pub fn record_outcome_conflict(&self, provider: &'static str) {
        self.webhook_outcome_conflicts
            .fetch_add(1, Ordering::Relaxed);
        counter!(
            "booking_edge_webhook_outcome_conflicts_total",
            "provider" => provider
        )
        .increment(1);
    }

    /// Record a failure-to-success transition of a stored outcome.
    pub fn record_outcome_recovery(&self, provider: &'static str) {
        self.webhook_outcome_recoveries
            .fetch_add(1, Ordering::Relaxed);
        counter!(
            "booking_edge_webhook_outcome_recoveries_total",
            "provider" => provider
        )
        .increment(1);
    }

    /// Record an analytics forwarding result: `sent`, `failed` or `dropped`.
    pub fn record_analytics(&self, result: &'static str) {
        let total = match result {
            "sent" => &self.analytics_sent,
            "dropped" => &self.analytics_dropped,
            _ => &self.analytics_failed,
        };
        total.fetch_add(1, Ordering::Relaxed);
        counter!("booking_edge_analytics_events_total", "result" => result).increment(1);
    }

    fn bump_provider(&self, provider: &'static str, outcome: &'static str) {
        *self
            .webhooks_by_provider
            .write()
            .entry((provider, outcome))
            .or_insert(0) += 1;
    }

    /// Copy every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests_total: load(&self.requests_total),
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            cache_revalidated: load(&self.cache_revalidated),
            cache_fail_open: load(&self.cache_fail_open),
            version_bumps: load(&self.version_bumps),
            version_bump_failures: load(&self.version_bump_failures),
            webhooks_received: load(&self.webhooks_received),
            webhooks_processed: load(&self.webhooks_processed),
            webhooks_duplicate: load(&self.webhooks_duplicate),
            webhooks_ignored: load(&self.webhooks_ignored),
            webhooks_rejected: load(&self.webhooks_rejected),
            webhooks_failed: load(&self.webhooks_failed),
            webhook_outcome_conflicts: load(&self.webhook_outcome_conflicts),
            webhook_outcome_recoveries: load(&self.webhook_outcome_recoveries),
            analytics_sent: load(&self.analytics_sent),
            analytics_failed: load(&self.analytics_failed),
            analytics_dropped: load(&self.analytics_dropped),
        }
    }

    /// Convert metrics to Prometheus text format
    pub fn to_prometheus_format(&self) -> String {
        let s = self.snapshot();
        let mut output = String::new();

        let counters = [
            ("requests_total", s.requests_total),
            ("cache_hits_total", s.cache_hits),
            ("cache_misses_total", s.cache_misses),
            ("cache_revalidated_total", s.cache_revalidated),
            ("cache_fail_open_total", s.cache_fail_open),
            ("version_bumps_total", s.version_bumps),
            ("version_bump_failures_total", s.version_bump_failures),
            ("webhooks_received_total", s.webhooks_received),
            ("webhooks_processed_total", s.webhooks_processed),
            ("webhooks_duplicate_total", s.webhooks_duplicate),
            ("webhooks_ignored_total", s.webhooks_ignored),
            ("webhooks_rejected_total", s.webhooks_rejected),
            ("webhooks_failed_total", s.webhooks_failed),
            ("webhook_outcome_conflicts_total", s.webhook_outcome_conflicts),
            ("webhook_outcome_recoveries_total", s.webhook_outcome_recoveries),
            ("analytics_sent_total", s.analytics_sent),
            ("analytics_failed_total", s.analytics_failed),
            ("analytics_dropped_total", s.analytics_dropped),
        ];
        for (name, value) in counters {
            output.push_str(&format!("# TYPE {PREFIX}_{name} counter\n"));
            output.push_str(&format!("{PREFIX}_{name} {value}\n"));
        }

        output.push_str(&format!("# TYPE {PREFIX}_cache_lookups_total counter\n"));
        for ((kind, outcome), count) in self.cache_by_kind.read().iter() {
            output.push_str(&format!(
                "{PREFIX}_cache_lookups_total{{kind=\"{kind}\",outcome=\"{outcome}\"}} {count}\n"
            ));
        }

        output.push_str(&format!("# TYPE {PREFIX}_webhooks_total counter\n"));
        for ((provider, outcome), count) in self.webhooks_by_provider.read().iter() {
            output.push_str(&format!(
                "{PREFIX}_webhooks_total{{provider=\"{provider}\",outcome=\"{outcome}\"}} {count}\n"
            ));
        }

        let durations = self.request_durations.read();
        for (label, p) in [("p50", 0.5), ("p95", 0.95), ("p99", 0.99)] {
            if let Some(value) = durations.percentile(p) {
                output.push_str(&format!(
                    "{PREFIX}_request_duration_{label}_ms {}\n",
                    value.as_millis()
                ));
            }
        }

        output.push_str(&format!(
            "{PREFIX}_uptime_seconds {}\n",
            self.uptime().as_secs()
        ));
        output
    }
}
