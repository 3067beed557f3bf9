//! Application context and HTTP router assembly.
//!
//! [`AppContext`] is built once at startup and owns every long-lived
//! component: the key-value backend, metrics, the cache engine, the webhook
//! pipeline and the analytics worker. Nothing in the crate reaches for a
//! process-wide client; handlers get what they need from the context.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::extract::{MatchedPath, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::cache::{
    ConditionalResponder, InMemoryBackend, InvalidationTrigger, KeyBuilder, KvBackend,
    RedisBackend, VersionStore,
};
use crate::catalog::{catalog_router, CatalogState, TripCatalog};
use crate::config::AppConfig;
use crate::cors::{cors_layer, CorsConfig};
use crate::forwarder::{AnalyticsForwarder, ForwarderHandle};
use crate::handlers::{ops_router, status_router, LatencyHistogram};
use crate::metrics::Metrics;
use crate::webhook::{webhook_router, KvEventStore, PaymentHandler, WebhookPipeline};

/// Shared state of the running service.
pub struct AppContext {
    /// Configuration the context was built from
    pub config: AppConfig,
    /// Key-value backend shared by versions, ETags and the webhook event log
    pub backend: Arc<dyn KvBackend>,
    /// Counters and Prometheus export
    pub metrics: Arc<Metrics>,
    /// Request latency percentiles for `/status`
    pub latency: LatencyHistogram,
    /// Namespace version counters
    pub versions: VersionStore,
    /// Conditional GET engine
    pub responder: ConditionalResponder,
    /// Write-path invalidation
    pub trigger: InvalidationTrigger,
    /// Primary trip data
    pub catalog: Arc<dyn TripCatalog>,
    /// Webhook ingestion
    pub pipeline: Arc<WebhookPipeline>,
    forwarder: Mutex<Option<ForwarderHandle>>,
}

impl AppContext {
    /// Connect to the configured backend and build the context.
    ///
    /// Without a Redis URL the in-memory backend is used, which only suits a
    /// single process.
    pub async fn connect(
        config: AppConfig,
        catalog: Arc<dyn TripCatalog>,
        handler: Arc<dyn PaymentHandler>,
    ) -> anyhow::Result<Self> {
        let backend: Arc<dyn KvBackend> = match config.redis_url.as_deref() {
            Some(url) => Arc::new(
                RedisBackend::connect(url, config.cache.backend_timeout)
                    .await
                    .context("connecting to Redis")?,
            ),
            None => {
                warn!("No Redis URL configured, using in-memory backend");
                Arc::new(InMemoryBackend::new())
            }
        };
        Self::build(config, backend, catalog, handler)
    }

    /// Build the context over an existing backend.
    ///
    /// Must be called inside a Tokio runtime when analytics forwarding is
    /// configured, since the worker task is spawned here.
    pub fn build(
        config: AppConfig,
        backend: Arc<dyn KvBackend>,
        catalog: Arc<dyn TripCatalog>,
        handler: Arc<dyn PaymentHandler>,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let versions = VersionStore::new(backend.clone(), metrics.clone());
        let responder = ConditionalResponder::new(
            backend.clone(),
            KeyBuilder::new(versions.clone()),
            config.cache.clone(),
            metrics.clone(),
        );
        let trigger = InvalidationTrigger::new(versions.clone());

        let mut pipeline = WebhookPipeline::new(
            Arc::new(KvEventStore::new(backend.clone())),
            handler,
            config.webhook.clone(),
            metrics.clone(),
        );
        let forwarder = match &config.forwarder {
            Some(forwarder_config) => {
                let (forwarder, handle) =
                    AnalyticsForwarder::from_config(forwarder_config, metrics.clone())
                        .context("starting analytics forwarder")?;
                info!(endpoint = %forwarder_config.endpoint, "Analytics forwarding enabled");
                pipeline = pipeline.with_analytics(forwarder);
                Some(handle)
            }
            None => None,
        };

        Ok(Self {
            latency: LatencyHistogram::new().context("creating latency histogram")?,
            config,
            backend,
            metrics,
            versions,
            responder,
            trigger,
            catalog,
            pipeline: Arc::new(pipeline),
            forwarder: Mutex::new(forwarder),
        })
    }

    /// Empty catalog and an in-memory booking ledger.
    #[cfg(test)]
    pub(crate) fn for_tests(config: AppConfig, backend: Arc<dyn KvBackend>) -> anyhow::Result<Self> {
        Self::build(
            config,
            backend,
            Arc::new(crate::catalog::StaticCatalog::default()),
            Arc::new(crate::webhook::InMemoryBookings::new()),
        )
    }

    /// The full HTTP surface.
    pub fn router(self: &Arc<Self>) -> Router {
        let mut router: Router<Arc<AppContext>> = Router::new()
            .merge(status_router())
            .merge(catalog_router(CatalogState {
                catalog: self.catalog.clone(),
                responder: self.responder.clone(),
            }))
            .merge(webhook_router(self.pipeline.clone()));

        if self.config.ops_token.is_some() {
            router = router.merge(ops_router(self.clone()));
        }

        router
            .layer(middleware::from_fn_with_state(self.clone(), track_requests))
            .layer(cors_layer(&CorsConfig::with_origins(
                self.config.cors_origins.iter().cloned(),
            )))
            .with_state(self.clone())
    }

    /// Stop background work, delivering queued analytics events first.
    pub async fn shutdown(&self) {
        let forwarder = self.forwarder.lock().take();
        if let Some(handle) = forwarder {
            handle.shutdown().await;
        }
        info!("Application context shut down");
    }
}

async fn track_requests(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    let elapsed = started.elapsed();
    ctx.latency.record_duration(elapsed);
    ctx.metrics
        .record_request(&path, response.status().as_u16(), elapsed);
    response
}
