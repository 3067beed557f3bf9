//! Conditional GET short-circuit.
//!
//! # Flow
//!
//! ```text
//! request key + If-None-Match
//!       |
//!       v
//! [stored ETag at etag:<key>] --match--> 304, X-Cache: HIT (compute never runs)
//!       |
//!     miss / no header / backend down
//!       v
//! [compute] -> fresh ETag -> store with namespace TTL -> 200, X-Cache: MISS
//!                                  |
//!                     fresh ETag == If-None-Match -> 304, X-Cache: MISS
//! ```
//!
//! The request key is a [`VersionedKey`](super::VersionedKey), so a namespace
//! bump changes the key and old ETags are simply never consulted again. The
//! short-circuit therefore depends on the version, not on content equality.
//!
//! The engine fails open: if the backend cannot be read or written the request
//! is treated as a miss and served fresh. Concurrent misses for the same key
//! each recompute; there is no single-flight collapsing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{debug, warn};

use super::backend::KvBackend;
use super::etag::{compute_etag, if_none_match_matches};
use super::keys::KeyBuilder;
use super::namespace::Namespace;
use crate::config::CacheConfig;
use crate::metrics::Metrics;

/// Diagnostic header reporting whether the short-circuit was taken.
pub static X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Key prefix under which ETags are stored.
pub const ETAG_KEY_PREFIX: &str = "etag:";

/// Backend key holding the ETag for `request_key`.
pub fn etag_key(request_key: &str) -> String {
    format!("{ETAG_KEY_PREFIX}{request_key}")
}

/// Read the `If-None-Match` header, if present and valid UTF-8.
pub fn if_none_match(headers: &HeaderMap) -> Option<&str> {
    headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok())
}

/// Outcome reported in `X-Cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Answered from the stored ETag without computing.
    Hit,
    /// The payload was computed.
    Miss,
}

impl CacheStatus {
    /// Header value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// A computed response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Serialized body
    pub body: Bytes,
    /// Media type of `body`
    pub content_type: &'static str,
}

impl Payload {
    /// Serialize `value` as a JSON payload.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            body: Bytes::from(serde_json::to_vec(value)?),
            content_type: "application/json",
        })
    }
}

/// Result of a conditional read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalResponse {
    /// 304 with an empty body.
    NotModified {
        /// Tag the client already holds
        etag: String,
        /// HIT when no computation happened
        cache: CacheStatus,
    },
    /// 200 with the freshly computed payload.
    Fresh {
        /// Tag of `payload`
        etag: String,
        /// The body
        payload: Payload,
    },
}

impl ConditionalResponse {
    /// HTTP status this outcome maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotModified { .. } => StatusCode::NOT_MODIFIED,
            Self::Fresh { .. } => StatusCode::OK,
        }
    }

    /// The ETag sent back to the client.
    pub fn etag(&self) -> &str {
        match self {
            Self::NotModified { etag, .. } | Self::Fresh { etag, .. } => etag,
        }
    }

    /// Diagnostic cache status.
    pub fn cache_status(&self) -> CacheStatus {
        match self {
            Self::NotModified { cache, .. } => *cache,
            Self::Fresh { .. } => CacheStatus::Miss,
        }
    }

    fn from_computed(payload: Payload, etag: String, if_none_match: Option<&str>) -> Self {
        match if_none_match {
            Some(header) if if_none_match_matches(header, &etag) => Self::NotModified {
                etag,
                cache: CacheStatus::Miss,
            },
            _ => Self::Fresh { etag, payload },
        }
    }
}

impl IntoResponse for ConditionalResponse {
    fn into_response(self) -> Response {
        let status = self.status();
        let cache = self.cache_status();
        let (etag, body, content_type) = match self {
            Self::NotModified { etag, .. } => (etag, Body::empty(), None),
            Self::Fresh { etag, payload } => {
                (etag, Body::from(payload.body), Some(payload.content_type))
            }
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        let headers = response.headers_mut();
        // A tampered stored tag may not be a valid header; drop it rather than fail.
        if let Ok(value) = HeaderValue::from_str(&etag) {
            headers.insert(ETAG, value);
        }
        headers.insert(X_CACHE.clone(), HeaderValue::from_static(cache.as_str()));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        response
    }
}

/// The conditional-read engine.
#[derive(Clone)]
pub struct ConditionalResponder {
    backend: Arc<dyn KvBackend>,
    keys: KeyBuilder,
    config: CacheConfig,
    metrics: Arc<Metrics>,
}

impl ConditionalResponder {
    /// Create an engine storing ETags in `backend`.
    pub fn new(
        backend: Arc<dyn KvBackend>,
        keys: KeyBuilder,
        config: CacheConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            backend,
            keys,
            config,
            metrics,
        }
    }

    /// The key builder used by [`Self::read_through`].
    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Answer a read for `request_key`, computing only when needed.
    ///
    /// `compute` is the expensive primary-store access. It is not called
    /// when the stored ETag matches `if_none_match`. Errors from `compute`
    /// propagate unchanged; backend errors never do.
    pub async fn handle_conditional_read<F, Fut, E>(
        &self,
        request_key: &str,
        if_none_match: Option<&str>,
        ttl: Duration,
        compute: F,
    ) -> Result<ConditionalResponse, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Payload, E>>,
    {
        let kind = namespace_kind(request_key);
        let etag_key = etag_key(request_key);

        if let Some(header) = if_none_match {
            match self.backend.get(&etag_key).await {
                Ok(Some(stored)) if if_none_match_matches(header, &stored) => {
                    debug!(key = request_key, cache = "hit", "Serving 304 from stored ETag");
                    self.metrics.record_cache_lookup(kind, "hit");
                    return Ok(ConditionalResponse::NotModified {
                        etag: stored,
                        cache: CacheStatus::Hit,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(key = request_key, error = %e, "ETag lookup failed, failing open");
                    self.metrics.record_fail_open("lookup");
                }
            }
        }

        let payload = compute().await?;
        let etag = compute_etag(&payload.body);

        if let Err(e) = self.backend.set(&etag_key, &etag, Some(ttl)).await {
            warn!(key = request_key, error = %e, "ETag store failed, serving uncached");
            self.metrics.record_fail_open("store");
        }

        let response = ConditionalResponse::from_computed(payload, etag, if_none_match);
        let outcome = match response {
            ConditionalResponse::NotModified { .. } => "revalidated",
            ConditionalResponse::Fresh { .. } => "miss",
        };
        debug!(key = request_key, cache = "miss", outcome, "Computed fresh payload");
        self.metrics.record_cache_lookup(kind, outcome);
        Ok(response)
    }

    /// Build the versioned key for `namespace`/`segments` and run a conditional read.
    ///
    /// If the namespace version cannot be read the payload is computed and
    /// returned without touching the ETag store.
    pub async fn read_through<S, F, Fut, E>(
        &self,
        namespace: &Namespace,
        segments: &[S],
        if_none_match: Option<&str>,
        compute: F,
    ) -> Result<ConditionalResponse, E>
    where
        S: AsRef<str>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Payload, E>>,
    {
        match self.keys.build_key(namespace, segments).await {
            Ok(key) => {
                let ttl = self.config.ttl_for(namespace);
                self.handle_conditional_read(key.as_str(), if_none_match, ttl, compute)
                    .await
            }
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "Version read failed, failing open");
                self.metrics.record_fail_open("version");
                let payload = compute().await?;
                let etag = compute_etag(&payload.body);
                self.metrics.record_cache_lookup(namespace.kind(), "miss");
                Ok(ConditionalResponse::from_computed(payload, etag, if_none_match))
            }
        }
    }
}

/// Kind label for metrics, taken from the key's leading segment.
fn namespace_kind(request_key: &str) -> &str {
    request_key.split(':').next().unwrap_or(request_key)
}
