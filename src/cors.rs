//! CORS policy for the public HTTP surface.
//!
//! Browser clients of the booking frontend revalidate catalog reads with
//! `If-None-Match`, so that header is allowed on requests and `ETag`/`X-Cache`
//! are exposed on responses. Origins are limited to loopback plus an explicit
//! allow-list.
//!
//! # Example
//!
//! ```rust,ignore
//! use booking_edge::cors::{cors_layer, CorsConfig};
//!
//! let app = Router::new()
//!     .route("/api/trips", get(list_trips))
//!     .layer(cors_layer(&CorsConfig::with_origins(["https://book.example.com"])));
//! ```

use std::time::Duration;

use http::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use http::Method;
use tower_http::cors::{AllowOrigin, CorsLayer};
use url::{Host, Url};

use crate::cache::X_CACHE;

/// Request headers browsers may send.
pub const ALLOWED_HEADERS: [HeaderName; 3] = [CONTENT_TYPE, AUTHORIZATION, IF_NONE_MATCH];

/// Methods browsers may use.
pub const ALLOWED_METHODS: [Method; 4] = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];

/// Default max age for preflight cache (1 hour)
pub const DEFAULT_MAX_AGE_SECS: u64 = 3600;

/// CORS configuration options.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allow `localhost`, `127.0.0.1` and `[::1]` on any port
    pub allow_localhost: bool,
    /// Exact origins allowed in addition to loopback
    pub allowed_origins: Vec<String>,
    /// Maximum age for preflight cache in seconds
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_localhost: true,
            allowed_origins: Vec::new(),
            max_age_secs: DEFAULT_MAX_AGE_SECS,
        }
    }
}

impl CorsConfig {
    /// Loopback plus the given origins.
    pub fn with_origins<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_origins: origins
                .into_iter()
                .map(|o| o.into().trim_end_matches('/').to_ascii_lowercase())
                .collect(),
            ..Self::default()
        }
    }

    /// Only the configured origins, no loopback.
    pub fn strict(mut self) -> Self {
        self.allow_localhost = false;
        self
    }

    /// Whether a browser at `origin` may read responses.
    pub fn allows(&self, origin: &HeaderValue) -> bool {
        let Ok(origin) = origin.to_str() else {
            return false;
        };
        if self.allow_localhost && is_localhost_origin(origin) {
            return true;
        }
        let origin = origin.to_ascii_lowercase();
        self.allowed_origins.iter().any(|allowed| *allowed == origin)
    }
}

/// Build the tower-http layer for `config`.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let policy = config.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| policy.allows(origin)))
        .allow_methods(ALLOWED_METHODS)
        .allow_headers(ALLOWED_HEADERS)
        .expose_headers([ETAG, X_CACHE.clone()])
        .max_age(Duration::from_secs(config.max_age_secs))
}

/// Whether `origin` is an http(s) loopback origin.
///
/// Hosts like `localhost.evil.com` are rejected because the parsed host must
/// equal the loopback name exactly.
pub fn is_localhost_origin(origin: &str) -> bool {
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[test]
    fn test_localhost_origins() {
        assert!(is_localhost_origin("http://localhost"));
        assert!(is_localhost_origin("http://localhost:3000"));
        assert!(is_localhost_origin("https://127.0.0.1:8443"));
        assert!(is_localhost_origin("http://[::1]:8080"));
    }

    #[test]
    fn test_lookalike_origins_rejected() {
        assert!(!is_localhost_origin("http://localhost.evil.com"));
        assert!(!is_localhost_origin("http://evil-localhost:3000"));
        assert!(!is_localhost_origin("http://192.168.1.10"));
        assert!(!is_localhost_origin("ftp://localhost"));
        assert!(!is_localhost_origin("not an origin"));
    }

    #[test]
    fn test_configured_origins() {
        let config = CorsConfig::with_origins(["https://Book.Example.com/"]);
        assert!(config.allows(&HeaderValue::from_static("https://book.example.com")));
        assert!(config.allows(&HeaderValue::from_static("http://localhost:5173")));
        assert!(!config.allows(&HeaderValue::from_static("https://other.example.com")));

        let strict = config.strict();
        assert!(!strict.allows(&HeaderValue::from_static("http://localhost:5173")));
    }

    #[tokio::test]
    async fn test_exposes_cache_headers() {
        let app: Router = Router::new()
            .route("/api/trips", get(|| async { "ok" }))
            .layer(cors_layer(&CorsConfig::default()));

        let request = Request::get("/api/trips")
            .header("origin", "http://localhost:3000")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let exposed = response.headers()["access-control-expose-headers"]
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        assert!(exposed.contains("etag"));
        assert!(exposed.contains("x-cache"));
    }
}
