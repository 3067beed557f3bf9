//! Service configuration.
//!
//! All settings come from `BOOKING_EDGE_*` environment variables; secrets are
//! never given defaults and never logged. CLI flags in `main` override the
//! server address, Redis URL and catalog path.
//!
//! Every `from_env` has a `from_lookup` twin taking a lookup function so tests
//! can supply variables without mutating the process environment.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::cache::Namespace;
use crate::error::ConfigError;
use crate::forwarder::ForwarderConfig;
use crate::webhook::WebhookConfig;

/// Prefix shared by every environment variable.
pub const ENV_PREFIX: &str = "BOOKING_EDGE_";

/// Default time-to-live for stored ETags.
pub const DEFAULT_ETAG_TTL: Duration = Duration::from_secs(60);

/// Default bound on a single backend call.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Lookup function signature used by the `from_lookup` constructors.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Read `BOOKING_EDGE_<name>` through `lookup`, treating empty values as unset.
pub(crate) fn var(lookup: Lookup<'_>, name: &str) -> Option<String> {
    lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
}

/// Parse `BOOKING_EDGE_<name>` if present.
pub(crate) fn parse_var<T>(lookup: Lookup<'_>, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(lookup, name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidVar {
                var: format!("{ENV_PREFIX}{name}"),
                reason: e.to_string(),
            }),
    }
}

/// Cache layer settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied to ETags when no per-kind override exists
    pub default_etag_ttl: Duration,
    /// Per namespace-kind TTL overrides (`trips`, `trip-schedules`, ...)
    pub etag_ttl_overrides: HashMap<String, Duration>,
    /// Bound on each backend call
    pub backend_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut overrides = HashMap::new();
        overrides.insert(
            crate::cache::TRIP_SCHEDULES.to_string(),
            Duration::from_secs(30),
        );
        Self {
            default_etag_ttl: DEFAULT_ETAG_TTL,
            etag_ttl_overrides: overrides,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }
}

impl CacheConfig {
    /// Known namespace kinds that accept a TTL override variable.
    const KINDS: [&'static str; 2] = [crate::cache::TRIPS, crate::cache::TRIP_SCHEDULES];

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|name| std::env::var(name).ok())
    }

    /// Load through `lookup`.
    ///
    /// Overrides use `ETAG_TTL_<KIND>_SECS` with the kind upper-cased and `-`
    /// replaced by `_`, e.g. `BOOKING_EDGE_ETAG_TTL_TRIP_SCHEDULES_SECS`.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64>(lookup, "ETAG_TTL_SECS")? {
            config.default_etag_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(lookup, "BACKEND_TIMEOUT_MS")? {
            config.backend_timeout = Duration::from_millis(ms);
        }
        for kind in Self::KINDS {
            let name = format!("ETAG_TTL_{}_SECS", kind.to_uppercase().replace('-', "_"));
            if let Some(secs) = parse_var::<u64>(lookup, &name)? {
                config
                    .etag_ttl_overrides
                    .insert(kind.to_string(), Duration::from_secs(secs));
            }
        }

        if config.default_etag_ttl.is_zero()
            || config.etag_ttl_overrides.values().any(Duration::is_zero)
        {
            return Err(ConfigError::InvalidVar {
                var: format!("{ENV_PREFIX}ETAG_TTL_*"),
                reason: "ETag TTLs must be at least one second".to_string(),
            });
        }
        Ok(config)
    }

    /// Test configuration with short TTLs.
    pub fn test_config() -> Self {
        Self {
            default_etag_ttl: Duration::from_secs(5),
            etag_ttl_overrides: HashMap::new(),
            backend_timeout: Duration::from_millis(100),
        }
    }

    /// ETag TTL for `namespace`, by its kind.
    pub fn ttl_for(&self, namespace: &Namespace) -> Duration {
        self.etag_ttl_overrides
            .get(namespace.kind())
            .copied()
            .unwrap_or(self.default_etag_ttl)
    }
}

/// Top-level configuration assembled at process start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,
    /// Redis URL; `None` selects the in-memory backend
    pub redis_url: Option<String>,
    /// Cache layer settings
    pub cache: CacheConfig,
    /// Webhook pipeline settings
    pub webhook: WebhookConfig,
    /// Analytics forwarding; `None` disables it
    pub forwarder: Option<ForwarderConfig>,
    /// Bearer token guarding the ops routes; `None` leaves them unmounted
    pub ops_token: Option<String>,
    /// Extra origins allowed by CORS besides localhost
    pub cors_origins: Vec<String>,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|name| std::env::var(name).ok())
    }

    /// Load through `lookup`.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let host = parse_var::<IpAddr>(lookup, "HOST")?
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let port = parse_var::<u16>(lookup, "PORT")?.unwrap_or(8080);

        let cors_origins = var(lookup, "CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            redis_url: var(lookup, "REDIS_URL"),
            cache: CacheConfig::from_lookup(lookup)?,
            webhook: WebhookConfig::from_lookup(lookup)?,
            forwarder: ForwarderConfig::from_lookup(lookup)?,
            ops_token: var(lookup, "OPS_TOKEN"),
            cors_origins,
        })
    }

    /// Configuration for tests: in-memory backend, test secrets, no forwarding.
    pub fn test_config() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            redis_url: None,
            cache: CacheConfig::test_config(),
            webhook: WebhookConfig::test_config(),
            forwarder: None,
            ops_token: Some("test-ops-token".to_string()),
            cors_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = AppConfig::from_lookup(&lookup_from(&[])).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.redis_url.is_none());
        assert!(config.ops_token.is_none());
        assert!(config.forwarder.is_none());
        assert_eq!(config.cache.ttl_for(&Namespace::trips()), DEFAULT_ETAG_TTL);
        assert_eq!(
            config.cache.ttl_for(&Namespace::trip_schedules("t1")),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_overrides() {
        let lookup = lookup_from(&[
            ("BOOKING_EDGE_PORT", "9100"),
            ("BOOKING_EDGE_REDIS_URL", "redis://cache:6379"),
            ("BOOKING_EDGE_ETAG_TTL_SECS", "120"),
            ("BOOKING_EDGE_ETAG_TTL_TRIPS_SECS", "15"),
            ("BOOKING_EDGE_CORS_ORIGINS", "https://book.example, https://admin.example"),
        ]);
        let config = AppConfig::from_lookup(&lookup).unwrap();
        assert_eq!(config.bind_addr.port(), 9100);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.cache.default_etag_ttl, Duration::from_secs(120));
        assert_eq!(
            config.cache.ttl_for(&Namespace::trips()),
            Duration::from_secs(15)
        );
        assert_eq!(config.cors_origins.len(), 2);
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let lookup = lookup_from(&[("BOOKING_EDGE_PORT", "eighty")]);
        let err = AppConfig::from_lookup(&lookup).unwrap_err();
        assert!(err.to_string().contains("BOOKING_EDGE_PORT"));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let lookup = lookup_from(&[("BOOKING_EDGE_ETAG_TTL_SECS", "0")]);
        assert!(CacheConfig::from_lookup(&lookup).is_err());
    }

    #[test]
    fn test_empty_values_are_unset() {
        let lookup = lookup_from(&[("BOOKING_EDGE_REDIS_URL", "  ")]);
        let config = AppConfig::from_lookup(&lookup).unwrap();
        assert!(config.redis_url.is_none());
    }
}
