//! Webhook pipeline configuration.
//!
//! Signing secrets are read from the environment only and are redacted from
//! `Debug` output.

use std::fmt;
use std::time::Duration;

use super::events::Provider;
use crate::config::{parse_var, var, Lookup};
use crate::error::ConfigError;

/// Default allowed clock skew for timestamped signatures.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Default bound on a single handler call.
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct WebhookConfig {
    /// Stripe endpoint signing secret (`whsec_...`)
    pub stripe_secret: Option<String>,
    /// Paystack secret key
    pub paystack_secret: Option<String>,
    /// Maximum age of a Stripe signature timestamp
    pub tolerance: Duration,
    /// Bound on each handler call; exceeding it is a handler failure
    pub processing_timeout: Duration,
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &Option<String>| s.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("WebhookConfig")
            .field("stripe_secret", &redact(&self.stripe_secret))
            .field("paystack_secret", &redact(&self.paystack_secret))
            .field("tolerance", &self.tolerance)
            .field("processing_timeout", &self.processing_timeout)
            .finish()
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            stripe_secret: None,
            paystack_secret: None,
            tolerance: DEFAULT_TOLERANCE,
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
        }
    }
}

impl WebhookConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let mut config = Self {
            stripe_secret: var(lookup, "STRIPE_SECRET"),
            paystack_secret: var(lookup, "PAYSTACK_SECRET"),
            ..Self::default()
        };
        if let Some(secs) = parse_var::<u64>(lookup, "WEBHOOK_TOLERANCE_SECS")? {
            config.tolerance = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(lookup, "WEBHOOK_TIMEOUT_MS")? {
            if ms == 0 {
                return Err(ConfigError::InvalidVar {
                    var: "BOOKING_EDGE_WEBHOOK_TIMEOUT_MS".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
            config.processing_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }

    /// Test configuration with fixed secrets for both providers.
    pub fn test_config() -> Self {
        Self {
            stripe_secret: Some("whsec_test_secret".to_string()),
            paystack_secret: Some("sk_test_paystack".to_string()),
            tolerance: DEFAULT_TOLERANCE,
            processing_timeout: Duration::from_secs(2),
        }
    }

    /// Signing secret for `provider`, if that provider is enabled.
    pub fn secret_for(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Stripe => self.stripe_secret.as_deref(),
            Provider::Paystack => self.paystack_secret.as_deref(),
        }
    }

    /// Providers with a configured secret.
    pub fn enabled_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.secret_for(*p).is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", WebhookConfig::test_config());
        assert!(!rendered.contains("whsec_test_secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_enabled_providers() {
        let config = WebhookConfig {
            paystack_secret: Some("sk".to_string()),
            ..WebhookConfig::default()
        };
        assert_eq!(config.enabled_providers(), vec![Provider::Paystack]);
        assert!(config.secret_for(Provider::Stripe).is_none());
    }

    #[test]
    fn test_from_lookup() {
        let lookup = |name: &str| match name {
            "BOOKING_EDGE_STRIPE_SECRET" => Some("whsec_x".to_string()),
            "BOOKING_EDGE_WEBHOOK_TIMEOUT_MS" => Some("1500".to_string()),
            _ => None,
        };
        let config = WebhookConfig::from_lookup(&lookup).unwrap();
        assert_eq!(config.secret_for(Provider::Stripe), Some("whsec_x"));
        assert_eq!(config.processing_timeout, Duration::from_millis(1500));
        assert_eq!(config.tolerance, DEFAULT_TOLERANCE);
    }
}
