//! booking-edge - Read-Path Cache Versioning & Payment Webhook Ingestion
//!
//! This crate provides the edge layer of a travel-booking platform: cheap
//! conditional reads over catalog data, and exactly-once application of
//! payment provider webhooks.
//!
//! # Features
//!
//! - **Namespace Versioning**: one counter per namespace; bumping it invalidates every key under it
//! - **Versioned Keys**: deterministic, injective keys built from ordered request parameters
//! - **Conditional GET**: stored ETags answer `If-None-Match` with 304 without touching the catalog
//! - **Webhook Idempotency**: signed deliveries logged first, effects applied once
//!
//! # Architecture
//!
//! ```text
//! Client ──▶ /api/trips ──▶ KeyBuilder ──▶ ConditionalResponder ──▶ TripCatalog
//!                              │                  │
//!                              ▼                  ▼
//!                        ┌──────────┐      ┌────────────┐
//!                        │ versions │      │ etag:<key> │      (KvBackend)
//!                        └────▲─────┘      └────────────┘
//!                             │ bump
//! Write path ──▶ InvalidationTrigger
//!
//! Provider ──▶ /webhooks/* ──▶ Signature ──▶ Event log ──▶ PaymentHandler
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use booking_edge::app::AppContext;
//! use booking_edge::catalog::StaticCatalog;
//! use booking_edge::config::AppConfig;
//! use booking_edge::webhook::LoggingHandler;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::from_env()?;
//!     let addr = config.bind_addr;
//!     let ctx = Arc::new(
//!         AppContext::connect(config, Arc::new(StaticCatalog::default()), Arc::new(LoggingHandler))
//!             .await?,
//!     );
//!
//!     let listener = tokio::net::TcpListener::bind(addr).await?;
//!     axum::serve(listener, ctx.router()).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod app;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod cors;
pub mod error;
pub mod forwarder;
pub mod handlers;
pub mod metrics;
pub mod webhook;

// Re-exports for convenience
pub use app::AppContext;
pub use cache::{ConditionalResponder, KeyBuilder, KvBackend, Namespace, VersionStore};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use webhook::{WebhookError, WebhookPipeline};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
