// Provider payload and record types are self-describing; field docs live on the
// non-obvious ones only.
#![allow(missing_docs)]

//! Payment webhook ingestion.
//!
//! Authenticates Stripe and Paystack deliveries, persists each event before
//! any business effect, and applies each event's effect once despite
//! at-least-once delivery.
//!
//! - **Signature Verification**: HMAC over the raw body, constant-time compare
//! - **Event Log**: every authenticated delivery recorded, redeliveries counted
//! - **Idempotency**: settled events acknowledged without reprocessing
//! - **Normalization**: provider payloads mapped to one closed [`PaymentEvent`] enum
//!
//! # Architecture
//!
//! ```text
//! Request -> Signature -> Envelope -> Event Log -> Settled? -> PaymentHandler -> Mark
//!               |            |           |           |              |
//!               v            v           v           v              v
//!              401          400         500       200 dup      200 / 400 / 500
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use booking_edge::metrics::Metrics;
//! use booking_edge::webhook::{
//!     webhook_router, InMemoryEventStore, LoggingHandler, WebhookConfig, WebhookPipeline,
//! };
//!
//! let pipeline = WebhookPipeline::new(
//!     Arc::new(InMemoryEventStore::new()),
//!     Arc::new(LoggingHandler),
//!     WebhookConfig::from_env().expect("webhook config"),
//!     Arc::new(Metrics::new()),
//! );
//! let app: axum::Router = webhook_router(Arc::new(pipeline));
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod processor;
pub mod signature;
pub mod store;

pub use config::WebhookConfig;
pub use error::{WebhookError, WebhookResult};
pub use events::{InboundEvent, PaymentDetails, PaymentEvent, Provider, WebhookEventId};
pub use handler::{paystack_webhook_handler, stripe_webhook_handler, webhook_router, WebhookAck};
pub use processor::{
    BookingPaymentState, HandlerOutcome, InMemoryBookings, IngestOutcome, LoggingHandler,
    PaymentHandler, WebhookPipeline,
};
pub use signature::SignatureVerifier;
pub use store::{
    InMemoryEventStore, KvEventStore, MarkOutcome, NewWebhookEvent, StoredEvent, WebhookEvent,
    WebhookEventStore,
};
