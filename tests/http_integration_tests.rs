//! End-to-end tests for booking-edge over the assembled router.
//!
//! # Test Categories
//!
//! 1. **Conditional Reads**: ETag issue, 304 short-circuit, header normalization
//! 2. **Invalidation**: write-path bumps, per-trip isolation, ops endpoints
//! 3. **Webhooks**: signatures, idempotent redelivery, persistence before effects
//! 4. **Degraded Backend**: fail-open reads, readiness
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --package booking-edge --test http_integration_tests
//! ```

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use booking_edge::app::AppContext;
use booking_edge::cache::{InMemoryBackend, KvBackend};
use booking_edge::catalog::{Schedule, StaticCatalog, Trip};
use booking_edge::config::AppConfig;
use booking_edge::webhook::InMemoryBookings;
use chrono::{TimeZone, Utc};
use tower::ServiceExt;

// ============================================================================
// Fixtures
// ============================================================================

struct Harness {
    ctx: Arc<AppContext>,
    catalog: Arc<StaticCatalog>,
    bookings: Arc<InMemoryBookings>,
    backend: Arc<InMemoryBackend>,
    router: Router,
}

fn schedule(id: &str, day: u32, seats: u32) -> Schedule {
    Schedule {
        id: id.to_string(),
        departs_at: Utc.with_ymd_and_hms(2026, 5, day, 7, 30, 0).unwrap(),
        arrives_at: None,
        seats_available: seats,
        price_minor: 2_000_000,
        currency: "NGN".to_string(),
    }
}

fn trip(id: &str, name: &str, category: &str) -> Trip {
    Trip {
        id: id.to_string(),
        name: name.to_string(),
        category: category.to_string(),
        operator: "GoTravel".to_string(),
        origin: "Lagos".to_string(),
        destination: "Ibadan".to_string(),
        description: None,
        schedules: vec![schedule(&format!("{id}-s1"), 4, 30)],
    }
}

fn harness() -> Harness {
    let catalog = Arc::new(StaticCatalog::new(vec![
        trip("t1", "Morning Coach", "bus"),
        trip("t2", "River Cruise", "ferry"),
    ]));
    let bookings = Arc::new(InMemoryBookings::new());
    let backend = Arc::new(InMemoryBackend::new());
    let ctx = Arc::new(
        AppContext::build(
            AppConfig::test_config(),
            backend.clone(),
            catalog.clone(),
            bookings.clone(),
        )
        .unwrap(),
    );
    Harness {
        router: ctx.router(),
        ctx,
        catalog,
        bookings,
        backend,
    }
}

async fn get(router: &Router, uri: &str, if_none_match: Option<&str>) -> Response {
    let mut request = Request::get(uri);
    if let Some(etag) = if_none_match {
        request = request.header("if-none-match", etag);
    }
    router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn header(response: &Response, name: &str) -> String {
    response.headers()[name].to_str().unwrap().to_string()
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// MODULE: Conditional Read Tests
// ============================================================================

mod conditional_read_tests {
    use super::*;

    #[tokio::test]
    async fn test_first_read_issues_etag() {
        let h = harness();
        let response = get(&h.router, "/api/trips", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-cache"), "MISS");
        let etag = header(&response, "etag");
        assert!(etag.starts_with('"') && etag.ends_with('"'));

        let body = body_json(response).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["limit"], 20);
    }

    #[tokio::test]
    async fn test_matching_etag_never_queries_catalog() {
        let h = harness();
        let first = get(&h.router, "/api/trips?category=bus", None).await;
        let etag = header(&first, "etag");
        assert_eq!(h.catalog.queries(), 1);

        for _ in 0..3 {
            let again = get(&h.router, "/api/trips?category=bus", Some(&etag)).await;
            assert_eq!(again.status(), StatusCode::NOT_MODIFIED);
            assert_eq!(header(&again, "x-cache"), "HIT");
            assert_eq!(header(&again, "etag"), etag);
            let bytes = to_bytes(again.into_body(), usize::MAX).await.unwrap();
            assert!(bytes.is_empty());
        }
        assert_eq!(h.catalog.queries(), 1);
    }

    #[tokio::test]
    async fn test_weak_and_listed_validators_match() {
        let h = harness();
        let etag = header(&get(&h.router, "/api/trips", None).await, "etag");

        let weak = format!("W/{etag}");
        let response = get(&h.router, "/api/trips", Some(&weak)).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

        let listed = format!("\"stale\", {etag}");
        let response = get(&h.router, "/api/trips", Some(&listed)).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(h.catalog.queries(), 1);
    }

    #[tokio::test]
    async fn test_different_params_have_separate_etags() {
        let h = harness();
        let buses = get(&h.router, "/api/trips?category=bus", None).await;
        let etag = header(&buses, "etag");

        let ferries = get(&h.router, "/api/trips?category=ferry", Some(&etag)).await;
        assert_eq!(ferries.status(), StatusCode::OK);
        assert_eq!(h.catalog.queries(), 2);
    }

    #[tokio::test]
    async fn test_stale_etag_gets_fresh_body() {
        let h = harness();
        let response = get(&h.router, "/api/trips", Some("\"not-the-etag\"")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-cache"), "MISS");
    }
}

// ============================================================================
// MODULE: Invalidation Tests
// ============================================================================

mod invalidation_tests {
    use super::*;
    use booking_edge::cache::{CatalogChange, Namespace};

    #[tokio::test]
    async fn test_trip_edit_invalidates_listing() {
        let h = harness();
        let etag = header(&get(&h.router, "/api/trips", None).await, "etag");

        let change = h.catalog.upsert_trip(trip("t1", "Morning Coach Deluxe", "bus"));
        h.ctx.trigger.invalidate(&change).await.unwrap();

        let response = get(&h.router, "/api/trips", Some(&etag)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_ne!(header(&response, "etag"), etag);
        let body = body_json(response).await;
        assert_eq!(body["trips"][0]["name"], "Morning Coach Deluxe");
    }

    #[tokio::test]
    async fn test_bump_without_data_change_recomputes() {
        let h = harness();
        let etag = header(&get(&h.router, "/api/trips", None).await, "etag");

        h.ctx
            .trigger
            .invalidate(&CatalogChange::Namespace(Namespace::trips()))
            .await
            .unwrap();

        // Same bytes, same fingerprint: 304, but the catalog was consulted.
        let response = get(&h.router, "/api/trips", Some(&etag)).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(header(&response, "x-cache"), "MISS");
        assert_eq!(h.catalog.queries(), 2);
    }

    #[tokio::test]
    async fn test_schedule_change_is_scoped_to_trip() {
        let h = harness();
        let t1 = header(&get(&h.router, "/api/trips/t1/schedules", None).await, "etag");
        let t2 = header(&get(&h.router, "/api/trips/t2/schedules", None).await, "etag");

        let change = h
            .catalog
            .replace_schedules("t1", vec![schedule("t1-s1", 4, 29)])
            .unwrap();
        h.ctx.trigger.invalidate(&change).await.unwrap();

        let response = get(&h.router, "/api/trips/t1/schedules", Some(&t1)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["schedules"][0]["seats_available"], 29);

        let response = get(&h.router, "/api/trips/t2/schedules", Some(&t2)).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(header(&response, "x-cache"), "HIT");
    }

    #[tokio::test]
    async fn test_trip_id_with_space_reads_and_invalidates() {
        let h = harness();
        let change = h.catalog.upsert_trip(trip("t 1", "Night Coach", "bus"));
        h.ctx.trigger.invalidate(&change).await.unwrap();

        let response = get(&h.router, "/api/trips/t%201/schedules", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let etag = header(&response, "etag");
        assert_eq!(body_json(response).await["trip_id"], "t 1");

        let change = h
            .catalog
            .replace_schedules("t 1", vec![schedule("t 1-s1", 4, 12)])
            .unwrap();
        h.ctx.trigger.invalidate(&change).await.unwrap();

        let response = get(&h.router, "/api/trips/t%201/schedules", Some(&etag)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["schedules"][0]["seats_available"], 12);
    }

    #[tokio::test]
    async fn test_ops_bump_invalidates() {
        let h = harness();
        let etag = header(&get(&h.router, "/api/trips?q=coach", None).await, "etag");

        let bump = h
            .router
            .clone()
            .oneshot(
                Request::post("/ops/cache/trips/bump")
                    .header("authorization", "Bearer test-ops-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bump.status(), StatusCode::OK);
        assert_eq!(body_json(bump).await["version"], 1);

        let etag_key = "etag:trips:v0:cat:_:op:_:q:coach:incSchedules:false:start:_:end:_:l:20:o:0";
        assert!(h.backend.get(etag_key).await.unwrap().is_some());

        get(&h.router, "/api/trips?q=coach", Some(&etag)).await;
        assert_eq!(h.catalog.queries(), 2);
    }
}

// ============================================================================
// MODULE: Webhook Tests
// ============================================================================

mod webhook_tests {
    use super::*;
    use booking_edge::webhook::signature::{sign_paystack, sign_stripe};
    use booking_edge::webhook::{
        BookingPaymentState, Provider, WebhookEventId, WebhookEventStore,
    };
    use serde_json::json;

    fn stripe_success(event_id: &str, booking: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": event_id,
            "type": "payment_intent.succeeded",
            "data": { "object": {
                "id": "pi_123",
                "amount": 450000,
                "currency": "ngn",
                "metadata": { "booking_reference": booking }
            }}
        }))
        .unwrap()
    }

    async fn post_stripe(router: &Router, body: &[u8], signature: &str) -> Response {
        router
            .clone()
            .oneshot(
                Request::post("/webhooks/stripe")
                    .header("stripe-signature", signature)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    fn signed(body: &[u8]) -> String {
        sign_stripe(body, "whsec_test_secret", Utc::now().timestamp())
    }

    #[tokio::test]
    async fn test_redelivery_applies_once() {
        let h = harness();
        let body = stripe_success("evt_1", "BK-1");

        let first = post_stripe(&h.router, &body, &signed(&body)).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(body_json(first).await["status"], "processed");

        let second = post_stripe(&h.router, &body, &signed(&body)).await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(body_json(second).await["status"], "duplicate");

        assert_eq!(h.bookings.effects(), 1);
        assert_eq!(h.bookings.state("BK-1"), Some(BookingPaymentState::Paid));

        let id = WebhookEventId {
            provider: Provider::Stripe,
            id: "evt_1".to_string(),
        };
        let record = h.ctx.pipeline.store().get(&id).await.unwrap().unwrap();
        assert_eq!(record.delivery_count, 2);
        assert!(record.processed && record.success);
    }

    #[tokio::test]
    async fn test_tampered_body_rejected_and_not_stored() {
        let h = harness();
        let body = stripe_success("evt_2", "BK-2");
        let signature = signed(&body);
        let tampered = stripe_success("evt_2", "BK-999");

        let response = post_stripe(&h.router, &tampered, &signature).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["received"], false);

        let id = WebhookEventId {
            provider: Provider::Stripe,
            id: "evt_2".to_string(),
        };
        assert!(h.ctx.pipeline.store().get(&id).await.unwrap().is_none());
        assert_eq!(h.bookings.effects(), 0);
    }

    #[tokio::test]
    async fn test_missing_booking_reference_is_recorded_failure() {
        let h = harness();
        let body = serde_json::to_vec(&json!({
            "id": "evt_3",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_3", "metadata": {} } }
        }))
        .unwrap();

        let response = post_stripe(&h.router, &body, &signed(&body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let id = WebhookEventId {
            provider: Provider::Stripe,
            id: "evt_3".to_string(),
        };
        let record = h.ctx.pipeline.store().get(&id).await.unwrap().unwrap();
        assert!(record.processed);
        assert!(!record.success);
        assert!(record.failure_reason.is_some());
    }

    #[tokio::test]
    async fn test_unknown_event_acknowledged() {
        let h = harness();
        let body = serde_json::to_vec(&json!({
            "id": "evt_4",
            "type": "customer.created",
            "data": { "object": {} }
        }))
        .unwrap();

        let response = post_stripe(&h.router, &body, &signed(&body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ignored");
        assert_eq!(h.bookings.effects(), 0);
    }

    #[tokio::test]
    async fn test_paystack_flow() {
        let h = harness();
        let body = serde_json::to_vec(&json!({
            "event": "charge.success",
            "data": { "id": 99, "reference": "BK-77", "amount": 10000, "currency": "NGN" }
        }))
        .unwrap();

        let response = h
            .router
            .clone()
            .oneshot(
                Request::post("/webhooks/paystack")
                    .header("x-paystack-signature", sign_paystack(&body, "sk_test_paystack"))
                    .body(Body::from(body.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["event_id"], "charge.success:99");
        assert_eq!(h.bookings.state("BK-77"), Some(BookingPaymentState::Paid));
    }

    #[tokio::test]
    async fn test_webhook_metrics_exported() {
        let h = harness();
        let body = stripe_success("evt_5", "BK-5");
        post_stripe(&h.router, &body, &signed(&body)).await;
        post_stripe(&h.router, &body, &signed(&body)).await;

        let snapshot = h.ctx.metrics.snapshot();
        assert_eq!(snapshot.webhooks_received, 2);
        assert_eq!(snapshot.webhooks_processed, 1);
        assert_eq!(snapshot.webhooks_duplicate, 1);
    }
}

// ============================================================================
// MODULE: Degraded Backend Tests
// ============================================================================

mod degraded_backend_tests {
    use super::*;
    use async_trait::async_trait;
    use booking_edge::error::{CacheError, CacheResult};
    use std::time::Duration;

    /// Backend whose every call fails, as if Redis were down.
    struct DownBackend;

    #[async_trait]
    impl KvBackend for DownBackend {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Err(CacheError::unavailable("GET", "connection refused"))
        }
        async fn incr(&self, _key: &str) -> CacheResult<i64> {
            Err(CacheError::unavailable("INCR", "connection refused"))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> CacheResult<()> {
            Err(CacheError::unavailable("SET", "connection refused"))
        }
        async fn del(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::unavailable("DEL", "connection refused"))
        }
        async fn ping(&self) -> CacheResult<()> {
            Err(CacheError::unavailable("PING", "connection refused"))
        }
        fn backend_name(&self) -> &'static str {
            "down"
        }
    }

    fn degraded() -> (Router, Arc<StaticCatalog>) {
        let catalog = Arc::new(StaticCatalog::new(vec![trip("t1", "Morning Coach", "bus")]));
        let ctx = Arc::new(
            AppContext::build(
                AppConfig::test_config(),
                Arc::new(DownBackend),
                catalog.clone(),
                Arc::new(InMemoryBookings::new()),
            )
            .unwrap(),
        );
        (ctx.router(), catalog)
    }

    #[tokio::test]
    async fn test_reads_fail_open() {
        let (router, catalog) = degraded();
        let first = get(&router, "/api/trips", None).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(header(&first, "x-cache"), "MISS");
        let etag = header(&first, "etag");

        let second = get(&router, "/api/trips", Some(&etag)).await;
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(header(&second, "x-cache"), "MISS");
        assert_eq!(catalog.queries(), 2);
    }

    #[tokio::test]
    async fn test_not_ready() {
        let (router, _) = degraded();
        let response = get(&router, "/ready", None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let health = get(&router, "/health", None).await;
        assert_eq!(health.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_webhook_not_acknowledged_when_log_unavailable() {
        let (router, _) = degraded();
        let body = br#"{"id":"evt_9","type":"payment_intent.succeeded","data":{"object":{}}}"#;
        let signature = booking_edge::webhook::signature::sign_stripe(
            body,
            "whsec_test_secret",
            Utc::now().timestamp(),
        );
        let response = router
            .oneshot(
                Request::post("/webhooks/stripe")
                    .header("stripe-signature", signature)
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
