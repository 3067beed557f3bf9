//! Operator endpoints for namespace versions.
//!
//! Mounted only when an ops token is configured. Every request must carry
//! `Authorization: Bearer <token>`; the comparison is constant-time.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

use crate::app::AppContext;
use crate::cache::Namespace;
use crate::error::CacheError;

/// Current or new version of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBody {
    /// Namespace the version belongs to
    pub namespace: String,
    /// Version value
    pub version: u64,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn cache_error_response(e: CacheError) -> Response {
    match e {
        CacheError::InvalidNamespace(_) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        other if other.is_transient() => {
            warn!(error = %other, "Ops request hit backend failure");
            error_response(StatusCode::SERVICE_UNAVAILABLE, other.to_string())
        }
        other => {
            warn!(error = %other, "Ops request found corrupt state");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn require_ops_token(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = ctx.config.ops_token.as_deref() else {
        return error_response(StatusCode::NOT_FOUND, "not found");
    };
    let authorized = bearer_token(&request)
        .map(|given| bool::from(given.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false);
    if !authorized {
        warn!(path = %request.uri().path(), "Rejected ops request");
        return error_response(StatusCode::UNAUTHORIZED, "invalid ops token");
    }
    next.run(request).await
}

/// `GET /ops/cache/:namespace/version`
#[instrument(skip_all)]
async fn get_version(State(ctx): State<Arc<AppContext>>, Path(raw): Path<String>) -> Response {
    let namespace = match Namespace::new(raw) {
        Ok(ns) => ns,
        Err(e) => return cache_error_response(e),
    };
    match ctx.versions.get_version(&namespace).await {
        Ok(version) => Json(VersionBody {
            namespace: namespace.to_string(),
            version,
        })
        .into_response(),
        Err(e) => cache_error_response(e),
    }
}

/// `POST /ops/cache/:namespace/bump`
#[instrument(skip_all)]
async fn bump_version(State(ctx): State<Arc<AppContext>>, Path(raw): Path<String>) -> Response {
    let namespace = match Namespace::new(raw) {
        Ok(ns) => ns,
        Err(e) => return cache_error_response(e),
    };
    match ctx.versions.bump_version(&namespace).await {
        Ok(version) => {
            info!(namespace = %namespace, version, "Namespace bumped by operator");
            Json(VersionBody {
                namespace: namespace.to_string(),
                version,
            })
            .into_response()
        }
        Err(e) => cache_error_response(e),
    }
}

/// `DELETE /ops/cache/:namespace/version`
#[instrument(skip_all)]
async fn reset_version(State(ctx): State<Arc<AppContext>>, Path(raw): Path<String>) -> Response {
    let namespace = match Namespace::new(raw) {
        Ok(ns) => ns,
        Err(e) => return cache_error_response(e),
    };
    match ctx.versions.reset_version(&namespace).await {
        Ok(()) => {
            info!(namespace = %namespace, "Namespace version reset by operator");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => cache_error_response(e),
    }
}

/// Ops routes guarded by the bearer token.
pub fn ops_router(ctx: Arc<AppContext>) -> Router<Arc<AppContext>> {
    Router::new()
        .route(
            "/ops/cache/:namespace/version",
            get(get_version).delete(reset_version),
        )
        .route("/ops/cache/:namespace/bump", post(bump_version))
        .route_layer(middleware::from_fn_with_state(ctx, require_ops_token))
}
