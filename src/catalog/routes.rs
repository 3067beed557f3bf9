//! Cacheable catalog endpoints.
//!
//! Both routes go through [`ConditionalResponder::read_through`], so a client
//! revalidating with a current ETag gets a 304 without the catalog being
//! queried.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::{error, instrument};

use super::{Schedule, TripCatalog, TripQuery};
use crate::cache::{
    if_none_match, ConditionalResponder, ConditionalResponse, Namespace, Payload,
};

/// Shared state of the catalog routes.
pub struct CatalogState {
    pub catalog: Arc<dyn TripCatalog>,
    pub responder: ConditionalResponder,
}

/// Errors surfaced by catalog reads.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("catalog unavailable")]
    Catalog(#[source] anyhow::Error),

    #[error("failed to encode response")]
    Encode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Catalog(_) | Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = ?self, "Catalog read failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
struct SchedulesBody<'a> {
    trip_id: &'a str,
    schedules: Vec<Schedule>,
}

/// `GET /api/trips`
#[instrument(skip_all)]
async fn list_trips(
    State(state): State<Arc<CatalogState>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<TripQuery>,
) -> Result<ConditionalResponse, ApiError> {
    let query = query.normalized();
    let params = query.key_params();

    state
        .responder
        .read_through(&Namespace::trips(), &params, if_none_match(&headers), || async {
            let page = state
                .catalog
                .list_trips(&query)
                .await
                .map_err(ApiError::Catalog)?;
            Ok::<_, ApiError>(Payload::json(&page)?)
        })
        .await
}

/// `GET /api/trips/:trip_id/schedules`
#[instrument(skip_all)]
async fn trip_schedules(
    State(state): State<Arc<CatalogState>>,
    headers: axum::http::HeaderMap,
    Path(trip_id): Path<String>,
) -> Result<ConditionalResponse, ApiError> {
    let namespace = Namespace::trip_schedules(&trip_id);
    let params: [&str; 0] = [];

    state
        .responder
        .read_through(&namespace, &params, if_none_match(&headers), || async {
            let schedules = state
                .catalog
                .trip_schedules(&trip_id)
                .await
                .map_err(ApiError::Catalog)?
                .ok_or_else(|| ApiError::NotFound(format!("trip {trip_id} not found")))?;
            Ok::<_, ApiError>(Payload::json(&SchedulesBody {
                trip_id: &trip_id,
                schedules,
            })?)
        })
        .await
}

/// Catalog read routes.
pub fn catalog_router<S>(state: CatalogState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/api/trips", get(list_trips))
        .route("/api/trips/:trip_id/schedules", get(trip_schedules))
        .with_state(Arc::new(state))
}
