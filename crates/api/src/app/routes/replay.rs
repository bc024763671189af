//! Historical replay for clients catching up after downtime.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::app::dto::{ReplayParams, ReplayResponse};
use crate::app::{errors, services::AppServices};

/// GET /events/replay?subject=graph.node.*&since=...&until=...&correlation_id=...&limit=100
///
/// Events come back in timestamp order. `limit` defaults to 100 and must lie
/// in `1..=1000`; anything else is a `400`, never silently clamped.
pub async fn replay(
    Extension(services): Extension<Arc<AppServices>>,
    params: Result<Query<ReplayParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_query", rejection.body_text()),
    };
    let query = match params.into_query() {
        Ok(query) => query,
        Err(response) => return response,
    };

    match services.events.replay(query).await {
        Ok(events) => Json(ReplayResponse::from(events)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
