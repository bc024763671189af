//! Publish and point-lookup endpoints.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use hubcast_core::EventId;

use crate::app::dto::PublishEventRequest;
use crate::app::{errors, services::AppServices};

use super::replay;

pub fn router() -> Router {
    Router::new()
        .route("/", post(publish))
        .route("/replay", get(replay::replay))
        .route("/:event_id", get(get_event))
}

/// POST /events
///
/// Persists the event, then announces it on the bus. Responds `201` with the
/// receipt once the event is durable, even when the announcement fails.
pub async fn publish(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<PublishEventRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text()),
    };
    let request = match body.into_request() {
        Ok(request) => request,
        Err(response) => return response,
    };

    match services.events.publish(request).await {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /events/:event_id
pub async fn get_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(event_id): Path<String>,
) -> Response {
    let Ok(id) = event_id.parse::<EventId>() else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_event_id", format!("'{event_id}' is not a UUID"));
    };

    match services.events.get(id).await {
        Ok(Some(event)) => Json(event).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("event {id} not found")),
        Err(e) => errors::service_error_to_response(e),
    }
}
