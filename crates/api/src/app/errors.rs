use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use hubcast_infra::ServiceError;
use hubcast_infra::event_store::EventStoreError;
use hubcast_infra::realtime::ProtocolError;

pub fn service_error_to_response(err: ServiceError) -> Response {
    match err {
        ServiceError::InvalidSubject { .. } => json_error(StatusCode::BAD_REQUEST, "invalid_subject", err.to_string()),
        ServiceError::Query(e) => json_error(StatusCode::BAD_REQUEST, "invalid_query", e.to_string()),
        ServiceError::Store(e) => store_error_to_response(e),
        ServiceError::Bus(e) => json_error(StatusCode::BAD_GATEWAY, "bus_error", e.to_string()),
    }
}

fn store_error_to_response(err: EventStoreError) -> Response {
    tracing::error!(error = %err, "event store failure");
    match err {
        EventStoreError::Duplicate(_) => json_error(StatusCode::CONFLICT, "duplicate_event", err.to_string()),
        EventStoreError::Storage(_) | EventStoreError::Corrupt(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
        }
    }
}

pub fn protocol_error_to_response(err: ProtocolError) -> Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_topics", err.to_string())
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
