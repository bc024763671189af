//! One-way server-push stream (`GET /stream`, `text/event-stream`).

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Extension, Query, rejection::QueryRejection},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, Sse},
    },
};
use chrono::Utc;

use hubcast_infra::realtime::{self, StreamFrame, StreamRegistry};

use crate::app::dto::{self, StreamParams};
use crate::app::{errors, services::AppServices};

/// GET /stream?project_id=1&topics=entity:*,edge:created&since=2024-01-01T00:00:00Z
///
/// With `since`, stored events are replayed (as the topics they would have
/// produced) right after the `connected` frame and before live deliveries.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    params: Result<Query<StreamParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_query", rejection.body_text()),
    };
    let tenant = match dto::parse_tenant(params.project_id.as_deref()) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let patterns = match StreamRegistry::parse_patterns(params.topics.as_deref(), tenant.as_ref()) {
        Ok(patterns) => patterns,
        Err(e) => return errors::protocol_error_to_response(e),
    };

    // Register before replaying so nothing published in between is lost.
    let mut session = services.streams.open(tenant, patterns.clone());
    if let Some(since) = params.since {
        match realtime::catch_up(&services.events, &services.bridge, since, Utc::now(), &patterns).await {
            Ok(frames) => session.queue_catch_up(frames),
            Err(e) => return errors::service_error_to_response(e),
        }
    }

    let body = futures::stream::unfold(session, |mut session| async move {
        let frame = session.next_frame().await?;
        Some((Ok::<_, Infallible>(to_sse_event(&frame)), session))
    });
    Sse::new(body).into_response()
}

fn to_sse_event(frame: &StreamFrame) -> SseEvent {
    match (frame.event_name(), frame.data()) {
        (Some(name), Some(data)) => SseEvent::default().event(sse_safe(name)).data(data.to_string()),
        _ => SseEvent::default().comment("keepalive"),
    }
}

/// Event names may not contain line breaks on the wire.
fn sse_safe(name: &str) -> String {
    name.replace(['\n', '\r'], " ")
}
