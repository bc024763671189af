use std::sync::Arc;

use axum::{Json, extract::Extension};

use hubcast_infra::MetricsSnapshot;

use crate::app::dto::{ConnectionsResponse, HealthResponse};
use crate::app::services::AppServices;

/// GET /health
///
/// Always `200`; a lost bus shows up as `"status": "degraded"` since publishing
/// and replay keep working without it.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> Json<HealthResponse> {
    let bus = *services.events.bus_status().borrow();
    Json(HealthResponse {
        status: if bus.is_connected() { "ok" } else { "degraded" },
        bus,
        fanout_active: services.fanout.is_active(),
        sockets: services.sockets.len(),
        streams: services.streams.len(),
    })
}

/// GET /metrics/subscriptions
pub async fn subscription_metrics(Extension(services): Extension<Arc<AppServices>>) -> Json<MetricsSnapshot> {
    Json(services.metrics.snapshot())
}

/// GET /connections
pub async fn connections(Extension(services): Extension<Arc<AppServices>>) -> Json<ConnectionsResponse> {
    Json(ConnectionsResponse {
        sockets: services.sockets.snapshot(),
        streams: services.streams.snapshot(),
    })
}
