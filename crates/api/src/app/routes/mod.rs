use axum::{Router, routing::get};

pub mod event_stream;
pub mod events;
pub mod replay;
pub mod socket;
pub mod system;

/// Router for every endpoint except `/health`.
pub fn router() -> Router {
    Router::new()
        .nest("/events", events::router())
        .route("/ws", get(socket::upgrade))
        .route("/stream", get(event_stream::stream))
        .route("/metrics/subscriptions", get(system::subscription_metrics))
        .route("/connections", get(system::connections))
}
