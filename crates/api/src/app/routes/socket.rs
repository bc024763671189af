//! Bidirectional socket transport (`GET /ws`).

use std::sync::Arc;

use axum::{
    extract::{
        Extension, Query,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};

use hubcast_core::TenantId;

use crate::app::dto::{self, SocketParams};
use crate::app::services::AppServices;

/// GET /ws?project_id=
///
/// Clients send `{"action":"subscribe"|"unsubscribe","topic":"entity:*:1"}`
/// and receive `connected`, acks, `error` and `event` frames.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<SocketParams>,
) -> Response {
    let tenant = match dto::parse_tenant(params.project_id.as_deref()) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    ws.on_upgrade(move |socket| serve_socket(socket, services, tenant))
}

async fn serve_socket(socket: WebSocket, services: Arc<AppServices>, tenant: Option<TenantId>) {
    let sockets = services.sockets.clone();
    let (id, mut outbound) = sockets.connect(tenant);
    let (mut sink, mut incoming) = socket.split();

    // The registry drops the sender when it gives up on this connection,
    // which ends the writer and closes the socket.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame.to_json())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader_sockets = sockets.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = incoming.next().await {
            match message {
                Message::Text(text) => {
                    reader_sockets.handle_text(id, &text);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    sockets.disconnect(id);
    tracing::debug!(connection_id = %id, "socket closed");
}
