//! Bidirectional socket transport.
//!
//! Lifecycle: `connect` (queues a `connected` frame) → any number of
//! `handle_text` calls that mutate the subscription set → `disconnect`.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use hubcast_core::{ConnectionId, TenantId};
use hubcast_events::subject::{self, TOPIC_DELIMITER};

use super::frames::{ClientAction, ClientFrame, ProtocolError, ServerFrame};
use super::registry::{ConnectionRegistry, ConnectionSnapshot, TransportKind};
use crate::fanout::TopicSink;
use crate::metrics::SubscriptionMetrics;

#[derive(Clone)]
pub struct SocketRegistry {
    inner: Arc<ConnectionRegistry<ServerFrame>>,
}

impl SocketRegistry {
    pub fn new(capacity: usize, metrics: Arc<SubscriptionMetrics>) -> Self {
        Self {
            inner: Arc::new(ConnectionRegistry::new(TransportKind::Socket, capacity, metrics)),
        }
    }

    /// Register a socket; the `connected` frame is already queued on the receiver.
    pub fn connect(&self, tenant: Option<TenantId>) -> (ConnectionId, mpsc::Receiver<ServerFrame>) {
        let (id, rx) = self.inner.register(tenant, Vec::new());
        self.inner.send(id, ServerFrame::Connected { session_id: id });
        (id, rx)
    }

    /// Apply one client text frame.
    ///
    /// The reply (ack or error) is queued to the connection and also returned.
    /// Protocol errors never close the connection.
    pub fn handle_text(&self, id: ConnectionId, text: &str) -> ServerFrame {
        let reply = match self.apply(id, text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "rejected client frame");
                ServerFrame::error(&e)
            }
        };
        self.inner.send(id, reply.clone());
        reply
    }

    fn apply(&self, id: ConnectionId, text: &str) -> Result<ServerFrame, ProtocolError> {
        let frame = ClientFrame::parse(text)?;
        subject::validate_pattern(&frame.topic, TOPIC_DELIMITER).map_err(|source| ProtocolError::InvalidPattern {
            pattern: frame.topic.clone(),
            source,
        })?;

        match frame.action {
            ClientAction::Subscribe => {
                self.inner.add_pattern(id, &frame.topic);
                Ok(ServerFrame::Subscribed { topic: frame.topic })
            }
            ClientAction::Unsubscribe => {
                self.inner.remove_pattern(id, &frame.topic);
                Ok(ServerFrame::Unsubscribed { topic: frame.topic })
            }
        }
    }

    /// Idempotent.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.inner.unregister(id)
    }

    pub fn broadcast_to_topic(&self, topic: &str, payload: &JsonValue) -> usize {
        self.inner.broadcast(topic, || ServerFrame::Event {
            topic: topic.to_string(),
            data: payload.clone(),
        })
    }

    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        self.inner.snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl TopicSink for SocketRegistry {
    fn deliver(&self, topic: &str, payload: &JsonValue) -> usize {
        self.broadcast_to_topic(topic, payload)
    }
}
