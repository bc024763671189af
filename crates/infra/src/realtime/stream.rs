//! One-way server-push stream transport.
//!
//! A stream's patterns are fixed when it opens. The session yields a
//! `connected` frame, any queued catch-up frames, then live deliveries
//! interleaved with keepalives after each quiet interval.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, watch};

use hubcast_core::{ConnectionId, TenantId};
use hubcast_events::BusStatus;
use hubcast_events::subject::{self, TAIL_WILDCARD, TOPIC_DELIMITER};

use super::frames::{ProtocolError, StreamFrame};
use super::registry::{ConnectionRegistry, ConnectionSnapshot, TransportKind};
use crate::fanout::TopicSink;
use crate::metrics::SubscriptionMetrics;

pub const BUS_UNAVAILABLE_WARNING: &str = "event bus unavailable; live updates are paused, replay to catch up";

/// Topic families a tenant-scoped stream follows when none are requested.
const DEFAULT_SCOPED_PATTERNS: &[&str] = &["entity:*", "edge:*", "graph:invalidated"];

#[derive(Clone)]
pub struct StreamRegistry {
    inner: Arc<ConnectionRegistry<StreamFrame>>,
    keepalive: Duration,
    bus_status: watch::Receiver<BusStatus>,
}

impl StreamRegistry {
    pub fn new(
        capacity: usize,
        metrics: Arc<SubscriptionMetrics>,
        keepalive: Duration,
        bus_status: watch::Receiver<BusStatus>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionRegistry::new(TransportKind::Stream, capacity, metrics)),
            keepalive,
            bus_status,
        }
    }

    /// Build the pattern set from a comma-separated `topics` parameter.
    ///
    /// With a tenant every pattern gets `:<tenant>` appended. Without any
    /// topics the stream follows the default families (tenant given) or
    /// everything (no tenant).
    pub fn parse_patterns(topics: Option<&str>, tenant: Option<&TenantId>) -> Result<Vec<String>, ProtocolError> {
        let mut requested: Vec<String> = topics
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        if requested.is_empty() {
            requested = match tenant {
                Some(_) => DEFAULT_SCOPED_PATTERNS.iter().map(|p| p.to_string()).collect(),
                None => vec![TAIL_WILDCARD.to_string()],
            };
        }

        let mut patterns = Vec::with_capacity(requested.len());
        for pattern in requested {
            subject::validate_pattern(&pattern, TOPIC_DELIMITER).map_err(|source| ProtocolError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
            let scoped = match tenant {
                Some(_) if pattern.rsplit(TOPIC_DELIMITER).next() == Some(TAIL_WILDCARD) => {
                    return Err(ProtocolError::UnscopableTail(pattern));
                }
                Some(t) => format!("{pattern}{TOPIC_DELIMITER}{t}"),
                None => pattern,
            };
            if !patterns.contains(&scoped) {
                patterns.push(scoped);
            }
        }
        Ok(patterns)
    }

    pub fn open(&self, tenant: Option<TenantId>, patterns: Vec<String>) -> StreamSession {
        let (id, rx) = self.inner.register(tenant, patterns.clone());

        let mut bus_status = self.bus_status.clone();
        let bus_up = bus_status.borrow_and_update().is_connected();
        if !bus_up {
            tracing::warn!(connection_id = %id, "stream opened while the bus is unavailable");
        }

        let mut pending = VecDeque::new();
        pending.push_back(StreamFrame::Connected {
            patterns,
            warning: (!bus_up).then(|| BUS_UNAVAILABLE_WARNING.to_string()),
        });

        StreamSession {
            id,
            registry: self.inner.clone(),
            rx,
            pending,
            keepalive: self.keepalive,
            bus_status: Some(bus_status),
            warned: !bus_up,
        }
    }

    pub fn broadcast_to_topic(&self, topic: &str, payload: &JsonValue) -> usize {
        self.inner.broadcast(topic, || StreamFrame::Event {
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

impl TopicSink for StreamRegistry {
    fn deliver(&self, topic: &str, payload: &JsonValue) -> usize {
        self.broadcast_to_topic(topic, payload)
    }
}

/// A live stream. Dropping it unregisters the connection.
pub struct StreamSession {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry<StreamFrame>>,
    rx: mpsc::Receiver<StreamFrame>,
    pending: VecDeque<StreamFrame>,
    keepalive: Duration,
    bus_status: Option<watch::Receiver<BusStatus>>,
    warned: bool,
}

impl StreamSession {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Frames to emit after `connected` and before any live delivery.
    pub fn queue_catch_up(&mut self, frames: impl IntoIterator<Item = StreamFrame>) {
        self.pending.extend(frames);
    }

    /// Next frame to write, or `None` once the connection has been torn down.
    pub async fn next_frame(&mut self) -> Option<StreamFrame> {
        if let Some(frame) = self.pending.pop_front() {
            return Some(frame);
        }

        loop {
            tokio::select! {
                message = self.rx.recv() => return message,
                _ = tokio::time::sleep(self.keepalive) => return Some(StreamFrame::Keepalive),
                change = next_status(&mut self.bus_status) => match change {
                    Some(BusStatus::Disconnected) if !self.warned => {
                        self.warned = true;
                        tracing::warn!(connection_id = %self.id, "bus lost during stream");
                        return Some(StreamFrame::Error {
                            message: BUS_UNAVAILABLE_WARNING.to_string(),
                        });
                    }
                    Some(BusStatus::Connected) => self.warned = false,
                    Some(BusStatus::Disconnected) => {}
                    // Status source is gone; stop watching it.
                    None => self.bus_status = None,
                },
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

async fn next_status(status: &mut Option<watch::Receiver<BusStatus>>) -> Option<BusStatus> {
    match status {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}
