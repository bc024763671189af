use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use hubcast_core::{CorrelationId, EventId};

/// Where an event came from.
///
/// `hub_id` and `service` are required; anything else the publisher wants to
/// record (request ids, hostnames, ...) rides along in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub hub_id: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Origin {
    pub fn new(hub_id: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            hub_id: hub_id.into(),
            service: service.into(),
            user: None,
            extra: Map::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// A persisted fact in the event log.
///
/// Events are:
/// - **immutable** (no setters; the log never rewrites them)
/// - **append-only** (the store is the source of truth, the bus only a hint)
/// - **self-describing** (the subject says what happened, the payload is opaque)
///
/// This is also the unit serialized onto the bus, so a subscriber sees exactly
/// what a replaying client would read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    subject: String,
    origin: Origin,
    correlation_id: CorrelationId,
    payload: JsonValue,
    timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        id: EventId,
        subject: impl Into<String>,
        origin: Origin,
        correlation_id: CorrelationId,
        payload: JsonValue,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            subject: subject.into(),
            origin,
            correlation_id,
            payload,
            timestamp,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn into_payload(self) -> JsonValue {
        self.payload
    }
}
