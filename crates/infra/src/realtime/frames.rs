//! Wire frames for the socket and stream transports.

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

use hubcast_core::ConnectionId;
use hubcast_events::SubjectError;

/// Malformed client input. Rendered as an `error` frame; the connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("invalid topic pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: SubjectError,
    },

    #[error("tail wildcard in '{0}' cannot be combined with a project scope; use '*' per token")]
    UnscopableTail(String),
}

/// Server-to-client socket frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected { session_id: ConnectionId },
    Subscribed { topic: String },
    Unsubscribed { topic: String },
    Error { message: String },
    Event { topic: String, data: JsonValue },
}

impl ServerFrame {
    pub fn error(err: &ProtocolError) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        // Every variant is plain data; encoding cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error","message":"encoding failed"}"#.to_string())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClientAction {
    Subscribe,
    Unsubscribe,
}

/// Client-to-server socket frame: `{"action": "subscribe"|"unsubscribe", "topic": ...}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFrame {
    pub action: ClientAction,
    pub topic: String,
}

#[derive(Deserialize)]
struct RawClientFrame {
    action: String,
    topic: String,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawClientFrame = serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let action = match raw.action.as_str() {
            "subscribe" => ClientAction::Subscribe,
            "unsubscribe" => ClientAction::Unsubscribe,
            other => return Err(ProtocolError::UnknownAction(other.to_string())),
        };
        Ok(Self {
            action,
            topic: raw.topic,
        })
    }
}

/// One server-push stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Connected {
        patterns: Vec<String>,
        warning: Option<String>,
    },
    Event {
        topic: String,
        data: JsonValue,
    },
    Error {
        message: String,
    },
    Keepalive,
}

impl StreamFrame {
    /// Event name on the wire; `None` for comment-only keepalives.
    pub fn event_name(&self) -> Option<&str> {
        match self {
            StreamFrame::Connected { .. } => Some("connected"),
            StreamFrame::Event { topic, .. } => Some(topic),
            StreamFrame::Error { .. } => Some("error"),
            StreamFrame::Keepalive => None,
        }
    }

    /// JSON body carried in the `data:` line.
    pub fn data(&self) -> Option<JsonValue> {
        match self {
            StreamFrame::Connected { patterns, warning } => {
                let mut body = json!({ "patterns": patterns });
                if let Some(w) = warning {
                    body["warning"] = JsonValue::String(w.clone());
                }
                Some(body)
            }
            StreamFrame::Event { data, .. } => Some(data.clone()),
            StreamFrame::Error { message } => Some(json!({ "message": message })),
            StreamFrame::Keepalive => None,
        }
    }

    /// Render as `text/event-stream` text.
    pub fn to_event_stream_text(&self) -> String {
        match (self.event_name(), self.data()) {
            (Some(name), Some(data)) => format!("event: {name}\ndata: {data}\n\n"),
            _ => ": keepalive\n\n".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_frames_are_tagged_by_type() {
        let frame = ServerFrame::Event {
            topic: "entity:created:1".to_string(),
            data: json!({"id": 7}),
        };
        let value: JsonValue = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value, json!({"type": "event", "topic": "entity:created:1", "data": {"id": 7}}));

        let id = ConnectionId::new();
        let value: JsonValue = serde_json::from_str(&ServerFrame::Connected { session_id: id }.to_json()).unwrap();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["session_id"], id.to_string());
    }

    #[test]
    fn client_frames_distinguish_failure_kinds() {
        assert_eq!(
            ClientFrame::parse(r#"{"action":"subscribe","topic":"entity:*:1"}"#).unwrap(),
            ClientFrame {
                action: ClientAction::Subscribe,
                topic: "entity:*:1".to_string()
            }
        );
        assert!(matches!(ClientFrame::parse("{nope"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(ClientFrame::parse(r#"{"action":"subscribe"}"#), Err(ProtocolError::Malformed(_))));
        assert!(matches!(
            ClientFrame::parse(r#"{"action":"shout","topic":"x"}"#),
            Err(ProtocolError::UnknownAction(a)) if a == "shout"
        ));
    }

    #[test]
    fn stream_text_format() {
        let event = StreamFrame::Event {
            topic: "edge:created:3".to_string(),
            data: json!({"a": 1}),
        };
        assert_eq!(event.to_event_stream_text(), "event: edge:created:3\ndata: {\"a\":1}\n\n");
        assert_eq!(StreamFrame::Keepalive.to_event_stream_text(), ": keepalive\n\n");

        let connected = StreamFrame::Connected {
            patterns: vec!["entity:*:1".to_string()],
            warning: Some("bus down".to_string()),
        };
        assert_eq!(
            connected.data().unwrap(),
            json!({"patterns": ["entity:*:1"], "warning": "bus down"})
        );
    }
}
