use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use hubcast_core::{CorrelationId, TenantId};
use hubcast_events::{BusStatus, Event, Origin};
use hubcast_infra::realtime::ConnectionSnapshot;
use hubcast_infra::{PublishRequest, ReplayQuery};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct PublishEventRequest {
    pub subject: String,
    pub payload: JsonValue,
    pub correlation_id: Option<String>,
    pub origin: Option<Origin>,
}

impl PublishEventRequest {
    pub fn into_request(self) -> Result<PublishRequest, Response> {
        let mut request = PublishRequest::new(self.subject, self.payload);
        if let Some(cid) = self.correlation_id {
            request = request.with_correlation_id(parse_correlation_id(cid)?);
        }
        if let Some(origin) = self.origin {
            request = request.with_origin(origin);
        }
        Ok(request)
    }
}

/// `GET /events/replay?subject=&since=&until=&correlation_id=&limit=`
#[derive(Debug, Default, Deserialize)]
pub struct ReplayParams {
    pub subject: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
    pub limit: Option<i64>,
}

impl ReplayParams {
    pub fn into_query(self) -> Result<ReplayQuery, Response> {
        Ok(ReplayQuery {
            subject: self.subject,
            since: self.since,
            until: self.until,
            correlation_id: self.correlation_id.map(parse_correlation_id).transpose()?,
            limit: self.limit,
        })
    }
}

/// `GET /stream?project_id=&topics=&since=`
#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    pub project_id: Option<String>,
    pub topics: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

/// `GET /ws?project_id=`
#[derive(Debug, Default, Deserialize)]
pub struct SocketParams {
    pub project_id: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub count: usize,
    pub events: Vec<Event>,
}

impl From<Vec<Event>> for ReplayResponse {
    fn from(events: Vec<Event>) -> Self {
        Self {
            count: events.len(),
            events,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub bus: BusStatus,
    pub fanout_active: bool,
    pub sockets: usize,
    pub streams: usize,
}

#[derive(Debug, Serialize)]
pub struct ConnectionsResponse {
    pub sockets: Vec<ConnectionSnapshot>,
    pub streams: Vec<ConnectionSnapshot>,
}

// -------------------------
// Parsing helpers
// -------------------------

fn parse_correlation_id(raw: String) -> Result<CorrelationId, Response> {
    CorrelationId::parse(raw)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_correlation_id", e.to_string()))
}

/// Blank `project_id` counts as absent.
pub fn parse_tenant(raw: Option<&str>) -> Result<Option<TenantId>, Response> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => TenantId::new(s)
            .map(Some)
            .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_project_id", e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_project_ids_are_ignored() {
        assert_eq!(parse_tenant(None).ok(), Some(None));
        assert_eq!(parse_tenant(Some("  ")).ok(), Some(None));
        assert_eq!(parse_tenant(Some("12")).ok(), Some(TenantId::new("12").ok()));
        assert!(parse_tenant(Some("a:b")).is_err());
    }

    #[test]
    fn publish_body_requires_a_payload() {
        let body = json!({"subject": "graph.node.created"});
        assert!(serde_json::from_value::<PublishEventRequest>(body).is_err());

        let body = json!({"subject": "graph.node.created", "payload": null, "correlation_id": "c-1"});
        let request = serde_json::from_value::<PublishEventRequest>(body)
            .unwrap()
            .into_request()
            .ok()
            .unwrap();
        assert_eq!(request.correlation_id.unwrap().as_str(), "c-1");
    }

    #[test]
    fn empty_correlation_ids_are_rejected() {
        let params = ReplayParams {
            correlation_id: Some(String::new()),
            ..Default::default()
        };
        assert!(params.into_query().is_err());
    }
}
