//! Strongly-typed identifiers used across the workspace.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Identifier of a persisted event.
///
/// UUIDv7, so ids sort by creation time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

/// Identifier of a live client connection (socket or stream).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(EventId, "EventId");
impl_uuid_newtype!(ConnectionId, "ConnectionId");

/// Groups the events produced by one logical request.
///
/// Callers may supply any non-empty string; when they don't, one is generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn parse(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::invalid_id("CorrelationId: must not be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tenant (project) scope used to isolate client-facing topics.
///
/// Tenants arrive from payloads and query strings as either numbers or strings,
/// so the canonical form is the textual one (`1`, `"acme"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_id("TenantId: must not be empty"));
        }
        if trimmed.contains([':', '.', '*', '>']) {
            return Err(DomainError::invalid_id(format!(
                "TenantId: '{trimmed}' contains a topic delimiter or wildcard"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Extract a tenant from a JSON scalar (number or non-empty string).
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => Self::new(integral_text(n)?).ok(),
            JsonValue::String(s) => Self::new(s.as_str()).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for TenantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Canonical text of an integral JSON number (`1`, `1.0` and `1e0` all give `"1"`).
fn integral_text(n: &serde_json::Number) -> Option<String> {
    if let Some(i) = n.as_i64() {
        return Some(i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Some(u.to_string());
    }
    match n.as_f64() {
        // Beyond 2^53 an f64 no longer identifies a single integer.
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() <= 9_007_199_254_740_992.0 => Some(format!("{}", f as i64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_round_trips_through_text() {
        let id = EventId::new();
        let parsed: EventId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<EventId>().is_err());
    }

    #[test]
    fn tenant_from_json_accepts_numbers_and_strings() {
        assert_eq!(
            TenantId::from_json(&serde_json::json!(1)).unwrap().as_str(),
            "1"
        );
        assert_eq!(
            TenantId::from_json(&serde_json::json!("acme")).unwrap().as_str(),
            "acme"
        );
        assert_eq!(TenantId::from_json(&serde_json::json!(1.0)).unwrap().as_str(), "1");
        assert!(TenantId::from_json(&serde_json::json!(1.5)).is_none());
        assert!(TenantId::from_json(&serde_json::json!(null)).is_none());
        assert!(TenantId::from_json(&serde_json::json!("")).is_none());
        assert!(TenantId::from_json(&serde_json::json!({"id": 1})).is_none());
    }

    #[test]
    fn tenant_rejects_delimiters() {
        assert!(TenantId::new("a:b").is_err());
        assert!(TenantId::new("a.b").is_err());
        assert!(TenantId::new("*").is_err());
    }

    #[test]
    fn correlation_id_rejects_blank() {
        assert!(CorrelationId::parse("   ").is_err());
        assert_eq!(CorrelationId::parse("req-1").unwrap().as_str(), "req-1");
    }
}
