//! Configuration loading and representation.
//!
//! Everything comes from environment variables; unset keys fall back to
//! defaults suitable for local development.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is not a valid {expected}: '{value}'")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    /// Postgres store when set, in-memory otherwise.
    pub database_url: Option<String>,
    /// Redis bus when set, in-memory otherwise.
    pub redis_url: Option<String>,
    pub hub_id: String,
    pub service_name: String,
    pub stream_keepalive: Duration,
    pub outbound_queue_capacity: usize,
    pub fanout_subject_pattern: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            redis_url: None,
            hub_id: "local".to_string(),
            service_name: "hubcast".to_string(),
            stream_keepalive: Duration::from_secs(30),
            outbound_queue_capacity: 256,
            fanout_subject_pattern: ">".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let bind_addr = match get("BIND_ADDR") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "BIND_ADDR",
                expected: "socket address",
                value: raw,
            })?,
            None => defaults.bind_addr,
        };

        let stream_keepalive = match get("STREAM_KEEPALIVE_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("STREAM_KEEPALIVE_SECS", raw)?),
            None => defaults.stream_keepalive,
        };

        let outbound_queue_capacity = match get("OUTBOUND_QUEUE_CAPACITY") {
            Some(raw) => parse_positive("OUTBOUND_QUEUE_CAPACITY", raw)? as usize,
            None => defaults.outbound_queue_capacity,
        };

        Ok(Self {
            bind_addr,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            hub_id: get("HUB_ID").unwrap_or(defaults.hub_id),
            service_name: get("SERVICE_NAME").unwrap_or(defaults.service_name),
            stream_keepalive,
            outbound_queue_capacity,
            fanout_subject_pattern: get("FANOUT_SUBJECT_PATTERN").unwrap_or(defaults.fanout_subject_pattern),
        })
    }
}

fn parse_positive(key: &'static str, raw: String) -> Result<u64, ConfigError> {
    match raw.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Invalid {
            key,
            expected: "positive integer",
            value: raw,
        }),
    }
}
