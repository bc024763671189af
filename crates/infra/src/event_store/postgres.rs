//! Postgres-backed event store implementation.
//!
//! Events live in a single append-only table, `hub_events`. A `BIGSERIAL`
//! position column records insertion order, which breaks timestamp ties in
//! queries.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Duplicate` (on append) |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / Io / other | N/A | `Storage` |
//! | Decode of a stored column | N/A | `Corrupt` |

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{Span, instrument};

use hubcast_core::{CorrelationId, EventId};
use hubcast_events::{Event, Origin};

use super::query::{EventFilter, LIKE_ESCAPE};
use super::r#trait::{EventStore, EventStoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS hub_events (
        position        BIGSERIAL PRIMARY KEY,
        event_id        UUID NOT NULL UNIQUE,
        subject         TEXT NOT NULL,
        origin          JSONB NOT NULL,
        correlation_id  TEXT NOT NULL,
        payload         JSONB NOT NULL,
        occurred_at     TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS hub_events_occurred_at_idx ON hub_events (occurred_at, position)",
    "CREATE INDEX IF NOT EXISTS hub_events_subject_idx ON hub_events (subject)",
    "CREATE INDEX IF NOT EXISTS hub_events_correlation_idx ON hub_events (correlation_id)",
];

/// Postgres-backed append-only event store.
///
/// Uses the SQLx connection pool, so it is `Send + Sync` and cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the events table and its indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(self.pool.as_ref())
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(
        skip(self, event),
        fields(event_id = %event.id(), subject = %event.subject())
    )]
    async fn append(&self, event: &Event) -> Result<EventId, EventStoreError> {
        let origin = serde_json::to_value(event.origin())
            .map_err(|e| EventStoreError::Storage(format!("failed to encode origin: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO hub_events (event_id, subject, origin, correlation_id, payload, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(*event.id().as_uuid())
        .bind(event.subject())
        .bind(origin)
        .bind(event.correlation_id().as_str())
        .bind(event.payload())
        .bind(event.timestamp())
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                EventStoreError::Duplicate(event.id())
            } else {
                map_sqlx_error("append", e)
            }
        })?;

        Ok(event.id())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit.get(), event_count = tracing::field::Empty))]
    async fn query(&self, filter: &EventFilter) -> Result<Vec<Event>, EventStoreError> {
        let span = Span::current();

        let rows = sqlx::query(&format!(
            r#"
            SELECT event_id, subject, origin, correlation_id, payload, occurred_at
            FROM hub_events
            WHERE ($1::text IS NULL OR subject LIKE $1 ESCAPE '{LIKE_ESCAPE}')
              AND ($2::timestamptz IS NULL OR occurred_at >= $2)
              AND ($3::timestamptz IS NULL OR occurred_at <= $3)
              AND ($4::text IS NULL OR correlation_id = $4)
            ORDER BY occurred_at ASC, position ASC
            LIMIT $5
            "#
        ))
        .bind(filter.subject.as_ref().map(|s| s.as_like().to_string()))
        .bind(filter.since)
        .bind(filter.until)
        .bind(filter.correlation_id.as_ref().map(|c| c.as_str().to_string()))
        .bind(i64::from(filter.limit.get()))
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("query", e))?;

        let events = rows
            .iter()
            .map(EventRow::from_pg_row)
            .map(|row| row.and_then(EventRow::into_event))
            .collect::<Result<Vec<_>, _>>()?;

        span.record("event_count", events.len());
        Ok(events)
    }

    #[instrument(skip(self), fields(event_id = %id))]
    async fn get(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT event_id, subject, origin, correlation_id, payload, occurred_at
            FROM hub_events
            WHERE event_id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref()
            .map(EventRow::from_pg_row)
            .transpose()?
            .map(EventRow::into_event)
            .transpose()
    }
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => EventStoreError::Storage(format!(
            "database error in {operation} ({}): {}",
            db_err.code().as_deref().unwrap_or("unknown"),
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            EventStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => EventStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

// SQLx row types

#[derive(Debug)]
struct EventRow {
    event_id: uuid::Uuid,
    subject: String,
    origin: serde_json::Value,
    correlation_id: String,
    payload: serde_json::Value,
    occurred_at: DateTime<Utc>,
}

impl EventRow {
    fn from_pg_row(row: &sqlx::postgres::PgRow) -> Result<Self, EventStoreError> {
        let decode = |e: sqlx::Error| EventStoreError::Corrupt(e.to_string());
        Ok(Self {
            event_id: row.try_get("event_id").map_err(decode)?,
            subject: row.try_get("subject").map_err(decode)?,
            origin: row.try_get("origin").map_err(decode)?,
            correlation_id: row.try_get("correlation_id").map_err(decode)?,
            payload: row.try_get("payload").map_err(decode)?,
            occurred_at: row.try_get("occurred_at").map_err(decode)?,
        })
    }

    fn into_event(self) -> Result<Event, EventStoreError> {
        let origin: Origin = serde_json::from_value(self.origin)
            .map_err(|e| EventStoreError::Corrupt(format!("origin: {e}")))?;
        let correlation_id = CorrelationId::parse(self.correlation_id)
            .map_err(|e| EventStoreError::Corrupt(format!("correlation_id: {e}")))?;

        Ok(Event::new(
            EventId::from_uuid(self.event_id),
            self.subject,
            origin,
            correlation_id,
            self.payload,
            self.occurred_at,
        ))
    }
}
