use std::sync::Arc;

use thiserror::Error;

use hubcast_core::EventId;
use hubcast_events::Event;

use super::query::EventFilter;

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, encoding) as opposed to
/// caller errors, which are rejected before the store is touched.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("event {0} already exists")]
    Duplicate(EventId),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("stored event could not be decoded: {0}")]
    Corrupt(String),
}

/// Append-only log of events.
///
/// The `EventStore` is the **source of truth**. The bus next to it is only a
/// volatile notification channel; anything a client missed live is recovered
/// by querying the store.
///
/// ## Append Semantics
///
/// `append()` is durable and atomic per call: either the event is persisted
/// and visible to later queries, or an error is returned and nothing changed.
///
/// ## Query Semantics
///
/// `query()` returns events ordered by `timestamp` ascending, ties broken by
/// insertion order, truncated to the filter's limit. Events come back exactly
/// as appended.
///
/// ## Implementation Requirements
///
/// Implementations must:
/// - never mutate or delete an appended event
/// - reject a second append with an already-stored id
/// - keep a stable insertion position to break timestamp ties
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    /// Durably append a single event.
    async fn append(&self, event: &Event) -> Result<EventId, EventStoreError>;

    /// Filtered range query over the log.
    async fn query(&self, filter: &EventFilter) -> Result<Vec<Event>, EventStoreError>;

    /// Look up one event by id.
    async fn get(&self, id: EventId) -> Result<Option<Event>, EventStoreError>;
}

#[async_trait::async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn append(&self, event: &Event) -> Result<EventId, EventStoreError> {
        (**self).append(event).await
    }

    async fn query(&self, filter: &EventFilter) -> Result<Vec<Event>, EventStoreError> {
        (**self).query(filter).await
    }

    async fn get(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
        (**self).get(id).await
    }
}
