use std::collections::HashSet;
use std::sync::RwLock;

use hubcast_core::EventId;
use hubcast_events::Event;

use super::query::EventFilter;
use super::r#trait::{EventStore, EventStoreError};

#[derive(Debug, Default)]
struct Log {
    events: Vec<Event>,
    ids: HashSet<EventId>,
}

/// In-memory append-only event log.
///
/// Intended for tests/dev. Queries are linear scans.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    log: RwLock<Log>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.log.read().map(|l| l.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: &Event) -> Result<EventId, EventStoreError> {
        let mut log = self
            .log
            .write()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        if !log.ids.insert(event.id()) {
            return Err(EventStoreError::Duplicate(event.id()));
        }
        log.events.push(event.clone());
        Ok(event.id())
    }

    async fn query(&self, filter: &EventFilter) -> Result<Vec<Event>, EventStoreError> {
        let log = self
            .log
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        let mut matching: Vec<&Event> = log
            .events
            .iter()
            .filter(|e| filter.accepts(e.subject(), e.timestamp(), e.correlation_id()))
            .collect();

        // Stable: equal timestamps keep insertion order.
        matching.sort_by_key(|e| e.timestamp());

        Ok(matching
            .into_iter()
            .take(filter.limit.get() as usize)
            .cloned()
            .collect())
    }

    async fn get(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
        let log = self
            .log
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;
        Ok(log.events.iter().find(|e| e.id() == id).cloned())
    }
}
