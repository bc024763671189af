//! Persist-then-publish event service.
//!
//! Ordering invariant: **publish happens only after append succeeds**. A
//! store failure fails the whole call and nothing reaches the bus; a bus
//! failure after a successful append is logged and swallowed, since clients
//! recover missed notifications through replay.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;

use hubcast_core::{CorrelationId, EventId, MonotonicClock};
use hubcast_events::subject::{self, SubjectError};
use hubcast_events::{BusError, BusStatus, BusSubscriptionId, Event, EventBus, Origin};

use crate::event_store::{EventFilter, EventStore, EventStoreError, QueryError, QueryLimit, SubjectFilter};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid subject '{subject}': {source}")]
    InvalidSubject {
        subject: String,
        #[source]
        source: SubjectError,
    },

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("event store failure: {0}")]
    Store(#[from] EventStoreError),

    #[error("event bus failure: {0}")]
    Bus(#[from] BusError),
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub subject: String,
    pub payload: JsonValue,
    pub correlation_id: Option<CorrelationId>,
    pub origin: Option<Origin>,
}

impl PublishRequest {
    pub fn new(subject: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            subject: subject.into(),
            payload,
            correlation_id: None,
            origin: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub event_id: EventId,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
}

/// Client-facing replay filters, validated by [`ReplayQuery::into_filter`].
#[derive(Debug, Clone, Default)]
pub struct ReplayQuery {
    /// Wildcard subject pattern (`graph.*.created`).
    pub subject: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub correlation_id: Option<CorrelationId>,
    pub limit: Option<i64>,
}

impl ReplayQuery {
    pub fn into_filter(self) -> Result<EventFilter, QueryError> {
        let limit = match self.limit {
            Some(raw) => QueryLimit::new(raw)?,
            None => QueryLimit::default(),
        };

        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(QueryError::InvertedRange);
            }
        }

        let subject = match self.subject.as_deref() {
            Some(pattern) => SubjectFilter::from_wildcard(pattern)?,
            None => None,
        };

        Ok(EventFilter {
            subject,
            since: self.since,
            until: self.until,
            correlation_id: self.correlation_id,
            limit,
        })
    }
}

/// Live subscription started by [`EventService::subscribe`].
pub struct SubscriptionHandle {
    id: BusSubscriptionId,
    pattern: String,
    bus: Arc<dyn EventBus>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Release the bus subscription and stop the delivery task.
    pub async fn unsubscribe(self) {
        match self.bus.unsubscribe(self.id).await {
            Ok(()) | Err(BusError::UnknownSubscription(_)) => {}
            Err(e) => tracing::warn!(pattern = %self.pattern, error = %e, "failed to release bus subscription"),
        }
        self.task.abort();
    }
}

pub struct EventService {
    store: Arc<dyn EventStore>,
    bus: Arc<dyn EventBus>,
    clock: MonotonicClock,
    default_origin: Origin,
}

impl EventService {
    pub fn new(store: Arc<dyn EventStore>, bus: Arc<dyn EventBus>, default_origin: Origin) -> Self {
        Self {
            store,
            bus,
            clock: MonotonicClock::new(),
            default_origin,
        }
    }

    #[instrument(skip(self, request), fields(subject = %request.subject))]
    pub async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, ServiceError> {
        subject::validate_subject(&request.subject).map_err(|source| ServiceError::InvalidSubject {
            subject: request.subject.clone(),
            source,
        })?;

        let PublishRequest {
            subject,
            payload,
            correlation_id,
            origin,
        } = request;
        let correlation_id = correlation_id.unwrap_or_else(CorrelationId::generate);
        let origin = origin.unwrap_or_else(|| self.default_origin.clone());

        let event = Event::new(
            EventId::new(),
            subject,
            origin,
            correlation_id.clone(),
            payload,
            self.clock.now(),
        );

        // 1) Append (durable step)
        self.store.append(&event).await?;

        // 2) Announce (best effort)
        match serde_json::to_vec(&event) {
            Ok(bytes) => {
                if let Err(e) = self.bus.publish(event.subject(), bytes).await {
                    tracing::warn!(event_id = %event.id(), error = %e, "event stored but bus publish failed");
                }
            }
            Err(e) => tracing::warn!(event_id = %event.id(), error = %e, "event stored but could not be encoded for the bus"),
        }

        Ok(PublishReceipt {
            event_id: event.id(),
            correlation_id,
            timestamp: event.timestamp(),
        })
    }

    pub async fn replay(&self, query: ReplayQuery) -> Result<Vec<Event>, ServiceError> {
        let filter = query.into_filter()?;
        Ok(self.store.query(&filter).await?)
    }

    pub async fn get(&self, id: EventId) -> Result<Option<Event>, ServiceError> {
        Ok(self.store.get(id).await?)
    }

    pub fn bus_status(&self) -> watch::Receiver<BusStatus> {
        self.bus.status()
    }

    /// Run `handler` for every bus message matching `pattern`.
    ///
    /// Messages that do not decode, handler errors and handler panics are
    /// logged and skipped; they never end the subscription.
    pub async fn subscribe<H, Fut>(&self, pattern: &str, handler: H) -> Result<SubscriptionHandle, ServiceError>
    where
        H: Fn(String, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut subscription = self.bus.subscribe(pattern).await?;
        let id = subscription.id();
        let pattern = pattern.to_string();
        let span_pattern = pattern.clone();

        let task = tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                let event: Event = match serde_json::from_slice(&message.payload) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(pattern = %span_pattern, subject = %message.subject, error = %e, "undecodable bus message skipped");
                        continue;
                    }
                };
                let event_id = event.id();

                match AssertUnwindSafe(async { handler(message.subject, event).await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(pattern = %span_pattern, %event_id, error = %e, "subscription handler failed");
                    }
                    Err(panic) => {
                        tracing::error!(pattern = %span_pattern, %event_id, panic = panic_message(&panic), "subscription handler panicked");
                    }
                }
            }
            tracing::debug!(pattern = %span_pattern, "bus subscription ended");
        });

        Ok(SubscriptionHandle {
            id,
            pattern,
            bus: self.bus.clone(),
            task,
        })
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use hubcast_events::InMemoryEventBus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct FailingStore;

    #[async_trait::async_trait]
    impl EventStore for FailingStore {
        async fn append(&self, _event: &Event) -> Result<EventId, EventStoreError> {
            Err(EventStoreError::Storage("disk full".to_string()))
        }

        async fn query(&self, _filter: &EventFilter) -> Result<Vec<Event>, EventStoreError> {
            Ok(vec![])
        }

        async fn get(&self, _id: EventId) -> Result<Option<Event>, EventStoreError> {
            Ok(None)
        }
    }

    fn service_with(store: Arc<dyn EventStore>, bus: Arc<InMemoryEventBus>) -> EventService {
        EventService::new(store, bus, Origin::new("hub-test", "tests"))
    }

    #[tokio::test]
    async fn store_failure_publishes_nothing() {
        let bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe(">").await.unwrap();
        let service = service_with(Arc::new(FailingStore), bus.clone());

        let err = service
            .publish(PublishRequest::new("graph.node.created", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(_)));
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn bus_outage_does_not_fail_publish() {
        let bus = Arc::new(InMemoryEventBus::new());
        bus.set_available(false);
        let store = Arc::new(InMemoryEventStore::new());
        let service = service_with(store.clone(), bus);

        let receipt = service
            .publish(PublishRequest::new("graph.node.created", json!({"project_id": 1})))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert!(service.get(receipt.event_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn publish_fills_defaults_and_keeps_explicit_values() {
        let bus = Arc::new(InMemoryEventBus::new());
        let service = service_with(Arc::new(InMemoryEventStore::new()), bus);

        let cid = CorrelationId::parse("req-42").unwrap();
        let receipt = service
            .publish(
                PublishRequest::new("graph.edge.created", json!({}))
                    .with_correlation_id(cid.clone())
                    .with_origin(Origin::new("hub-9", "importer").with_user("ada")),
            )
            .await
            .unwrap();
        assert_eq!(receipt.correlation_id, cid);

        let stored = service.get(receipt.event_id).await.unwrap().unwrap();
        assert_eq!(stored.origin().hub_id, "hub-9");
        assert_eq!(stored.origin().user.as_deref(), Some("ada"));

        let receipt = service
            .publish(PublishRequest::new("graph.edge.deleted", json!({})))
            .await
            .unwrap();
        let stored = service.get(receipt.event_id).await.unwrap().unwrap();
        assert_eq!(stored.origin().hub_id, "hub-test");
        assert!(!stored.correlation_id().as_str().is_empty());
    }

    #[tokio::test]
    async fn invalid_subjects_are_rejected_before_the_store() {
        let store = Arc::new(InMemoryEventStore::new());
        let service = service_with(store.clone(), Arc::new(InMemoryEventBus::new()));

        for subject in ["", "graph..node", "graph.*.created", "graph.>"] {
            let err = service.publish(PublishRequest::new(subject, json!({}))).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidSubject { .. }), "{subject}");
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn replay_validates_before_querying() {
        let service = service_with(Arc::new(FailingStore), Arc::new(InMemoryEventBus::new()));

        let bad_limit = ReplayQuery {
            limit: Some(1001),
            ..Default::default()
        };
        assert!(matches!(
            service.replay(bad_limit).await,
            Err(ServiceError::Query(QueryError::LimitOutOfRange(1001)))
        ));

        let now = Utc::now();
        let inverted = ReplayQuery {
            since: Some(now),
            until: Some(now - chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(matches!(
            service.replay(inverted).await,
            Err(ServiceError::Query(QueryError::InvertedRange))
        ));

        let bad_pattern = ReplayQuery {
            subject: Some("graph.>.node".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            service.replay(bad_pattern).await,
            Err(ServiceError::Query(QueryError::InvalidPattern { .. }))
        ));
    }

    #[tokio::test]
    async fn subscription_survives_bad_messages_errors_and_panics() {
        let bus = Arc::new(InMemoryEventBus::new());
        let service = service_with(Arc::new(InMemoryEventStore::new()), bus.clone());

        let calls = Arc::new(AtomicUsize::new(0));
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let counter = calls.clone();
        let handle = service
            .subscribe("graph.>", move |subject, event| {
                let counter = counter.clone();
                let seen_tx = seen_tx.clone();
                async move {
                    match counter.fetch_add(1, Ordering::SeqCst) {
                        0 => anyhow::bail!("handler rejected {subject}"),
                        1 => panic!("handler blew up"),
                        _ => {
                            let _ = seen_tx.send(event.id());
                            Ok(())
                        }
                    }
                }
            })
            .await
            .unwrap();

        bus.publish("graph.node.created", b"not json".to_vec()).await.unwrap();
        for _ in 0..2 {
            service
                .publish(PublishRequest::new("graph.node.created", json!({})))
                .await
                .unwrap();
        }
        let last = service
            .publish(PublishRequest::new("graph.node.deleted", json!({})))
            .await
            .unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, last.event_id);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(handle.is_active());

        handle.unsubscribe().await;
        assert_eq!(bus.subscriber_count(), 0);
    }
}
