//! Infrastructure wiring: store, bus, event service, registries and the fan-out bridge.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use hubcast_events::{EventBus, InMemoryEventBus, Origin};
use hubcast_infra::event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use hubcast_infra::realtime::{SocketRegistry, StreamRegistry};
use hubcast_infra::{EventService, FanoutBridge, Settings, SubscriptionHandle, SubscriptionMetrics};

#[cfg(feature = "redis")]
use hubcast_infra::event_bus::RedisPubSubEventBus;

pub struct AppServices {
    pub settings: Settings,
    pub events: Arc<EventService>,
    pub sockets: SocketRegistry,
    pub streams: StreamRegistry,
    pub metrics: Arc<SubscriptionMetrics>,
    pub bridge: Arc<FanoutBridge>,
    pub fanout: SubscriptionHandle,
}

pub async fn build_services(settings: &Settings) -> anyhow::Result<AppServices> {
    let store = build_store(settings).await?;
    let bus = build_bus(settings)?;

    let origin = Origin::new(settings.hub_id.clone(), settings.service_name.clone());
    let events = Arc::new(EventService::new(store, bus.clone(), origin));

    let metrics = Arc::new(SubscriptionMetrics::new());
    let sockets = SocketRegistry::new(settings.outbound_queue_capacity, metrics.clone());
    let streams = StreamRegistry::new(
        settings.outbound_queue_capacity,
        metrics.clone(),
        settings.stream_keepalive,
        bus.status(),
    );

    let bridge = Arc::new(
        FanoutBridge::with_default_rules()
            .with_sink(Arc::new(sockets.clone()))
            .with_sink(Arc::new(streams.clone())),
    );
    let fanout = bridge
        .attach(&events, &settings.fanout_subject_pattern)
        .await
        .context("failed to attach the fan-out bridge")?;

    tracing::info!(
        hub_id = %settings.hub_id,
        fanout_pattern = %settings.fanout_subject_pattern,
        "services ready"
    );

    Ok(AppServices {
        settings: settings.clone(),
        events,
        sockets,
        streams,
        metrics,
        bridge,
        fanout,
    })
}

async fn build_store(settings: &Settings) -> anyhow::Result<Arc<dyn EventStore>> {
    let Some(url) = settings.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; events are kept in memory only");
        return Ok(Arc::new(InMemoryEventStore::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PostgresEventStore::new(pool);
    store.ensure_schema().await.context("failed to prepare the event table")?;
    tracing::info!("using Postgres event store");
    Ok(Arc::new(store))
}

#[cfg(feature = "redis")]
fn build_bus(settings: &Settings) -> anyhow::Result<Arc<dyn EventBus>> {
    match settings.redis_url.as_deref() {
        Some(url) => {
            let bus = RedisPubSubEventBus::new(url).context("invalid REDIS_URL")?;
            tracing::info!("using Redis pub/sub event bus");
            Ok(Arc::new(bus))
        }
        None => {
            tracing::warn!("REDIS_URL not set; using the in-process bus");
            Ok(Arc::new(InMemoryEventBus::new()))
        }
    }
}

#[cfg(not(feature = "redis"))]
fn build_bus(settings: &Settings) -> anyhow::Result<Arc<dyn EventBus>> {
    if settings.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the redis feature is disabled; using the in-process bus");
    }
    Ok(Arc::new(InMemoryEventBus::new()))
}
