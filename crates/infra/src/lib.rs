//! Infrastructure layer: event store backends, Redis bus, the event service,
//! fan-out and live client transports.

pub mod config;
pub mod event_bus;
pub mod event_service;
pub mod event_store;
pub mod fanout;
pub mod metrics;
pub mod realtime;


pub use config::{ConfigError, Settings};
pub use event_service::{EventService, PublishReceipt, PublishRequest, ReplayQuery, ServiceError, SubscriptionHandle};
pub use fanout::{FanoutBridge, TopicRule, TopicSink};
pub use metrics::{MetricsSnapshot, SubscriptionMetrics};
