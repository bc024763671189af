use std::sync::Arc;

use serde_json::Value as JsonValue;

use hubcast_events::subject::TOPIC_DELIMITER;
use hubcast_events::{DEFAULT_TENANT_KEYS, PayloadTenant, tenant_from_payload};

use super::rules::{TopicRule, default_rules};
use crate::event_service::{EventService, ServiceError, SubscriptionHandle};

/// Something that delivers `(topic, payload)` to live clients.
pub trait TopicSink: Send + Sync {
    /// Returns how many connections the message was queued for.
    fn deliver(&self, topic: &str, payload: &JsonValue) -> usize;
}

impl<S> TopicSink for Arc<S>
where
    S: TopicSink + ?Sized,
{
    fn deliver(&self, topic: &str, payload: &JsonValue) -> usize {
        (**self).deliver(topic, payload)
    }
}

pub struct FanoutBridge {
    rules: Vec<TopicRule>,
    tenant_keys: Vec<String>,
    sinks: Vec<Arc<dyn TopicSink>>,
}

impl FanoutBridge {
    pub fn new(rules: Vec<TopicRule>) -> Self {
        Self {
            rules,
            tenant_keys: DEFAULT_TENANT_KEYS.iter().map(|k| k.to_string()).collect(),
            sinks: Vec::new(),
        }
    }

    pub fn with_default_rules() -> Self {
        Self::new(default_rules())
    }

    pub fn with_sink(mut self, sink: Arc<dyn TopicSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_tenant_keys(mut self, keys: Vec<String>) -> Self {
        self.tenant_keys = keys;
        self
    }

    /// Append a rule after the existing ones.
    pub fn push_rule(&mut self, rule: TopicRule) {
        self.rules.push(rule);
    }

    /// Client topics for one event, in rule order, without duplicates.
    ///
    /// Empty when no rule matches or when the payload names a tenant that
    /// cannot be expressed in a topic.
    pub fn topics_for(&self, subject: &str, payload: &JsonValue) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for topic in self.rules.iter().filter_map(|rule| rule.apply(subject)) {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        if topics.is_empty() {
            return topics;
        }

        match tenant_from_payload(payload, self.tenant_keys.as_slice()) {
            PayloadTenant::Scoped(tenant) => topics
                .into_iter()
                .map(|t| format!("{t}{TOPIC_DELIMITER}{tenant}"))
                .collect(),
            PayloadTenant::Absent => {
                // Isolation gap: tenant-less topics reach every subscriber whose
                // pattern matches the bare topic, regardless of tenant.
                tracing::debug!(subject, "event has no tenant key; broadcasting unscoped topics");
                topics
            }
            PayloadTenant::Unusable { key, raw } => {
                tracing::warn!(subject, key = %key, raw = %raw, "tenant value cannot scope a topic; event not fanned out");
                Vec::new()
            }
        }
    }

    /// Push one bus message to every sink. Returns total deliveries.
    pub fn handle_bus_message(&self, subject: &str, payload: &JsonValue) -> usize {
        let topics = self.topics_for(subject, payload);
        if topics.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        for topic in &topics {
            for sink in &self.sinks {
                delivered += sink.deliver(topic, payload);
            }
        }
        tracing::trace!(subject, ?topics, delivered, "fanned out bus message");
        delivered
    }

    /// Subscribe the bridge to the service's bus under `pattern`.
    pub async fn attach(self: &Arc<Self>, service: &EventService, pattern: &str) -> Result<SubscriptionHandle, ServiceError> {
        let bridge = Arc::clone(self);
        service
            .subscribe(pattern, move |subject, event| {
                let bridge = bridge.clone();
                async move {
                    bridge.handle_bus_message(&subject, event.payload());
                    Ok(())
                }
            })
            .await
    }
}
