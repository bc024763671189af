//! Generic live-connection registry.
//!
//! Each connection owns a bounded outbound queue. Delivery never blocks: a
//! full or closed queue tears down that one connection and leaves the rest
//! untouched.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use hubcast_core::{ConnectionId, TenantId};
use hubcast_events::matches_topic;

use crate::metrics::SubscriptionMetrics;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Socket,
    Stream,
}

/// Read-only view of one connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    pub connection_id: ConnectionId,
    pub tenant_id: Option<TenantId>,
    pub transport: TransportKind,
    pub patterns: Vec<String>,
    pub connected_at: DateTime<Utc>,
    pub events_sent: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

struct Entry<M> {
    tenant: Option<TenantId>,
    patterns: Vec<String>,
    connected_at: DateTime<Utc>,
    events_sent: u64,
    last_event_at: Option<DateTime<Utc>>,
    tx: mpsc::Sender<M>,
}

impl<M> Entry<M> {
    fn wants(&self, topic: &str) -> bool {
        self.patterns.iter().any(|p| matches_topic(topic, p))
    }
}

pub struct ConnectionRegistry<M> {
    kind: TransportKind,
    capacity: usize,
    connections: RwLock<HashMap<ConnectionId, Entry<M>>>,
    metrics: Arc<SubscriptionMetrics>,
}

impl<M: Send> ConnectionRegistry<M> {
    pub fn new(kind: TransportKind, capacity: usize, metrics: Arc<SubscriptionMetrics>) -> Self {
        Self {
            kind,
            capacity: capacity.max(1),
            connections: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, Entry<M>>> {
        self.connections.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Entry<M>>> {
        self.connections.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn metrics(&self) -> &Arc<SubscriptionMetrics> {
        &self.metrics
    }

    pub fn register(&self, tenant: Option<TenantId>, patterns: Vec<String>) -> (ConnectionId, mpsc::Receiver<M>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.metrics.register(tenant.clone(), &patterns);
        self.write().insert(
            id,
            Entry {
                tenant,
                patterns,
                connected_at: Utc::now(),
                events_sent: 0,
                last_event_at: None,
                tx,
            },
        );
        tracing::debug!(connection_id = %id, transport = ?self.kind, "connection registered");
        (id, rx)
    }

    /// Idempotent; only the first call for an id returns `true`.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.write().remove(&id).is_some();
        if removed {
            self.metrics.unregister(id);
            tracing::debug!(connection_id = %id, transport = ?self.kind, "connection unregistered");
        }
        removed
    }

    /// Returns `None` for unknown connections, otherwise whether the pattern was new.
    pub fn add_pattern(&self, id: ConnectionId, pattern: &str) -> Option<bool> {
        let mut connections = self.write();
        let entry = connections.get_mut(&id)?;
        if entry.patterns.iter().any(|p| p == pattern) {
            return Some(false);
        }
        entry.patterns.push(pattern.to_string());
        self.metrics.set_patterns(id, entry.patterns.len());
        Some(true)
    }

    /// Returns `None` for unknown connections, otherwise whether the pattern was present.
    pub fn remove_pattern(&self, id: ConnectionId, pattern: &str) -> Option<bool> {
        let mut connections = self.write();
        let entry = connections.get_mut(&id)?;
        let before = entry.patterns.len();
        entry.patterns.retain(|p| p != pattern);
        self.metrics.set_patterns(id, entry.patterns.len());
        Some(entry.patterns.len() != before)
    }

    /// Queue a message for one connection.
    ///
    /// A full or closed queue unregisters the connection and returns `false`.
    pub fn send(&self, id: ConnectionId, message: M) -> bool {
        let result = match self.read().get(&id) {
            Some(entry) => entry.tx.try_send(message),
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(connection_id = %id, reason = queue_error(&e), "outbound queue rejected message; disconnecting");
                self.unregister(id);
                false
            }
        }
    }

    /// Queue `make()` for every connection with a pattern matching `topic`.
    ///
    /// Returns the number of connections that accepted the message.
    pub fn broadcast<F>(&self, topic: &str, make: F) -> usize
    where
        F: Fn() -> M,
    {
        let mut failed = Vec::new();
        let mut delivered = 0;
        {
            let mut connections = self.write();
            let now = Utc::now();
            for (id, entry) in connections.iter_mut().filter(|(_, e)| e.wants(topic)) {
                match entry.tx.try_send(make()) {
                    Ok(()) => {
                        entry.events_sent += 1;
                        entry.last_event_at = Some(now);
                        self.metrics.record_event(*id);
                        delivered += 1;
                    }
                    Err(e) => {
                        tracing::warn!(connection_id = %id, topic, reason = queue_error(&e), "outbound queue rejected message; disconnecting");
                        failed.push(*id);
                    }
                }
            }
            for id in &failed {
                connections.remove(id);
            }
        }
        for id in failed {
            self.metrics.unregister(id);
        }
        delivered
    }

    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        let mut out: Vec<ConnectionSnapshot> = self
            .read()
            .iter()
            .map(|(id, e)| ConnectionSnapshot {
                connection_id: *id,
                tenant_id: e.tenant.clone(),
                transport: self.kind,
                patterns: e.patterns.clone(),
                connected_at: e.connected_at,
                events_sent: e.events_sent,
                last_event_at: e.last_event_at,
            })
            .collect();
        out.sort_by_key(|s| s.connected_at);
        out
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionSnapshot> {
        self.snapshot().into_iter().find(|s| s.connection_id == id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn queue_error<T>(err: &mpsc::error::TrySendError<T>) -> &'static str {
    match err {
        mpsc::error::TrySendError::Full(_) => "queue full",
        mpsc::error::TrySendError::Closed(_) => "receiver closed",
    }
}
