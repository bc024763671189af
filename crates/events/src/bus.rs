//! Event publishing/subscription abstraction (mechanics only).
//!
//! This module provides the **notification side-channel** that sits next to the
//! durable event log. The bus is intentionally lightweight and makes minimal
//! assumptions:
//!
//! - **Transport-agnostic**: in-memory channels, Redis pub/sub, NATS, ...
//! - **Best-effort**: messages may be dropped while a backend is down
//! - **No persistence**: the event store is the source of truth; consumers that
//!   missed messages catch up through replay, never through bus redelivery
//!
//! ## Subjects and patterns
//!
//! Messages are published under a concrete `.`-delimited subject. Subscriptions
//! use the `*` / `>` wildcard dialect from [`crate::subject`], so the bus and
//! the client-facing matcher agree on what a pattern means.
//!
//! ## Connectivity
//!
//! A backend that loses its connection must not raise into arbitrary caller
//! code. Instead it flips its [`BusStatus`] signal and keeps trying to
//! reconnect (and resubscribe) in the background. Upstream code such as health
//! reporting or degraded streaming watches [`EventBus::status`].

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::subject::SubjectError;

/// A raw message as it travels over the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

/// Connectivity of the bus backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusStatus {
    Connected,
    Disconnected,
}

impl BusStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, BusStatus::Connected)
    }
}

/// Handle identifying one live bus subscription.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BusSubscriptionId(u64);

impl BusSubscriptionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// A subscription to bus messages matching one pattern.
///
/// Dropping the subscription closes its queue; backends prune closed
/// subscribers lazily.
#[derive(Debug)]
pub struct BusSubscription {
    id: BusSubscriptionId,
    pattern: String,
    receiver: mpsc::Receiver<BusMessage>,
}

impl BusSubscription {
    pub fn new(id: BusSubscriptionId, pattern: impl Into<String>, receiver: mpsc::Receiver<BusMessage>) -> Self {
        Self {
            id,
            pattern: pattern.into(),
            receiver,
        }
    }

    pub fn id(&self) -> BusSubscriptionId {
        self.id
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Wait for the next message. `None` once the backend has released the subscription.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<BusMessage, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    #[error("invalid subscription pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: SubjectError,
    },

    #[error("unknown subscription {0:?}")]
    UnknownSubscription(BusSubscriptionId),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Domain-agnostic message bus (pub/sub abstraction).
///
/// ## Delivery Guarantees
///
/// None beyond best effort. `publish()` may fail; callers on the write path
/// log the failure and move on because the event is already durable.
///
/// ## Thread Safety
///
/// Implementations are `Send + Sync` and shared behind `Arc`.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    /// Publish raw bytes under a concrete subject.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Subscribe to every subject matching `pattern`.
    async fn subscribe(&self, pattern: &str) -> Result<BusSubscription, BusError>;

    /// Release a subscription. Its queue is closed once this returns.
    async fn unsubscribe(&self, id: BusSubscriptionId) -> Result<(), BusError>;

    /// Connectivity signal for health reporting and fallback modes.
    fn status(&self) -> watch::Receiver<BusStatus>;
}

#[async_trait::async_trait]
impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        (**self).publish(subject, payload).await
    }

    async fn subscribe(&self, pattern: &str) -> Result<BusSubscription, BusError> {
        (**self).subscribe(pattern).await
    }

    async fn unsubscribe(&self, id: BusSubscriptionId) -> Result<(), BusError> {
        (**self).unsubscribe(id).await
    }

    fn status(&self) -> watch::Receiver<BusStatus> {
        (**self).status()
    }
}
