//! In-memory event bus for tests/dev.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};

use crate::bus::{BusError, BusMessage, BusStatus, BusSubscription, BusSubscriptionId, EventBus};
use crate::subject::{self, SUBJECT_DELIMITER};

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Subscriber {
    pattern: String,
    tx: mpsc::Sender<BusMessage>,
}

/// In-memory pub/sub bus.
///
/// - No IO
/// - Best-effort fan-out (a full subscriber queue drops the message for that subscriber)
/// - Outages can be simulated with [`InMemoryEventBus::set_available`]
#[derive(Debug)]
pub struct InMemoryEventBus {
    subscribers: Mutex<HashMap<BusSubscriptionId, Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
    status: watch::Sender<BusStatus>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (status, _) = watch::channel(BusStatus::Connected);
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            status,
        }
    }

    /// Flip connectivity. While unavailable, `publish` fails and nothing is delivered.
    pub fn set_available(&self, available: bool) {
        let next = if available {
            BusStatus::Connected
        } else {
            BusStatus::Disconnected
        };
        self.status.send_replace(next);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if !self.status.borrow().is_connected() {
            return Err(BusError::Unavailable("in-memory bus marked unavailable".to_string()));
        }

        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| BusError::Transport("lock poisoned".to_string()))?;

        // Drop any dead subscribers while publishing.
        subs.retain(|id, sub| {
            if sub.tx.is_closed() {
                return false;
            }
            if !subject::matches(subject, &sub.pattern) {
                return true;
            }
            let message = BusMessage {
                subject: subject.to_string(),
                payload: payload.clone(),
            };
            match sub.tx.try_send(message) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscription = id.as_u64(), subject, "bus subscriber queue full; message dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<BusSubscription, BusError> {
        subject::validate_pattern(pattern, SUBJECT_DELIMITER).map_err(|source| BusError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let id = BusSubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);

        self.subscribers
            .lock()
            .map_err(|_| BusError::Transport("lock poisoned".to_string()))?
            .insert(
                id,
                Subscriber {
                    pattern: pattern.to_string(),
                    tx,
                },
            );

        Ok(BusSubscription::new(id, pattern, rx))
    }

    async fn unsubscribe(&self, id: BusSubscriptionId) -> Result<(), BusError> {
        let removed = self
            .subscribers
            .lock()
            .map_err(|_| BusError::Transport("lock poisoned".to_string()))?
            .remove(&id);

        match removed {
            Some(_) => Ok(()),
            None => Err(BusError::UnknownSubscription(id)),
        }
    }

    fn status(&self) -> watch::Receiver<BusStatus> {
        self.status.subscribe()
    }
}
