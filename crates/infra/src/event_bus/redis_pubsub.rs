//! Redis pub/sub-backed event bus (optional).
//!
//! Note: Redis pub/sub is not durable (messages are dropped while a
//! subscriber is offline). That is acceptable here because the event store is
//! the source of truth and clients catch up by replaying from it.
//!
//! Each subscription owns a background thread with a blocking pub/sub
//! connection. Redis glob patterns are coarser than the hub's wildcard
//! dialect, so every received message is re-checked with
//! [`hubcast_events::matches`] before it is forwarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use redis::Commands;
use tokio::sync::{mpsc, watch};

use hubcast_events::subject::{self, SINGLE_WILDCARD, SUBJECT_DELIMITER, TAIL_WILDCARD};
use hubcast_events::{BusError, BusMessage, BusStatus, BusSubscription, BusSubscriptionId, EventBus};

const READ_TIMEOUT: Duration = Duration::from_millis(500);
const HEALTH_INTERVAL: Duration = Duration::from_secs(5);
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const QUEUE_CAPACITY: usize = 1024;

type StatusSender = Arc<watch::Sender<BusStatus>>;

/// Redis pub/sub bus for raw event bytes.
#[derive(Debug)]
pub struct RedisPubSubEventBus {
    client: redis::Client,
    status: StatusSender,
    next_id: AtomicU64,
    cancels: Mutex<Vec<(BusSubscriptionId, Arc<AtomicBool>)>>,
}

impl RedisPubSubEventBus {
    /// Open a client and start the connectivity monitor.
    ///
    /// The server does not have to be reachable yet; status starts as
    /// `Disconnected` and flips once a PING succeeds.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, BusError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| BusError::Transport(e.to_string()))?;
        let (tx, _) = watch::channel(BusStatus::Disconnected);
        let status = Arc::new(tx);

        spawn_health_monitor(client.clone(), Arc::downgrade(&status));

        Ok(Self {
            client,
            status,
            next_id: AtomicU64::new(1),
            cancels: Mutex::new(Vec::new()),
        })
    }
}

impl Drop for RedisPubSubEventBus {
    fn drop(&mut self) {
        if let Ok(cancels) = self.cancels.lock() {
            for (_, flag) in cancels.iter() {
                flag.store(true, Ordering::Relaxed);
            }
        }
    }
}

#[async_trait::async_trait]
impl EventBus for RedisPubSubEventBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let client = self.client.clone();
        let channel = subject.to_string();

        let result = tokio::task::spawn_blocking(move || -> redis::RedisResult<i64> {
            let mut conn = client.get_connection()?;
            conn.publish(channel, payload)
        })
        .await
        .map_err(|e| BusError::Transport(format!("publish task failed: {e}")))?;

        match result {
            Ok(_receivers) => {
                set_status(&self.status, BusStatus::Connected);
                Ok(())
            }
            Err(e) => {
                set_status(&self.status, BusStatus::Disconnected);
                Err(BusError::Unavailable(e.to_string()))
            }
        }
    }

    async fn subscribe(&self, pattern: &str) -> Result<BusSubscription, BusError> {
        subject::validate_pattern(pattern, SUBJECT_DELIMITER).map_err(|source| BusError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let id = BusSubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let cancel = Arc::new(AtomicBool::new(false));

        self.cancels
            .lock()
            .map_err(|_| BusError::Transport("lock poisoned".to_string()))?
            .push((id, cancel.clone()));

        let worker = SubscriptionWorker {
            client: self.client.clone(),
            pattern: pattern.to_string(),
            glob: to_redis_glob(pattern),
            tx,
            cancel,
            status: Arc::downgrade(&self.status),
        };
        thread::Builder::new()
            .name(format!("redis-sub-{}", id.as_u64()))
            .spawn(move || worker.run())
            .map_err(|e| BusError::Transport(format!("failed to spawn subscriber thread: {e}")))?;

        Ok(BusSubscription::new(id, pattern, rx))
    }

    async fn unsubscribe(&self, id: BusSubscriptionId) -> Result<(), BusError> {
        let mut cancels = self
            .cancels
            .lock()
            .map_err(|_| BusError::Transport("lock poisoned".to_string()))?;

        let Some(index) = cancels.iter().position(|(sub, _)| *sub == id) else {
            return Err(BusError::UnknownSubscription(id));
        };
        let (_, flag) = cancels.swap_remove(index);
        flag.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn status(&self) -> watch::Receiver<BusStatus> {
        self.status.subscribe()
    }
}

struct SubscriptionWorker {
    client: redis::Client,
    pattern: String,
    glob: String,
    tx: mpsc::Sender<BusMessage>,
    cancel: Arc<AtomicBool>,
    status: Weak<watch::Sender<BusStatus>>,
}

enum Exit {
    Cancelled,
    /// `subscribed` is set once PSUBSCRIBE had succeeded on the lost connection.
    Reconnect { reason: String, subscribed: bool },
}

/// Exponential reconnect delay, restarted after every successful subscribe.
#[derive(Debug)]
struct Backoff {
    next: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self { next: INITIAL_BACKOFF }
    }

    fn reset(&mut self) {
        self.next = INITIAL_BACKOFF;
    }

    /// Delay to wait now; doubles the following one up to the cap.
    fn delay(&mut self) -> Duration {
        let current = self.next;
        self.next = (current * 2).min(MAX_BACKOFF);
        current
    }
}

impl SubscriptionWorker {
    fn run(self) {
        let mut backoff = Backoff::new();
        while !self.stopped() {
            match self.listen() {
                Exit::Cancelled => break,
                Exit::Reconnect { reason, subscribed } => {
                    if subscribed {
                        backoff.reset();
                    }
                    tracing::warn!(pattern = %self.pattern, %reason, "redis subscription lost; reconnecting");
                    self.report(BusStatus::Disconnected);
                    thread::sleep(backoff.delay());
                }
            }
        }
        tracing::debug!(pattern = %self.pattern, "redis subscription closed");
    }

    fn stopped(&self) -> bool {
        self.cancel.load(Ordering::Relaxed) || self.tx.is_closed()
    }

    fn report(&self, status: BusStatus) {
        if let Some(sender) = self.status.upgrade() {
            set_status(&sender, status);
        }
    }

    fn listen(&self) -> Exit {
        let mut conn = match self.client.get_connection() {
            Ok(c) => c,
            Err(e) => return reconnect(e, false),
        };
        let mut pubsub = conn.as_pubsub();
        if let Err(e) = pubsub.psubscribe(&self.glob) {
            return reconnect(e, false);
        }
        if let Err(e) = pubsub.set_read_timeout(Some(READ_TIMEOUT)) {
            return reconnect(e, true);
        }
        self.report(BusStatus::Connected);

        loop {
            if self.stopped() {
                return Exit::Cancelled;
            }
            let msg = match pubsub.get_message() {
                Ok(m) => m,
                Err(e) if e.is_timeout() => continue,
                Err(e) => return reconnect(e, true),
            };

            let subject = msg.get_channel_name().to_string();
            if !subject::matches(&subject, &self.pattern) {
                continue;
            }
            let message = BusMessage {
                subject,
                payload: msg.get_payload_bytes().to_vec(),
            };
            if self.tx.blocking_send(message).is_err() {
                return Exit::Cancelled;
            }
        }
    }
}

fn reconnect(err: redis::RedisError, subscribed: bool) -> Exit {
    Exit::Reconnect {
        reason: err.to_string(),
        subscribed,
    }
}

fn spawn_health_monitor(client: redis::Client, status: Weak<watch::Sender<BusStatus>>) {
    let spawned = thread::Builder::new().name("redis-health".to_string()).spawn(move || {
        loop {
            let Some(sender) = status.upgrade() else {
                return;
            };
            let reachable = client
                .get_connection_with_timeout(HEALTH_INTERVAL)
                .and_then(|mut conn| redis::cmd("PING").query::<String>(&mut conn))
                .is_ok();
            set_status(
                &sender,
                if reachable {
                    BusStatus::Connected
                } else {
                    BusStatus::Disconnected
                },
            );
            drop(sender);
            thread::sleep(HEALTH_INTERVAL);
        }
    });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to spawn redis health monitor");
    }
}

fn set_status(sender: &watch::Sender<BusStatus>, next: BusStatus) {
    sender.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        match next {
            BusStatus::Connected => tracing::info!("redis bus connected"),
            BusStatus::Disconnected => tracing::warn!("redis bus disconnected"),
        }
        *current = next;
        true
    });
}

/// Translate a hub wildcard pattern into a Redis `PSUBSCRIBE` glob.
///
/// Both wildcards become `*`, which over-matches across `.`; literal glob
/// metacharacters are escaped.
fn to_redis_glob(pattern: &str) -> String {
    pattern
        .split(SUBJECT_DELIMITER)
        .map(|token| match token {
            SINGLE_WILDCARD | TAIL_WILDCARD => "*".to_string(),
            literal => {
                let mut out = String::with_capacity(literal.len());
                for c in literal.chars() {
                    if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_translation_widens_wildcards() {
        assert_eq!(to_redis_glob(">"), "*");
        assert_eq!(to_redis_glob("graph.*.created"), "graph.*.created");
        assert_eq!(to_redis_glob("graph.>"), "graph.*");
        assert_eq!(to_redis_glob("odd[1]?"), "odd\\[1\\]\\?");
    }

    #[test]
    fn backoff_doubles_to_the_cap_and_restarts_after_a_subscribe() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.delay(), Duration::from_millis(250));
        assert_eq!(backoff.delay(), Duration::from_millis(500));
        for _ in 0..10 {
            backoff.delay();
        }
        assert_eq!(backoff.delay(), MAX_BACKOFF);

        backoff.reset();
        assert_eq!(backoff.delay(), INITIAL_BACKOFF);
    }

    #[test]
    fn status_changes_only_on_transition() {
        let (tx, mut rx) = watch::channel(BusStatus::Disconnected);

        set_status(&tx, BusStatus::Disconnected);
        assert!(!rx.has_changed().unwrap());

        set_status(&tx, BusStatus::Connected);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), BusStatus::Connected);
    }
}
