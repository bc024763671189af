//! Subscription counters.
//!
//! Shared by both connection registries. All counters sit behind one mutex so
//! a snapshot is always internally consistent (per-tenant counts never exceed
//! the active count).

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use hubcast_core::{ConnectionId, TenantId};

#[derive(Debug)]
struct Live {
    tenant: Option<TenantId>,
    patterns: usize,
}

#[derive(Debug, Default)]
struct State {
    live: BTreeMap<ConnectionId, Live>,
    total: u64,
    per_tenant: BTreeMap<String, u64>,
    events_delivered: u64,
    last_event_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of subscription activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub active_subscriptions: u64,
    pub total_subscriptions: u64,
    pub active_patterns: u64,
    pub subscriptions_by_tenant: BTreeMap<String, u64>,
    pub events_delivered: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct SubscriptionMetrics {
    state: Mutex<State>,
}

impl SubscriptionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count a new connection and hand out its id.
    pub fn register(&self, tenant: Option<TenantId>, patterns: &[String]) -> ConnectionId {
        let id = ConnectionId::new();
        let mut state = self.state();
        if let Some(t) = &tenant {
            *state.per_tenant.entry(t.as_str().to_string()).or_default() += 1;
        }
        state.live.insert(
            id,
            Live {
                tenant,
                patterns: patterns.len(),
            },
        );
        state.total += 1;
        id
    }

    /// Refresh the pattern count of a live connection.
    pub fn set_patterns(&self, id: ConnectionId, patterns: usize) {
        if let Some(live) = self.state().live.get_mut(&id) {
            live.patterns = patterns;
        }
    }

    /// Returns `false` if the id was not (or no longer) registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut state = self.state();
        let Some(live) = state.live.remove(&id) else {
            return false;
        };
        if let Some(t) = live.tenant {
            let key = t.as_str();
            if let Some(count) = state.per_tenant.get_mut(key) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.per_tenant.remove(key);
                }
            }
        }
        true
    }

    /// Record one delivered event. Ignored for unknown connections.
    pub fn record_event(&self, id: ConnectionId) -> bool {
        let mut state = self.state();
        if !state.live.contains_key(&id) {
            return false;
        }
        state.events_delivered += 1;
        state.last_event_at = Some(Utc::now());
        true
    }

    pub fn active(&self) -> u64 {
        self.state().live.len() as u64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state();
        MetricsSnapshot {
            active_subscriptions: state.live.len() as u64,
            total_subscriptions: state.total,
            active_patterns: state.live.values().map(|l| l.patterns as u64).sum(),
            subscriptions_by_tenant: state.per_tenant.clone(),
            events_delivered: state.events_delivered,
            last_event_at: state.last_event_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tenant(s: &str) -> Option<TenantId> {
        Some(TenantId::new(s).unwrap())
    }

    #[test]
    fn register_and_unregister_track_tenants() {
        let m = SubscriptionMetrics::new();
        let a = m.register(tenant("1"), &[]);
        let b = m.register(tenant("1"), &[]);
        let c = m.register(None, &[]);

        m.set_patterns(c, 2);

        let snap = m.snapshot();
        assert_eq!(snap.active_subscriptions, 3);
        assert_eq!(snap.active_patterns, 2);
        assert_eq!(snap.subscriptions_by_tenant.get("1"), Some(&2));

        assert!(m.unregister(a));
        assert!(m.unregister(b));
        assert!(m.unregister(c));
        let snap = m.snapshot();
        assert_eq!(snap.active_subscriptions, 0);
        assert_eq!(snap.total_subscriptions, 3);
        assert!(snap.subscriptions_by_tenant.is_empty());
    }

    #[test]
    fn double_unregister_is_a_no_op() {
        let m = SubscriptionMetrics::new();
        let a = m.register(tenant("x"), &[]);
        assert!(m.unregister(a));
        assert!(!m.unregister(a));
        assert_eq!(m.active(), 0);
    }

    #[test]
    fn unregistering_an_unknown_id_changes_no_counter() {
        let m = SubscriptionMetrics::new();
        let a = m.register(tenant("x"), &["entity:*:x".to_string()]);
        m.register(None, &[]);
        assert!(m.record_event(a));
        let before = m.snapshot();

        assert!(!m.unregister(ConnectionId::new()));
        assert_eq!(m.snapshot(), before);
        assert_eq!(before.total_subscriptions, 2);
        assert_eq!(before.subscriptions_by_tenant.get("x"), Some(&1));
        assert_eq!(before.events_delivered, 1);
    }

    #[test]
    fn events_for_unknown_connections_are_ignored() {
        let m = SubscriptionMetrics::new();
        let a = m.register(None, &[]);
        assert!(m.record_event(a));
        assert!(!m.record_event(ConnectionId::new()));

        let snap = m.snapshot();
        assert_eq!(snap.events_delivered, 1);
        assert!(snap.last_event_at.is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn active_never_underflows_and_tenants_sum_to_active(
            ops in proptest::collection::vec((any::<bool>(), 0usize..4, 0usize..3), 1..60)
        ) {
            let m = SubscriptionMetrics::new();
            let mut live: Vec<ConnectionId> = Vec::new();

            for (is_register, pick, tenant_ix) in ops {
                if is_register {
                    let t = ["a", "b"].get(tenant_ix).and_then(|s| tenant(s));
                    live.push(m.register(t, &["entity:>".to_string()]));
                } else if !live.is_empty() {
                    let id = live.remove(pick % live.len());
                    prop_assert!(m.unregister(id));
                    prop_assert!(!m.unregister(id));
                }

                let snap = m.snapshot();
                prop_assert_eq!(snap.active_subscriptions, live.len() as u64);
                prop_assert_eq!(snap.active_patterns, live.len() as u64);
                let tenant_sum: u64 = snap.subscriptions_by_tenant.values().sum();
                prop_assert!(tenant_sum <= snap.active_subscriptions);
                prop_assert!(snap.subscriptions_by_tenant.values().all(|c| *c > 0));
            }
        }
    }
}
