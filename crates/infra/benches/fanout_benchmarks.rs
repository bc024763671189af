use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use hubcast_events::{matches, matches_topic};
use hubcast_infra::fanout::FanoutBridge;
use hubcast_infra::metrics::SubscriptionMetrics;
use hubcast_infra::realtime::{ServerFrame, SocketRegistry};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

fn bench_subject_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("subject_matching");

    let cases = [
        ("literal", "hub.h1.graph.node.created", "hub.h1.graph.node.created"),
        ("single_wildcard", "hub.h1.graph.node.created", "hub.*.graph.*.created"),
        ("tail_wildcard", "hub.h1.graph.node.created", "hub.>"),
        ("miss_early", "billing.invoice.paid", "hub.*.graph.>"),
    ];
    for (name, subject, pattern) in cases {
        group.bench_function(name, |b| b.iter(|| matches(black_box(subject), black_box(pattern))));
    }

    group.bench_function("topic_tenant_scope", |b| {
        b.iter(|| matches_topic(black_box("entity:created:42"), black_box("entity:*:42")))
    });

    group.finish();
}

fn connected_sockets(n: usize) -> (SocketRegistry, Vec<mpsc::Receiver<ServerFrame>>) {
    let sockets = SocketRegistry::new(1024, Arc::new(SubscriptionMetrics::new()));
    let mut receivers = Vec::with_capacity(n);
    for i in 0..n {
        let (id, mut rx) = sockets.connect(None);
        // Half the connections follow tenant 1, the rest another tenant.
        let tenant = if i % 2 == 0 { 1 } else { 2 };
        sockets.handle_text(id, &format!(r#"{{"action":"subscribe","topic":"entity:*:{tenant}"}}"#));
        while rx.try_recv().is_ok() {}
        receivers.push(rx);
    }
    (sockets, receivers)
}

fn bench_bridge_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("bridge_fanout");
    let payload = json!({"project_id": 1, "node_type": "file", "path": "src/lib.rs"});

    group.bench_function("topics_for", |b| {
        let bridge = FanoutBridge::with_default_rules();
        b.iter(|| bridge.topics_for(black_box("graph.node.created"), black_box(&payload)))
    });

    for connections in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(connections as u64));
        group.bench_with_input(BenchmarkId::new("socket_broadcast", connections), &connections, |b, &n| {
            let (sockets, mut receivers) = connected_sockets(n);
            let bridge = FanoutBridge::with_default_rules().with_sink(Arc::new(sockets));
            b.iter(|| {
                let delivered = bridge.handle_bus_message(black_box("graph.node.created"), black_box(&payload));
                for rx in receivers.iter_mut() {
                    while rx.try_recv().is_ok() {}
                }
                delivered
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_subject_matching, bench_bridge_fanout);
criterion_main!(benches);
