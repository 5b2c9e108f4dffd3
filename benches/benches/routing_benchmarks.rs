use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sensorlink::{
    ChannelHandle, ConnectionContext, ConnectionId, ConnectionKey, ConnectionRegistry,
    InboundMessageRouter, SharedHandle,
};
use tokio::sync::mpsc;

fn handle_for(key: &ConnectionKey) -> (Arc<ChannelHandle>, mpsc::Receiver<bytes::Bytes>) {
    ChannelHandle::new(ConnectionContext::new(ConnectionId::next(), key.clone()), 1024)
}

fn populated_registry(size: usize) -> (Arc<ConnectionRegistry>, Vec<Arc<ChannelHandle>>) {
    let registry = Arc::new(ConnectionRegistry::new());
    let mut handles = Vec::with_capacity(size);
    for i in 0..size {
        let key = ConnectionKey::device(format!("sensor-{i}")).unwrap();
        let (h, _rx) = handle_for(&key);
        let shared: SharedHandle = h.clone();
        registry.register(key, &shared);
        handles.push(h);
    }
    (registry, handles)
}

fn bench_topic_parse(c: &mut Criterion) {
    c.bench_function("topic_parse_device", |b| {
        b.iter(|| ConnectionKey::from_topic(black_box("device.sensor-12345")).unwrap())
    });
    c.bench_function("topic_parse_malformed", |b| {
        b.iter(|| ConnectionKey::from_topic(black_box("foo.bar")).is_err())
    });
}

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    for size in [100usize, 10_000] {
        let (registry, _handles) = populated_registry(size);
        let key = ConnectionKey::device(format!("sensor-{}", size / 2)).unwrap();

        group.bench_with_input(BenchmarkId::new("lookup", size), &key, |b, key| {
            b.iter(|| black_box(registry.lookup(key)))
        });

        let reconnect_key = ConnectionKey::user("bench").unwrap();
        let (h, _rx) = handle_for(&reconnect_key);
        let shared: SharedHandle = h;
        group.bench_with_input(
            BenchmarkId::new("register_unregister", size),
            &reconnect_key,
            |b, key| {
                b.iter(|| {
                    let generation = registry.register(key.clone(), &shared);
                    black_box(registry.unregister(key, generation))
                })
            },
        );
    }
    group.finish();
}

fn bench_route(c: &mut Criterion) {
    let (registry, _handles) = populated_registry(1_000);
    let key = ConnectionKey::user("alice").unwrap();
    let (h, mut rx) = handle_for(&key);
    let shared: SharedHandle = h;
    registry.register(key, &shared);

    let (stale_tx, _stale_rx) = mpsc::unbounded_channel();
    let router = InboundMessageRouter::new(registry, stale_tx);
    let payload = br#"{"kind":"update","value":21.5}"#;

    c.bench_function("route_delivered", |b| {
        b.iter(|| {
            let outcome = router.route(black_box("user.alice"), black_box(payload));
            let _ = rx.try_recv();
            outcome
        })
    });
    c.bench_function("route_not_found", |b| {
        b.iter(|| router.route(black_box("user.nobody"), black_box(payload)))
    });
}

criterion_group!(benches, bench_topic_parse, bench_registry, bench_route);
criterion_main!(benches);
