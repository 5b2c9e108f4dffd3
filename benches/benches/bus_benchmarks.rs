use std::{hint::black_box, sync::Arc};

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use sensorlink::{Broker, InMemoryBus, MessageHandler};

struct Sink;

impl MessageHandler for Sink {
    fn on_message(
        &self,
        _topic: &str,
        payload: Bytes,
    ) {
        black_box(payload);
    }
}

fn bench_publish_no_subscribers(c: &mut Criterion) {
    let bus = InMemoryBus::new(1024);
    c.bench_function("bus_publish_0_subs", |b| {
        b.iter(|| bus.publish(black_box("user.alice"), Bytes::from_static(b"x")))
    });
}

fn bench_publish_with_subscribers(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let bus = InMemoryBus::new(1024);
    let clients: Vec<_> = (0..4).map(|_| bus.client()).collect();
    rt.block_on(async {
        for client in &clients {
            client
                .subscribe("device.42", Arc::new(Sink))
                .await
                .unwrap();
        }
    });

    c.bench_function("bus_publish_4_subs", |b| {
        b.iter(|| bus.publish(black_box("device.42"), Bytes::from_static(b"reading")))
    });

    drop(clients);
}

criterion_group!(
    benches,
    bench_publish_no_subscribers,
    bench_publish_with_subscribers
);
criterion_main!(benches);
