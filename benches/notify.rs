//! Notification fan-out benchmark: one `changed()` pass over a node with a
//! varying number of observe relations.

use std::net::SocketAddr;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use crossbeam_channel::{unbounded, Receiver};

use coaptree::{Exchange, Method, ObserveRelation, Request, Response, ResourceNode};

fn subscribed_node(relations: usize) -> (std::sync::Arc<ResourceNode>, Vec<Receiver<Response>>) {
    let node = ResourceNode::new("bench");
    node.set_observable(true);

    let mut receivers = Vec::with_capacity(relations);
    for idx in 0..relations {
        let (tx, rx) = unbounded();
        let request = Request::new(Method::Get, "bench")
            .from_source(SocketAddr::from(([127, 0, 0, 1], 10_000 + idx as u16)))
            .with_token(vec![idx as u8, (idx >> 8) as u8])
            .observing();
        let relation = ObserveRelation::new(Exchange::new(request, tx));
        relation.set_established();
        node.add_observe_relation(relation);
        receivers.push(rx);
    }
    (node, receivers)
}

fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify_fanout");
    for relations in [1usize, 16, 128, 1024] {
        group.throughput(Throughput::Elements(relations as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(relations),
            &relations,
            |b, &relations| {
                let (node, receivers) = subscribed_node(relations);
                b.iter(|| {
                    node.changed().unwrap();
                    for rx in &receivers {
                        while rx.try_recv().is_ok() {}
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_fanout);
criterion_main!(benches);
