//! Benchmarks for consistent-hash ring lookups.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ringkv_cluster::Ring;

fn bench_ring_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_get_nodes");

    for node_count in [3usize, 10, 50] {
        group.bench_with_input(
            BenchmarkId::from_parameter(node_count),
            &node_count,
            |b, &node_count| {
                let mut ring = Ring::new(150);
                for i in 0..node_count {
                    ring.add_node(&format!("node-{i}"));
                }

                let mut i = 0u64;
                b.iter(|| {
                    let key = format!("key-{i}");
                    black_box(ring.get_nodes(&key, 3));
                    i += 1;
                });
            },
        );
    }
    group.finish();
}

fn bench_ring_add_node(c: &mut Criterion) {
    c.bench_function("ring_add_node", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let mut ring = Ring::new(150);
            ring.add_node(&format!("node-{i}"));
            black_box(ring.node_count());
            i += 1;
        });
    });
}

criterion_group!(benches, bench_ring_lookup, bench_ring_add_node);
criterion_main!(benches);
