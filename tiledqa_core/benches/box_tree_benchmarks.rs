use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::{Rng, SeedableRng, rngs::StdRng};

use tiledqa_core::core::geometry::Envelope;
use tiledqa_core::core::index::BoxTree;

const EXTENT: f64 = 10_000.0;

fn generate_boxes(count: usize, max_size: f64) -> Vec<Envelope> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| {
            let x = rng.random_range(0.0..EXTENT - max_size);
            let y = rng.random_range(0.0..EXTENT - max_size);
            let w = rng.random_range(0.0..max_size);
            let h = rng.random_range(0.0..max_size);
            Envelope::new(x, y, x + w, y + h)
        })
        .collect()
}

fn build_tree(boxes: &[Envelope]) -> BoxTree<usize> {
    let mut tree = BoxTree::with_extent(Envelope::new(0.0, 0.0, EXTENT, EXTENT));
    for (i, envelope) in boxes.iter().enumerate() {
        tree.insert(*envelope, i);
    }
    tree
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("box_tree_insert");

    for size in [1_000, 10_000, 100_000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        let boxes = generate_boxes(*size, 50.0);

        group.bench_with_input(BenchmarkId::new("random", size), &boxes, |b, boxes| {
            b.iter(|| black_box(build_tree(boxes)));
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("box_tree_search");

    let tree = build_tree(&generate_boxes(100_000, 50.0));

    for query_size in [10.0, 100.0, 1_000.0].iter() {
        let queries = generate_boxes(1_000, *query_size);

        group.throughput(Throughput::Elements(queries.len() as u64));
        group.bench_with_input(BenchmarkId::new("window", query_size), &queries, |b, queries| {
            b.iter(|| {
                let mut found = 0;
                for query in queries {
                    found += tree.search(query).count();
                }
                black_box(found)
            });
        });
    }

    group.finish();
}

fn bench_linear_scan(c: &mut Criterion) {
    let boxes = generate_boxes(100_000, 50.0);
    let queries = generate_boxes(100, 100.0);

    c.bench_function("linear_scan_100_windows", |b| {
        b.iter(|| {
            let mut found = 0;
            for query in &queries {
                found += boxes.iter().filter(|envelope| envelope.intersects(query)).count();
            }
            black_box(found)
        });
    });
}

criterion_group!(benches, bench_insert, bench_search, bench_linear_scan);
criterion_main!(benches);
