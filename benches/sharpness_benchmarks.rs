//! Scorer hot-path benchmarks.
//!
//! The scorer runs once per delivered frame on the dispatch thread, so its
//! cost bounds the sustainable frame rate of a sweep.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use stagefocus::testing::synthetic_data::edge_frame;
use stagefocus::{LaplacianVariance, SharpnessScorer};

fn bench_laplacian_variance(c: &mut Criterion) {
    let scorer = LaplacianVariance;
    let small = edge_frame(64, 48, 200.0, 0.0);
    let vga = edge_frame(640, 480, 200.0, 0.0);
    let full = edge_frame(1920, 1080, 200.0, 0.0);

    let mut group = c.benchmark_group("laplacian_variance");
    group.bench_function("64x48", |b| b.iter(|| scorer.score(black_box(&small))));
    group.bench_function("640x480", |b| b.iter(|| scorer.score(black_box(&vga))));
    group.bench_function("1920x1080", |b| b.iter(|| scorer.score(black_box(&full))));
    group.finish();
}

criterion_group!(benches, bench_laplacian_variance);
criterion_main!(benches);
