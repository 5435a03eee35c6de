//! Fusion hot-path benchmark
//!
//! Measures weighted RRF over branch sizes typical for the retrieval
//! pipeline (100 candidates per branch, ~50% overlap).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use engram_core::search::rrf_fuse;

fn branch(start: i64, len: usize) -> Vec<(i64, f32)> {
    (0..len)
        .map(|i| (start + i as i64, 1.0 - i as f32 / len as f32))
        .collect()
}

fn bench_fusion(c: &mut Criterion) {
    let mut group = c.benchmark_group("rrf_fuse");

    for &size in &[10usize, 100, 1000] {
        // Half the ids overlap between branches
        let vector = branch(0, size);
        let lexical = branch(size as i64 / 2, size);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                rrf_fuse(
                    black_box(&vector),
                    black_box(&lexical),
                    60.0,
                    1.0,
                    1.0,
                )
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fusion);
criterion_main!(benches);
