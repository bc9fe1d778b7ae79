//! Dataset Pipeline Benchmark
//!
//! Compares element access through:
//! - a bare in-memory source
//! - a composed lazy view (map + permute + slice)
//! - the same view behind a RAM cache
//! - the same view behind a per-example disk cache
//!
//! Run with: cargo bench --bench dataset_benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rampart::data::{Dataset, VecDataset};
use std::time::Duration;

const LEN: usize = 4096;
const WIDTH: usize = 64;

fn source() -> VecDataset<Vec<f32>> {
    VecDataset::new(
        "bench",
        (0..LEN).map(|i| vec![i as f32 / LEN as f32; WIDTH]).collect(),
    )
}

fn scale(v: Vec<f32>) -> Vec<f32> {
    v.into_iter().map(|x| x * 2.0 - 1.0).collect()
}

fn bench_element_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("element_access");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(LEN as u64));

    // 1. Source
    group.bench_function("source", |b| {
        let ds = source();
        b.iter(|| ds.iter().for_each(|x| drop(black_box(x))));
    });

    // 2. Lazy view, recomputed on every access
    group.bench_function("lazy_view", |b| {
        let ds = source().map(scale).permute(1).slice(.., 1).unwrap();
        b.iter(|| ds.iter().for_each(|x| drop(black_box(x))));
    });

    // 3. RAM cache over the same view
    group.bench_function("ram_cache", |b| {
        let ds = source().map(scale).permute(1).cache(None);
        ds.iter().for_each(drop);
        b.iter(|| ds.iter().for_each(|x| drop(black_box(x))));
    });

    // 4. Disk cache over the same view, warm
    group.bench_function("hdd_cache", |b| {
        let dir = tempfile::tempdir().unwrap();
        let ds = source().map_named("scale", scale).permute(1).cache_hdd(dir.path()).unwrap();
        ds.iter().for_each(drop);
        b.iter(|| ds.iter().for_each(|x| drop(black_box(x))));
    });

    group.finish();
}

fn bench_batching(c: &mut Criterion) {
    let mut group = c.benchmark_group("batching");
    for size in [8usize, 64, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let ds = source().batch(size).unwrap();
            b.iter(|| ds.iter().for_each(|batch| drop(black_box(batch))));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_element_access, bench_batching);
criterion_main!(benches);
