//! Benchmarks for index buffer min/max scans

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use op_pica::min_max::{find_min_max, find_min_max_scalar};

// Prime step for a pseudo-random index pattern
const INDEX_STEP: usize = 97;

fn indices_u16(count: usize) -> Vec<u16> {
    (0..count).map(|i| ((i * INDEX_STEP) % 0xFFFF) as u16).collect()
}

fn bench_u16(c: &mut Criterion) {
    let mut group = c.benchmark_group("min_max_u16");

    for count in [96usize, 1024, 16384].iter() {
        let data = indices_u16(*count);
        group.throughput(Throughput::Bytes((*count * 2) as u64));

        group.bench_with_input(BenchmarkId::new("simd", count), &data, |b, data| {
            b.iter(|| find_min_max(black_box(data.as_slice())));
        });
        group.bench_with_input(BenchmarkId::new("scalar", count), &data, |b, data| {
            b.iter(|| find_min_max_scalar(black_box(data.as_slice())));
        });
    }

    group.finish();
}

fn bench_u8(c: &mut Criterion) {
    let mut group = c.benchmark_group("min_max_u8");

    for count in [96usize, 1024, 16384].iter() {
        let data: Vec<u8> = (0..*count).map(|i| (i * INDEX_STEP) as u8).collect();
        group.throughput(Throughput::Bytes(*count as u64));

        group.bench_with_input(BenchmarkId::new("simd", count), &data, |b, data| {
            b.iter(|| find_min_max(black_box(data.as_slice())));
        });
        group.bench_with_input(BenchmarkId::new("scalar", count), &data, |b, data| {
            b.iter(|| find_min_max_scalar(black_box(data.as_slice())));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_u16, bench_u8);
criterion_main!(benches);
