/// Latency accounting benchmarks
///
/// Measures histogram recording, percentile lookup and latency graph
/// bucket sealing at scan-sized sample counts.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use diskscan::config::ScanMode;
use diskscan::scan::latency::{Histogram, LatencyGraph};
use diskscan::scan::order::{scan_order, scan_rng};

fn samples(n: usize) -> Vec<u64> {
    // Mostly fast reads with an occasional slow one
    (0..n as u64).map(|i| if i % 997 == 0 { 1500 } else { i % 9 }).collect()
}

fn bench_histogram_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("histogram_record");

    for n in [1_000usize, 100_000] {
        let data = samples(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &data, |b, data| {
            b.iter(|| {
                let mut h = Histogram::new();
                for &ms in data {
                    h.record(black_box(ms));
                }
                black_box(h.percentile(99.99))
            });
        });
    }

    group.finish();
}

fn bench_latency_graph(c: &mut Criterion) {
    let data = samples(10_000);

    c.bench_function("latency_graph_70_buckets", |b| {
        b.iter(|| {
            let mut graph = LatencyGraph::with_capacity(70);
            for (i, chunk) in data.chunks(143).enumerate() {
                graph.prepare(i as u64 * 143);
                for &ms in chunk {
                    graph.add(ms);
                }
                graph.finish((i as u64 + 1) * 143);
            }
            black_box(graph.len())
        });
    });
}

fn bench_scan_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_order");

    for mode in [ScanMode::Sequential, ScanMode::Random] {
        group.bench_function(mode.to_string(), |b| {
            let mut rng = scan_rng(Some(1));
            b.iter(|| black_box(scan_order(mode, 1 << 20, 128, 512, &mut rng)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_histogram_record, bench_latency_graph, bench_scan_order);
criterion_main!(benches);
