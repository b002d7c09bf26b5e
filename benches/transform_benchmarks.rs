//! sluice benchmark suite.
//!
//! Benchmarks for key operations:
//! - Tokenizing an extract
//! - Classifying records
//! - A full import into an in-memory sink

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::sync::Arc;

use sluice::config::{FeedConfig, IngestSettings};
use sluice::job::JobController;
use sluice::pipeline::Pipeline;
use sluice::record::{DI319_COLUMNS, classify};
use sluice::sink::MemorySink;
use sluice::source::DelimitedReader;

fn generate_extract(rows: usize) -> Bytes {
    let mut text = DI319_COLUMNS.join(";");
    text.push('\n');
    for i in 0..rows {
        let balance = if i % 3 == 0 { "120,000.50" } else { "980,000" };
        text.push_str(&format!(
            "2025-01-31;KANWIL JAKARTA {};0{:04};CIF{i:08};{i:012};TAB;NASABAH {i};PN{:05};{balance};0;1,000,000.00;2019-03-{:02}\n",
            i % 12,
            i % 500,
            i % 97,
            i % 28 + 1
        ));
    }
    Bytes::from(text)
}

fn header() -> Vec<String> {
    DI319_COLUMNS.iter().map(|c| c.to_string()).collect()
}

/// Tokenizing only, no validation.
fn reader_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("reader");
    let header = header();

    for size in [1_000, 10_000, 100_000] {
        let data = generate_extract(size);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::new("tokenize", size), &data, |b, data| {
            b.iter(|| {
                DelimitedReader::new(data.as_ref(), b';', &header)
                    .unwrap()
                    .filter(Result::is_ok)
                    .count()
            });
        });
    }

    group.finish();
}

fn classify_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let header = header();

    for size in [1_000, 10_000] {
        let records: Vec<_> = DelimitedReader::new(generate_extract(size).as_ref(), b';', &header)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("records", size), &records, |b, records| {
            b.iter(|| records.iter().map(classify).count());
        });
    }

    group.finish();
}

/// End to end through the worker pool, varying the worker count.
fn pipeline_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let data = generate_extract(50_000);

    for workers in [1, 4, 8] {
        group.throughput(Throughput::Elements(50_000));
        group.bench_with_input(BenchmarkId::new("workers", workers), &data, |b, data| {
            b.to_async(&runtime).iter(|| async {
                let settings = IngestSettings {
                    workers,
                    ..IngestSettings::default()
                };
                let pipeline = Pipeline::new(
                    "di319",
                    FeedConfig::default(),
                    settings,
                    Arc::new(MemorySink::new()),
                );
                let controller = JobController::new();
                let handle = controller.begin("di319", "bench.csv").unwrap();
                pipeline.run(handle, data.clone()).await.unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    reader_benchmarks,
    classify_benchmarks,
    pipeline_benchmarks,
);
criterion_main!(benches);
