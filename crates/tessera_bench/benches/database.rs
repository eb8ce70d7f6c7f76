//! Transaction benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tessera_bench::{bench_database, every_nth_row, populate, random_block, BENCH_TABLE};
use tessera_core::{Config, TransactionKind, DEFAULT_DATABASE};

/// Benchmark single-block imports.
fn bench_import(c: &mut Criterion) {
    let mut group = c.benchmark_group("import");

    for rows in [64, 1024, 8192].iter() {
        group.throughput(Throughput::Elements(*rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, &rows| {
            let db = bench_database(Config::default());
            let block = random_block(0, rows);

            b.iter(|| {
                db.transaction("import", |txn| {
                    txn.import(DEFAULT_DATABASE, BENCH_TABLE, vec![black_box(block.clone())])
                })
                .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark transaction overhead (empty transaction).
fn bench_transaction_overhead(c: &mut Criterion) {
    c.bench_function("transaction_overhead", |b| {
        let db = bench_database(Config::default());

        b.iter(|| {
            db.transaction("empty", |_txn| Ok(())).unwrap();
        });
    });
}

/// Benchmark deletes of one row.
fn bench_delete(c: &mut Criterion) {
    c.bench_function("delete", |b| {
        let db = bench_database(Config::default());

        b.iter_batched(
            || {
                populate(&db, 1, 16);
                every_nth_row(&db, 1).pop().unwrap()
            },
            |row| {
                db.transaction("delete", |txn| {
                    txn.delete(DEFAULT_DATABASE, BENCH_TABLE, &[black_box(row)])
                })
                .unwrap();
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

/// Benchmark full-table scans.
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    for segments in [1, 10, 100].iter() {
        group.throughput(Throughput::Elements(*segments as u64 * 1024));
        group.bench_with_input(
            BenchmarkId::from_parameter(segments),
            segments,
            |b, &segments| {
                let db = bench_database(Config::default());
                populate(&db, segments, 1024);

                b.iter(|| {
                    let txn = db.begin("scan", TransactionKind::ReadOnly).unwrap();
                    let result = txn.scan(DEFAULT_DATABASE, black_box(BENCH_TABLE)).unwrap();
                    black_box(result);
                });
            },
        );
    }
    group.finish();
}

/// Benchmark segment listing against a table with many segments.
fn bench_list_segments(c: &mut Criterion) {
    c.bench_function("list_segments_1000", |b| {
        let db = bench_database(Config::default());
        populate(&db, 1000, 4);

        b.iter(|| {
            let txn = db.begin("list", TransactionKind::ReadOnly).unwrap();
            black_box(txn.list_segments(DEFAULT_DATABASE, BENCH_TABLE).unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_import,
    bench_transaction_overhead,
    bench_delete,
    bench_scan,
    bench_list_segments,
);

criterion_main!(benches);
