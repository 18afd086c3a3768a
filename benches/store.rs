//! Benchmarks for message store operations.
//!
//! Run with: cargo bench --bench store

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use campd::store::{BatchId, MemoryStorage, OutboundMessage, Storage};

fn test_message(batch: BatchId, seq: u32) -> OutboundMessage {
    let now = Utc::now();
    OutboundMessage::new(
        "bench",
        batch,
        format!("+2588{seq:08}"),
        format!("Test message {seq}"),
        now - Duration::seconds(i64::from(seq % 600)),
        now,
    )
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/insert");

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let batch = BatchId::new();
            b.iter(|| {
                let store = MemoryStorage::new();
                for i in 0..size {
                    black_box(store.insert(test_message(batch, i)));
                }
            });
        });
    }

    group.finish();
}

fn bench_due(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/due");

    for total in [1000, 10000].iter() {
        let store = MemoryStorage::new();
        let batch = BatchId::new();
        for i in 0..*total {
            store.insert(test_message(batch, i));
        }

        group.bench_with_input(BenchmarkId::from_parameter(total), total, |b, _| {
            let now = Utc::now();
            b.iter(|| black_box(store.due("bench", now, 100)));
        });
    }

    group.finish();
}

fn bench_batch_counts(c: &mut Criterion) {
    let store = MemoryStorage::new();
    let batch = BatchId::new();
    for i in 0..10000 {
        let id = store.insert(test_message(batch, i));
        if i % 2 == 0 {
            let now = Utc::now();
            store.update(id, Box::new(move |m| m.mark_sent(format!("ext-{i}"), now)));
        }
    }

    c.bench_function("store/batch_counts", |b| {
        b.iter(|| black_box(store.batch_counts(batch)))
    });
}

fn bench_by_external_id(c: &mut Criterion) {
    let store = MemoryStorage::new();
    let batch = BatchId::new();
    for i in 0..10000u32 {
        let id = store.insert(test_message(batch, i));
        let now = Utc::now();
        store.update(id, Box::new(move |m| m.mark_sent(format!("ext-{i}"), now)));
    }

    c.bench_function("store/by_external_id", |b| {
        let mut i = 0u32;
        b.iter(|| {
            let key = format!("ext-{}", i % 10000);
            i += 1;
            black_box(store.by_external_id(&key))
        })
    });
}

criterion_group!(
    benches,
    bench_insert,
    bench_due,
    bench_batch_counts,
    bench_by_external_id
);
criterion_main!(benches);
