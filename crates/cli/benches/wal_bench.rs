use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use schema::demo::NoSortSchema;
use tempfile::tempdir;
use wal::{replay, WalRecord, WalWriter};

const N_RECORDS: u64 = 10_000;

fn wal_append_benchmark(c: &mut Criterion) {
    let schema = NoSortSchema::new(1);
    c.bench_function("wal_append_10k_field_records", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let writer = WalWriter::open(dir.path(), 16 * 1024 * 1024, &schema).unwrap();
                (dir, writer)
            },
            |(_dir, mut writer)| {
                for i in 0..N_RECORDS {
                    let record = WalRecord::Field {
                        partition_hash: i,
                        sort_key: Vec::new(),
                        payload: vec![0u8; 16],
                    };
                    writer.append(&record).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn wal_replay_benchmark(c: &mut Criterion) {
    let schema = NoSortSchema::new(1);
    c.bench_function("wal_replay_10k_field_records", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let mut writer = WalWriter::open(dir.path(), 16 * 1024 * 1024, &schema).unwrap();
                for i in 0..N_RECORDS {
                    let record = WalRecord::Field {
                        partition_hash: i,
                        sort_key: Vec::new(),
                        payload: vec![0u8; 16],
                    };
                    writer.append(&record).unwrap();
                }
                dir
            },
            |dir| {
                let mut count = 0u64;
                replay(dir.path(), &schema, |_| count += 1).unwrap();
                assert_eq!(count, N_RECORDS);
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, wal_append_benchmark, wal_replay_benchmark);
criterion_main!(benches);
