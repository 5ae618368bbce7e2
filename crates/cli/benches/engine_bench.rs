use std::sync::Arc;

use config::{CacheConfig, LogsConfig};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::{FieldBitmap, MemoryCache, WriteOp};
use schema::demo::{encode_pkey, NoSortSchema};
use schema::SchemaReflect;
use tempfile::tempdir;

const N_PARTITIONS: u64 = 10_000;

fn cache_cfg() -> CacheConfig {
    // A high flush pressure keeps these benches measuring the write/read
    // path itself rather than an interleaved background flush.
    CacheConfig { flush_pressure: usize::MAX, ..CacheConfig::default() }
}

fn logs_cfg() -> LogsConfig {
    LogsConfig { log_shard_size: 64 * 1024 * 1024, ..LogsConfig::default() }
}

fn open_cache(dir: &std::path::Path) -> MemoryCache {
    MemoryCache::open(dir, Arc::new(NoSortSchema::new(1)) as Arc<dyn SchemaReflect>, cache_cfg(), logs_cfg()).unwrap()
}

fn engine_write_benchmark(c: &mut Criterion) {
    c.bench_function("engine_write_10k_partitions", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let cache = open_cache(dir.path());
                (dir, cache)
            },
            |(_dir, cache)| {
                for h in 0..N_PARTITIONS {
                    let pkey = encode_pkey(&h.to_le_bytes());
                    cache.write(h, pkey, b"", WriteOp::Field { field_id: 0, bytes: &h.to_le_bytes() }, 0).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn engine_read_hit_benchmark(c: &mut Criterion) {
    c.bench_function("engine_read_hit_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let cache = open_cache(dir.path());
                for h in 0..N_PARTITIONS {
                    let pkey = encode_pkey(&h.to_le_bytes());
                    cache.write(h, pkey, b"", WriteOp::Field { field_id: 0, bytes: &h.to_le_bytes() }, 0).unwrap();
                }
                (dir, cache)
            },
            |(_dir, cache)| {
                for h in 0..N_PARTITIONS {
                    let mut seen = None;
                    cache.read(h, b"", FieldBitmap::single(0), |_, bytes| seen = Some(bytes.to_vec())).unwrap();
                    assert!(seen.is_some());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, engine_write_benchmark, engine_read_hit_benchmark);
criterion_main!(benches);
