use std::path::Path;
use std::sync::Arc;

use config::{CacheConfig, LogsConfig};
use schema::demo::{encode_pkey, NoSortSchema, U32SortSchema};
use schema::SchemaReflect;

use crate::{partition_hash, MemoryCache};

/// A `CacheConfig` with small descriptor/mapping/lock limits and a flush
/// pressure high enough that tests control flushing explicitly via
/// `MemoryCache::flush`, not by accident.
pub fn small_cache_cfg() -> CacheConfig {
    CacheConfig {
        flush_pressure: 1 << 20,
        max_descriptors: 16,
        max_mappings: 16,
        max_locks: 16,
        ..CacheConfig::default()
    }
}

pub fn small_logs_cfg() -> LogsConfig {
    LogsConfig { log_shard_size: 64 * 1024, ..LogsConfig::default() }
}

pub fn open_no_sort(dir: impl AsRef<Path>) -> MemoryCache {
    MemoryCache::open(dir, Arc::new(NoSortSchema::new(1)) as Arc<dyn SchemaReflect>, small_cache_cfg(), small_logs_cfg())
        .unwrap()
}

pub fn open_sorted(dir: impl AsRef<Path>) -> MemoryCache {
    MemoryCache::open(dir, Arc::new(U32SortSchema::new(2)) as Arc<dyn SchemaReflect>, small_cache_cfg(), small_logs_cfg())
        .unwrap()
}

/// Encodes `tag` as a partition key and derives the `H` a caller would pass
/// alongside it, the same way `mount`'s wire parser would.
pub fn pkey(tag: &[u8]) -> (u64, Vec<u8>) {
    let encoded = encode_pkey(tag);
    (partition_hash(&encoded), encoded)
}
