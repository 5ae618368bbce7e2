//! Cold-start path for a `MemoryCache` (spec.md §4.D "Recovery"): deletes
//! any segment directory still carrying a `lock` file (a flush the process
//! crashed mid-write), replays the WAL into a fresh live store, and opens
//! a writer positioned to continue the root shard ring.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::Result;
use config::{CacheConfig, LogsConfig};
use crossbeam_channel::unbounded;
use parking_lot::{Condvar, Mutex};
use schema::SchemaReflect;
use slotstore::SlotStore;
use wal::WalWriter;

use crate::handles::HandleCache;
use crate::locks::LockTable;
use crate::{apply, segment_config_from, CacheState, Inner, MemoryCache};

impl MemoryCache {
    /// Opens (or recovers) the `MemoryCache` rooted at `dir`.
    pub fn open(
        dir: impl AsRef<Path>,
        schema: Arc<dyn SchemaReflect>,
        cache_cfg: CacheConfig,
        logs_cfg: LogsConfig,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let flush_dir = dir.join("flush");
        fs::create_dir_all(&flush_dir)?;
        let logs_dir = dir.join("logs");

        let next_segment_id = clean_and_scan_segments(&flush_dir)?;

        let mut live = SlotStore::new();
        if logs_cfg.enable {
            wal::replay(&logs_dir, schema.as_ref(), |record| {
                apply::apply_record(&mut live, schema.as_ref(), &record)
            })?;
        }

        let wal = WalWriter::open(&logs_dir, logs_cfg.log_shard_size, schema.as_ref())?;
        let segment_cfg = segment_config_from(&cache_cfg);
        let max_descriptors = cache_cfg.max_descriptors.min(cache_cfg.max_mappings);
        let max_locks = cache_cfg.max_locks;

        let (flush_tx, flush_rx) = unbounded();

        let inner = Arc::new(Inner {
            schema,
            dir,
            cache_cfg,
            logs_cfg,
            segment_cfg,
            state: Mutex::new(CacheState { live, snapshots: Vec::new(), wal }),
            next_segment_id: AtomicU64::new(next_segment_id),
            flush_running: Mutex::new(0),
            flush_cv: Condvar::new(),
            handles: Mutex::new(HandleCache::new(max_descriptors)),
            locks: Mutex::new(LockTable::new(max_locks)),
            flush_tx,
        });

        let worker_inner = inner.clone();
        std::thread::Builder::new()
            .name(format!("memcache-flush-{}", worker_inner.schema.schema_id()))
            .spawn(move || crate::flush::flush_worker(flush_rx, worker_inner))?;

        Ok(Self { inner })
    }
}

/// Removes any `fN/` segment directory still carrying a `lock` file (an
/// incomplete flush) and returns one past the highest surviving segment id.
fn clean_and_scan_segments(flush_dir: &Path) -> Result<u64> {
    let mut valid_ids = Vec::new();
    for entry in fs::read_dir(flush_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(id) = segment_id_from_dir(&path) else { continue };
        if path.join("lock").exists() {
            tracing::warn!(segment = id, dir = %path.display(), "removing incomplete segment");
            fs::remove_dir_all(&path)?;
        } else {
            valid_ids.push(id);
        }
    }
    Ok(valid_ids.into_iter().max().map(|id| id + 1).unwrap_or(0))
}

fn segment_id_from_dir(path: &Path) -> Option<u64> {
    path.file_name()?.to_str()?.strip_prefix('f')?.parse().ok()
}

pub(crate) fn flush_dir_of(dir: &Path) -> PathBuf {
    dir.join("flush")
}

pub(crate) fn logs_dir_of(dir: &Path) -> PathBuf {
    dir.join("logs")
}
