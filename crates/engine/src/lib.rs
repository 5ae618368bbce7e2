//! # engine — MemoryCache
//!
//! The per-`(core, schema)` storage engine (spec.md §4.D/§4.E): owns one
//! live `slotstore::SlotStore`, the `wal::WalWriter` that makes its writes
//! durable, and the `sstable` segments that hold everything flushed out of
//! earlier live generations. `mount` owns one `MemoryCache` per schema per
//! core and routes queries into it by partition hash.
//!
//! ## Flush
//!
//! A flush swaps the live store for a fresh, empty one and hands the old
//! one (now just a frozen snapshot) to a background worker thread that
//! writes it out as a segment, then retires the matching WAL snapshot
//! directory. Reads started before the flush completes still see that
//! snapshot through a `Weak` kept on `CacheState` — see `read.rs` for the
//! full live → snapshots → segments read order.
//!
//! ## Crash safety
//!
//! Every write/reset/remove is appended to the WAL before it's applied to
//! the live store. A segment directory keeps a `lock` file until all three
//! of its files are durable; `recovery` deletes any segment still carrying
//! one on startup and replays the WAL (snapshot directories oldest-first,
//! then the root shard ring) into a fresh live store.
//!
//! ## Module layout
//!
//! | Module      | Purpose                                                |
//! |-------------|---------------------------------------------------------|
//! | [`recovery`]| `MemoryCache::open` — segment cleanup + WAL replay       |
//! | [`write`]   | `write()`, `reset()`, `remove()`                         |
//! | [`read`]    | `read()`, `exists()`, `page()`, `page_from()`            |
//! | [`flush`]   | `flush()` + the background segment-writing worker        |
//! | [`handles`] | LRU cache of open `SegmentReader`s                        |
//! | [`locks`]   | Advisory per-`(H, S)` lock table                          |
//! | [`apply`]   | WAL record ⇄ slot-store application, shared by write+replay |

mod apply;
mod flush;
mod handles;
mod locks;
mod read;
mod recovery;
mod write;

pub use apply::partition_hash;
pub use read::{FieldBitmap, PageEntry};
pub use write::WriteOp;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::Result;
use config::{CacheConfig, LogsConfig};
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use schema::SchemaReflect;
use slotstore::SlotStore;
use sstable::SegmentConfig;
use wal::WalWriter;

struct FlushJob {
    segment_id: u64,
    snapshot: Arc<SlotStore>,
}

struct CacheState {
    live: SlotStore,
    /// Newest-first. An entry upgrades successfully only while some
    /// in-flight `FlushJob` still holds the matching strong `Arc`.
    snapshots: Vec<Weak<SlotStore>>,
    wal: WalWriter,
}

struct Inner {
    schema: Arc<dyn SchemaReflect>,
    dir: PathBuf,
    cache_cfg: CacheConfig,
    logs_cfg: LogsConfig,
    segment_cfg: SegmentConfig,
    state: Mutex<CacheState>,
    /// Next segment id to hand out. The visible (durable) segment range is
    /// always `0..next_segment_id - flush_running`.
    next_segment_id: AtomicU64,
    flush_running: Mutex<usize>,
    flush_cv: Condvar,
    handles: Mutex<handles::HandleCache>,
    locks: Mutex<locks::LockTable>,
    flush_tx: Sender<FlushJob>,
}

/// A handle to one `(core, schema)` storage engine. Cheap to clone — every
/// clone shares the same live store, WAL, handle cache, lock table and
/// background flush worker.
#[derive(Clone)]
pub struct MemoryCache {
    inner: Arc<Inner>,
}

impl MemoryCache {
    /// Schema this cache stores records for.
    pub fn schema(&self) -> &Arc<dyn SchemaReflect> {
        &self.inner.schema
    }

    /// Directory this cache is rooted at (`vcpuK/[schemaID]/`).
    pub fn dir(&self) -> &std::path::Path {
        &self.inner.dir
    }

    /// Drops the live store and its pressure counter without flushing it —
    /// an administrative release valve for memory pressure. The WAL still
    /// holds every record that was in it, so a restart still recovers them.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.live = SlotStore::new();
    }

    /// Acquires the advisory lock at `(h, sort_key)` for `origin`. `true` if
    /// the lock is now (or already was) held by `origin`.
    pub fn lock(&self, h: u64, sort_key: &[u8], origin: u64) -> bool {
        self.inner.locks.lock().acquire(h, sort_key, origin)
    }

    /// Releases the advisory lock at `(h, sort_key)` if `origin` holds it.
    pub fn unlock(&self, h: u64, sort_key: &[u8], origin: u64) {
        self.inner.locks.lock().release(h, sort_key, origin);
    }

    /// Whether `(h, sort_key)` is held by an originator other than `origin`.
    pub fn is_locked_by_other(&self, h: u64, sort_key: &[u8], origin: u64) -> bool {
        self.inner.locks.lock().is_locked_by_other(h, sort_key, origin)
    }

    /// Blocks the calling thread until every flush started before this call
    /// returns has completed. Used by orderly shutdown paths.
    pub fn drain_flushes(&self) {
        let mut running = self.inner.flush_running.lock();
        while *running > 0 {
            self.inner.flush_cv.wait(&mut running);
        }
    }

    fn sort_key_opt<'a>(&self, sort_key: &'a [u8]) -> Option<&'a [u8]> {
        if self.inner.schema.has_sort_keys() {
            Some(sort_key)
        } else {
            None
        }
    }

    /// Exclusive upper bound of durable segment ids currently safe to read.
    fn visible_segment_upper(&self) -> u64 {
        let next = self.inner.next_segment_id.load(Ordering::SeqCst);
        let running = *self.inner.flush_running.lock() as u64;
        next.saturating_sub(running)
    }

    fn maybe_flush(&self) -> Result<()> {
        let pressure = self.inner.state.lock().live.pressure();
        if pressure >= self.inner.cache_cfg.flush_pressure {
            self.flush()?;
        }
        Ok(())
    }
}

fn segment_config_from(cfg: &CacheConfig) -> SegmentConfig {
    SegmentConfig {
        block_size: cfg.block_size,
        block_sparse_index_ratio: cfg.block_sparse_index_ratio,
        partition_sparse_index_ratio: cfg.partition_sparse_index_ratio,
        partition_bloom_fp_rate_bp: cfg.partition_bloom_fp_rate,
        intra_partition_bloom_fp_rate_bp: cfg.intra_partition_bloom_fp_rate,
        compression_ratio: cfg.compression_ratio,
    }
}

#[cfg(test)]
mod tests;
