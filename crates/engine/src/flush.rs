//! `flush()` and the background segment-writing worker (spec.md §4.D).
//!
//! `flush()` itself only does the part that must happen under the state
//! lock: swap `live` for an empty store, snapshot the WAL's current root
//! shards into `logs/snapshotN/`, and hand both off to a dedicated worker
//! thread. The worker writes the segment and then deletes the WAL snapshot
//! — crash between those two leaves the segment durable and the snapshot
//! still on disk, which just means the next restart's replay redoes a
//! no-op pass over already-flushed records, not a correctness problem.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use slotstore::{PartitionVariant, SlotStore};
use sstable::{PartitionData, PartitionRecord, SegmentWriter};

use crate::recovery::flush_dir_of;
use crate::{FlushJob, Inner, MemoryCache};

impl MemoryCache {
    /// Starts a flush of the current live store, returning the new
    /// segment's id. A no-op (returns the next id without doing anything)
    /// if the live store is empty.
    pub fn flush(&self) -> Result<u64> {
        let mut state = self.inner.state.lock();
        if state.live.is_empty() {
            return Ok(self.inner.next_segment_id.load(std::sync::atomic::Ordering::SeqCst));
        }

        let segment_id = self.inner.next_segment_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let old_live = state.live.take();
        state.wal.snapshot_for_flush(segment_id)?;
        let snapshot = Arc::new(old_live);
        state.snapshots.insert(0, Arc::downgrade(&snapshot));
        drop(state);

        *self.inner.flush_running.lock() += 1;
        self.inner
            .flush_tx
            .send(FlushJob { segment_id, snapshot })
            .map_err(|_| anyhow::anyhow!("flush worker is no longer running"))?;
        Ok(segment_id)
    }
}

pub(crate) fn flush_worker(rx: crossbeam_channel::Receiver<FlushJob>, inner: Arc<Inner>) {
    while let Ok(job) = rx.recv() {
        let segment_id = job.segment_id;
        if let Err(err) = run_flush(&inner, job) {
            tracing::error!(segment_id, error = %err, "segment flush failed");
        } else {
            tracing::debug!(segment_id, "segment flush complete");
        }
        *inner.flush_running.lock() -= 1;
        inner.flush_cv.notify_all();
    }
}

fn run_flush(inner: &Arc<Inner>, job: FlushJob) -> Result<()> {
    let partitions = materialize_partitions(&job.snapshot);
    let flush_dir = flush_dir_of(&inner.dir);
    SegmentWriter::write(&flush_dir, job.segment_id, inner.schema.as_ref(), &inner.segment_cfg, partitions)?;
    wal::discard_snapshot(inner.dir.join("logs"), job.segment_id)?;
    Ok(())
}

/// Converts a frozen `SlotStore` into the `(hash, pkey, PartitionData)`
/// stream `SegmentWriter::write` needs, sorted ascending by hash as its
/// strictly-increasing indexer invariant requires. Partitions that were
/// only ever `get_or_create_partition`d (no slot ever written) carry
/// nothing worth flushing and are dropped.
fn materialize_partitions(store: &SlotStore) -> Vec<(u64, Vec<u8>, PartitionData)> {
    let mut rows: Vec<_> = store.partitions().collect();
    rows.sort_by_key(|(h, _)| **h);

    rows.into_iter()
        .filter_map(|(hash, entry)| {
            let data = match &entry.variant {
                PartitionVariant::Single(Some(slot)) => {
                    PartitionData::Unary(PartitionRecord { vtype: slot.vtype, payload: slot.buffer.clone() })
                }
                PartitionVariant::Single(None) => return None,
                PartitionVariant::Ordered(map) => {
                    let wide: BTreeMap<Vec<u8>, PartitionRecord> = map
                        .iter()
                        .map(|(k, s)| (k.clone(), PartitionRecord { vtype: s.vtype, payload: s.buffer.clone() }))
                        .collect();
                    if wide.is_empty() {
                        return None;
                    }
                    PartitionData::Wide(wide)
                }
            };
            Some((*hash, entry.pkey.clone(), data))
        })
        .collect()
}
