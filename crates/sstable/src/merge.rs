//! Multi-segment merge for on-disk reads (spec.md §9 Open Question:
//! "disk `page_from`"): segments are scanned newest-to-oldest, the newest
//! record for a given key wins, and a winning tombstone shadows — but is not
//! itself emitted as — any older value for that key.
//!
//! Grounded on the teacher's [`crate::merge`]'s heap-based k-way merge
//! (`HeapEntry`/`BinaryHeap`), generalized from seq-number dedup across a
//! flat keyspace to segment-recency dedup across a single partition's
//! sort-keyed slots.

use anyhow::Result;
use schema::{SchemaReflect, SlotValueType};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::reader::SegmentReader;
use crate::writer::PartitionRecord;

/// A pending key from one segment, used for heap-based merge ordering.
/// Segments are indexed newest-first; on a tie the lower index (newer) wins.
struct HeapEntry {
    key: Vec<u8>,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(&self.key).then_with(|| other.source.cmp(&self.source))
    }
}

/// Point lookup across segments, newest wins. `segments` must be ordered
/// newest-first. Returns `None` if the newest hit is a tombstone or no
/// segment has the key.
pub fn lookup(
    schema: &Arc<dyn SchemaReflect>,
    segments: &[SegmentReader],
    hash: u64,
    sort_key: Option<&[u8]>,
) -> Result<Option<PartitionRecord>> {
    for seg in segments {
        if let Some(rec) = seg.lookup(schema, hash, sort_key)? {
            return Ok(if rec.vtype == SlotValueType::Tombstone { None } else { Some(rec) });
        }
    }
    Ok(None)
}

/// Merged, sort-key-ordered page across segments for a single wide
/// partition. `segments` must be ordered newest-first; each is paged from
/// `start` far enough to cover `count` live (non-tombstone) results once
/// older duplicates are shadowed.
pub fn page_from(
    schema: &Arc<dyn SchemaReflect>,
    segments: &[SegmentReader],
    hash: u64,
    start: Option<&[u8]>,
    count: usize,
) -> Result<Vec<(Vec<u8>, PartitionRecord)>> {
    if count == 0 || segments.is_empty() {
        return Ok(Vec::new());
    }

    // Pull every candidate from `start` onward per segment — partitions are
    // bounded in size, and callers page one partition at a time.
    let mut per_source: Vec<Vec<(Vec<u8>, PartitionRecord)>> = Vec::with_capacity(segments.len());
    for seg in segments {
        per_source.push(seg.page_from(schema, hash, start, usize::MAX)?);
    }

    let mut cursors = vec![0usize; segments.len()];
    let mut heap = BinaryHeap::new();
    for (i, rows) in per_source.iter().enumerate() {
        if let Some((k, _)) = rows.first() {
            heap.push(HeapEntry { key: k.clone(), source: i });
        }
    }

    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        let Some(top) = heap.pop() else { break };
        let best_key = top.key;

        // Among all sources currently positioned at `best_key`, the newest
        // (lowest source index) wins; all others are shadowed and advanced.
        let mut contenders = vec![top.source];
        while let Some(peek) = heap.peek() {
            if peek.key != best_key {
                break;
            }
            contenders.push(heap.pop().unwrap().source);
        }
        contenders.sort_unstable();
        let winner = contenders[0];
        let (_, rec) = per_source[winner][cursors[winner]].clone();

        for src in contenders {
            cursors[src] += 1;
            if let Some((k, _)) = per_source[src].get(cursors[src]) {
                heap.push(HeapEntry { key: k.clone(), source: src });
            }
        }

        if rec.vtype != SlotValueType::Tombstone {
            out.push((best_key, rec));
        }
    }

    Ok(out)
}
