//! `read()`, `exists()`, `page()`, `page_from()` (spec.md §4.E).
//!
//! A point read walks newest-to-oldest: the live store, then snapshots held
//! by in-flight flushes (newest snapshot first), then durable segments
//! (highest id first). The first non-tombstone hit for a `SchemaInstance`
//! or an exists-only probe settles the read outright; a `FieldSequence` hit
//! only resolves the bitmap's fields it actually carries and the search
//! continues into older layers for whatever's left. A tombstone anywhere in
//! the chain ends the read as "not found", full stop.
//!
//! `page`/`page_from` run the same layering through a k-way merge so the
//! final page is in ascending sort-key order with newer layers shadowing
//! older ones key-for-key.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use anyhow::Result;
use schema::SlotValueType;

use crate::MemoryCache;

/// Which fields a read is interested in, as a 64-bit set (schemas in this
/// system top out well under 64 fields). An empty bitmap means "just tell
/// me whether a non-tombstone value exists," matching `exists()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FieldBitmap(u64);

impl FieldBitmap {
    pub fn none() -> Self {
        Self(0)
    }

    pub fn single(field_id: u8) -> Self {
        Self(1u64 << field_id)
    }

    pub fn from_fields(ids: &[u8]) -> Self {
        ids.iter().fold(Self::none(), |acc, &id| acc.with(id))
    }

    pub fn with(mut self, field_id: u8) -> Self {
        self.0 |= 1u64 << field_id;
        self
    }

    pub fn contains(&self, field_id: u8) -> bool {
        self.0 & (1u64 << field_id) != 0
    }

    pub fn remove(&mut self, field_id: u8) {
        self.0 &= !(1u64 << field_id);
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0u8..64).filter(move |&id| self.contains(id))
    }
}

/// One record surfaced by `page`/`page_from`, already resolved to the
/// winning layer for its sort key.
#[derive(Debug, Clone)]
pub struct PageEntry {
    pub sort_key: Vec<u8>,
    pub vtype: SlotValueType,
    pub payload: Vec<u8>,
}

enum Probe {
    /// A tombstone won this layer; the read is "not found", full stop.
    Tombstone,
    /// This layer fully resolved the read (a `SchemaInstance`, or an
    /// exists-only probe that just needed any non-tombstone hit).
    Done(bool),
    /// A `FieldSequence` resolved zero or more bitmap fields; `bool` is
    /// whether it resolved at least one. Older layers are still consulted
    /// for whatever remains in the (now-shrunk) bitmap.
    Continue(bool),
}

impl MemoryCache {
    fn probe(
        &self,
        vtype: SlotValueType,
        buf: &[u8],
        exists_only: bool,
        bitmap: &mut FieldBitmap,
        on_field: &mut impl FnMut(u8, &[u8]),
    ) -> Probe {
        if vtype == SlotValueType::Tombstone {
            return Probe::Tombstone;
        }
        if exists_only {
            return Probe::Done(true);
        }
        match vtype {
            SlotValueType::SchemaInstance => {
                for field_id in bitmap.iter() {
                    if let Some(bytes) = self.inner.schema.read_field(vtype, buf, field_id) {
                        on_field(field_id, bytes);
                    }
                }
                Probe::Done(true)
            }
            SlotValueType::FieldSequence => {
                let mut found = false;
                for field_id in bitmap.iter().collect::<Vec<_>>() {
                    if let Some(bytes) = self.inner.schema.read_field(vtype, buf, field_id) {
                        on_field(field_id, bytes);
                        bitmap.remove(field_id);
                        found = true;
                    }
                }
                Probe::Continue(found)
            }
            SlotValueType::Tombstone => unreachable!(),
        }
    }

    /// Resolves the requested `bitmap` fields at `(h, sort_key)`, invoking
    /// `on_field` for each one found. Returns `true` iff at least one was
    /// found (or, for an empty bitmap, iff a non-tombstone value exists).
    pub fn read(&self, h: u64, sort_key: &[u8], mut bitmap: FieldBitmap, mut on_field: impl FnMut(u8, &[u8])) -> Result<bool> {
        let exists_only = bitmap.is_empty();
        let mut any_found = false;

        let segment_upper = {
            let state = self.inner.state.lock();
            if let Some(slot) = state.live.find_slot(h, sort_key) {
                match self.probe(slot.vtype, &slot.buffer, exists_only, &mut bitmap, &mut on_field) {
                    Probe::Tombstone => return Ok(false),
                    Probe::Done(found) => return Ok(found),
                    Probe::Continue(found) => any_found |= found,
                }
            }
            for weak in &state.snapshots {
                let Some(snapshot) = weak.upgrade() else { continue };
                let Some(slot) = snapshot.find_slot(h, sort_key) else { continue };
                match self.probe(slot.vtype, &slot.buffer, exists_only, &mut bitmap, &mut on_field) {
                    Probe::Tombstone => return Ok(false),
                    Probe::Done(found) => return Ok(found),
                    Probe::Continue(found) => any_found |= found,
                }
                if !exists_only && bitmap.is_empty() {
                    return Ok(true);
                }
            }
            self.visible_segment_upper()
        };

        if segment_upper == 0 {
            return Ok(any_found);
        }
        let mut handles = self.inner.handles.lock();
        let sort_key_opt = self.sort_key_opt(sort_key);
        for segment_id in (0..segment_upper).rev() {
            let Ok(reader) = handles.get_or_open(&self.inner.dir, segment_id) else { continue };
            let Some(rec) = reader.lookup(&self.inner.schema, h, sort_key_opt)? else { continue };
            match self.probe(rec.vtype, &rec.payload, exists_only, &mut bitmap, &mut on_field) {
                Probe::Tombstone => return Ok(false),
                Probe::Done(found) => return Ok(found),
                Probe::Continue(found) => {
                    any_found |= found;
                    if !exists_only && bitmap.is_empty() {
                        break;
                    }
                }
            }
        }
        Ok(any_found)
    }

    /// `true` iff a non-tombstone value exists at `(h, sort_key)`.
    pub fn exists(&self, h: u64, sort_key: &[u8]) -> Result<bool> {
        self.read(h, sort_key, FieldBitmap::none(), |_, _| {})
    }

    /// Gathers up to `count` records of partition `h` from the beginning.
    pub fn page(&self, h: u64, count: usize) -> Result<Vec<PageEntry>> {
        self.page_from(h, None, count)
    }

    /// Gathers up to `count` records of partition `h` in ascending
    /// sort-key order, starting at the first key `>= start`.
    pub fn page_from(&self, h: u64, start: Option<&[u8]>, count: usize) -> Result<Vec<PageEntry>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut sources: Vec<Vec<(Vec<u8>, SlotValueType, Vec<u8>)>> = Vec::new();
        let segment_upper = {
            let state = self.inner.state.lock();
            sources.push(owned_rows(state.live.page_from(h, start, usize::MAX)));
            for weak in &state.snapshots {
                if let Some(snapshot) = weak.upgrade() {
                    sources.push(owned_rows(snapshot.page_from(h, start, usize::MAX)));
                }
            }
            self.visible_segment_upper()
        };

        if segment_upper > 0 {
            let mut handles = self.inner.handles.lock();
            for segment_id in (0..segment_upper).rev() {
                let Ok(reader) = handles.get_or_open(&self.inner.dir, segment_id) else { continue };
                let rows = reader.page_from(&self.inner.schema, h, start, usize::MAX)?;
                sources.push(rows.into_iter().map(|(k, r)| (k, r.vtype, r.payload)).collect());
            }
        }

        Ok(merge_newest_first(sources, count)
            .into_iter()
            .map(|(sort_key, vtype, payload)| PageEntry { sort_key, vtype, payload })
            .collect())
    }
}

fn owned_rows(rows: Vec<(&[u8], &slotstore::Slot)>) -> Vec<(Vec<u8>, SlotValueType, Vec<u8>)> {
    rows.into_iter().map(|(k, s)| (k.to_vec(), s.vtype, s.buffer.clone())).collect()
}

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

/// K-way merges `sources` (each already ascending by key, ordered
/// newest-first) into up to `count` live records, newest wins on a tied
/// key and a winning tombstone shadows (without being emitted) any older
/// value for that key. Mirrors `sstable::merge::page_from`'s algorithm,
/// generalized across heterogeneous in-memory and on-disk sources that
/// can't be expressed as one contiguous slice.
fn merge_newest_first(
    sources: Vec<Vec<(Vec<u8>, SlotValueType, Vec<u8>)>>,
    count: usize,
) -> Vec<(Vec<u8>, SlotValueType, Vec<u8>)> {
    let mut cursors = vec![0usize; sources.len()];
    let mut heap = BinaryHeap::new();
    for (i, rows) in sources.iter().enumerate() {
        if let Some((k, _, _)) = rows.first() {
            heap.push(HeapEntry { key: k.clone(), source: i });
        }
    }

    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        let Some(top) = heap.pop() else { break };
        let best_key = top.key;

        let mut contenders = vec![top.source];
        while let Some(peek) = heap.peek() {
            if peek.key != best_key {
                break;
            }
            contenders.push(heap.pop().unwrap().source);
        }
        contenders.sort_unstable();
        let winner = contenders[0];
        let (_, vtype, payload) = sources[winner][cursors[winner]].clone();

        for src in contenders {
            cursors[src] += 1;
            if let Some((k, _, _)) = sources[src].get(cursors[src]) {
                heap.push(HeapEntry { key: k.clone(), source: src });
            }
        }

        if vtype != SlotValueType::Tombstone {
            out.push((best_key, vtype, payload));
        }
    }
    out
}
