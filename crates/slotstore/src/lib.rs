//! # Slot store
//!
//! The per-(core, schema) in-memory write buffer. Every accepted mutation
//! lands here before (and independently of) the write-ahead log; a
//! `MemoryCache` owns one instance per schema per core and swaps it for a
//! fresh, empty one when a flush begins.
//!
//! ## Shape
//!
//! ```text
//! map<partition_hash, { pkey_bytes, variant }>
//! variant = Single(Slot) | Ordered(BTreeMap<sort_key_bytes, Slot>)
//! ```
//!
//! A schema with no sort fields addresses at most one slot per partition
//! (`Single`); the sort-key argument to every operation is then the empty
//! byte string. A schema with sort fields gets an ordered byte map keyed by
//! the raw sort-key bytes, which gives the O(log n) lookup and ordered
//! range traversal `page`/`page_from` need for free from `BTreeMap`'s
//! byte-wise `Ord` on `Vec<u8>`.
//!
//! ## Example
//! ```rust
//! use schema::SlotValueType;
//! use slotstore::SlotStore;
//!
//! let mut store = SlotStore::new();
//! let (_entry, created) = store.get_or_create_partition(7, b"tenant-1".to_vec(), true);
//! assert!(created);
//! store.create_slot(7, b"sort-a", SlotValueType::SchemaInstance, b"payload");
//! assert_eq!(store.find_slot(7, b"sort-a").unwrap().buffer, b"payload".to_vec());
//! ```

use std::collections::BTreeMap;
use std::collections::HashMap;

use schema::SlotValueType;

/// One addressable value. `buffer.capacity()` is the slot's allocated
/// capacity; `create_slot` reuses it in place when large enough instead of
/// reallocating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub vtype: SlotValueType,
    pub buffer: Vec<u8>,
}

impl Slot {
    fn new(vtype: SlotValueType, bytes: &[u8]) -> Self {
        Self { vtype, buffer: bytes.to_vec() }
    }

    /// Overwrites this slot's contents in place if its backing capacity
    /// already covers `bytes`, otherwise replaces the buffer entirely.
    /// Either way the slot's identity (from the caller's point of view) is
    /// unchanged; only a direct reference to the old `Vec` would observe
    /// the reallocation.
    fn overwrite(&mut self, vtype: SlotValueType, bytes: &[u8]) {
        self.vtype = vtype;
        if self.buffer.capacity() >= bytes.len() {
            self.buffer.clear();
            self.buffer.extend_from_slice(bytes);
        } else {
            self.buffer = bytes.to_vec();
        }
    }

    /// Grows (or shrinks) the slot to `new_size`, preserving the existing
    /// payload prefix. Matches `create_slot`'s in-place-if-possible rule.
    fn resize(&mut self, new_size: usize) {
        if self.buffer.capacity() < new_size {
            let mut grown = Vec::with_capacity(new_size);
            grown.extend_from_slice(&self.buffer);
            self.buffer = grown;
        }
        self.buffer.resize(new_size, 0);
    }
}

/// Either a partition with no sort keys (at most one slot) or an ordered
/// map of sort-key bytes to slots.
#[derive(Debug, Clone)]
pub enum PartitionVariant {
    Single(Option<Slot>),
    Ordered(BTreeMap<Vec<u8>, Slot>),
}

#[derive(Debug, Clone)]
pub struct PartitionEntry {
    pub pkey: Vec<u8>,
    pub variant: PartitionVariant,
}

/// The in-memory mutation buffer for one (core, schema) pair.
#[derive(Debug, Default)]
pub struct SlotStore {
    partitions: HashMap<u64, PartitionEntry>,
    /// Monotonically grows with buffered state; reset to zero on flush.
    /// Not an exact byte count — see the module-level pressure accounting
    /// notes on each `record_*_pressure` method.
    pressure: usize,
}

impl SlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn pressure(&self) -> usize {
        self.pressure
    }

    /// Swaps in a fresh, empty store and returns the old one — used by the
    /// owning cache at the start of a flush, so the previous contents can
    /// be handed to the flush task while new writes land in `self`.
    pub fn take(&mut self) -> SlotStore {
        std::mem::take(self)
    }

    pub fn partition(&self, h: u64) -> Option<&PartitionEntry> {
        self.partitions.get(&h)
    }

    pub fn partitions(&self) -> impl Iterator<Item = (&u64, &PartitionEntry)> {
        self.partitions.iter()
    }

    /// Inserts `{pkey, empty variant}` for `h` if absent. Returns the entry
    /// and whether it was newly created (the caller logs `CreatePartition`
    /// to the WAL only in that case).
    pub fn get_or_create_partition(
        &mut self,
        h: u64,
        pkey: Vec<u8>,
        has_sort_keys: bool,
    ) -> (&mut PartitionEntry, bool) {
        let mut created = false;
        let entry = self.partitions.entry(h).or_insert_with(|| {
            created = true;
            PartitionEntry {
                pkey,
                variant: if has_sort_keys {
                    PartitionVariant::Ordered(BTreeMap::new())
                } else {
                    PartitionVariant::Single(None)
                },
            }
        });
        (entry, created)
    }

    pub fn find_slot(&self, h: u64, sort_key: &[u8]) -> Option<&Slot> {
        match &self.partitions.get(&h)?.variant {
            PartitionVariant::Single(slot) => slot.as_ref(),
            PartitionVariant::Ordered(map) => map.get(sort_key),
        }
    }

    pub fn find_slot_mut(&mut self, h: u64, sort_key: &[u8]) -> Option<&mut Slot> {
        match &mut self.partitions.get_mut(&h)?.variant {
            PartitionVariant::Single(slot) => slot.as_mut(),
            PartitionVariant::Ordered(map) => map.get_mut(sort_key),
        }
    }

    /// Creates or overwrites the slot at `(h, sort_key)`. The partition must
    /// already exist (via `get_or_create_partition`).
    pub fn create_slot(&mut self, h: u64, sort_key: &[u8], vtype: SlotValueType, bytes: &[u8]) -> &mut Slot {
        let entry = self.partitions.get_mut(&h).expect("partition must exist before create_slot");
        match &mut entry.variant {
            PartitionVariant::Single(slot) => {
                match slot {
                    Some(s) => s.overwrite(vtype, bytes),
                    None => *slot = Some(Slot::new(vtype, bytes)),
                }
                slot.as_mut().unwrap()
            }
            PartitionVariant::Ordered(map) => map
                .entry(sort_key.to_vec())
                .and_modify(|s| s.overwrite(vtype, bytes))
                .or_insert_with(|| Slot::new(vtype, bytes)),
        }
    }

    /// Grows/shrinks an existing slot's backing buffer to `new_size`,
    /// preserving its payload prefix.
    pub fn resize_slot(&mut self, h: u64, sort_key: &[u8], new_size: usize) -> Option<&mut Slot> {
        let slot = self.find_slot_mut(h, sort_key)?;
        slot.resize(new_size);
        Some(slot)
    }

    /// Gathers up to `count` `(sort_key, slot)` pairs in a partition's
    /// sort-key order, starting at `start` (or the partition's minimum when
    /// `start` is `None`).
    pub fn page_from<'a>(&'a self, h: u64, start: Option<&[u8]>, count: usize) -> Vec<(&'a [u8], &'a Slot)> {
        let Some(entry) = self.partitions.get(&h) else {
            return Vec::new();
        };
        match &entry.variant {
            PartitionVariant::Single(slot) => slot.as_ref().map(|s| vec![(&b""[..], s)]).unwrap_or_default(),
            PartitionVariant::Ordered(map) => {
                let iter: Box<dyn Iterator<Item = (&Vec<u8>, &Slot)>> = match start {
                    Some(s) => Box::new(map.range(s.to_vec()..)),
                    None => Box::new(map.iter()),
                };
                iter.take(count).map(|(k, v)| (k.as_slice(), v)).collect()
            }
        }
    }

    // ---- Pressure accounting ----
    //
    // The estimate need not be exact, only monotonically growing with
    // buffered state and reset to zero on flush (spec.md §4.D).

    pub fn record_write_pressure(&mut self, payload_size: usize, sort_key_size: usize) {
        self.pressure += payload_size + sort_key_size + 8;
    }

    pub fn record_reset_pressure(&mut self, default_size: usize) {
        self.pressure += default_size + 8;
    }

    pub fn record_remove_pressure(&mut self) {
        self.pressure += 8;
    }

    pub fn reset_pressure(&mut self) {
        self.pressure = 0;
    }
}

#[cfg(test)]
mod tests;
