//! LRU cache of open `SegmentReader`s, keyed by segment id (spec.md §4.D:
//! "a handle cache keeps recently used segment descriptors and mappings
//! open, evicting least-recently-used ones under `max_descriptors` /
//! `max_mappings` pressure").
//!
//! A segment still being written never reaches this cache: `SegmentReader::
//! open` itself refuses a directory that still carries a `lock` file, and
//! `MemoryCache`'s read path only ever probes segment ids below the visible
//! range (`next_segment_id - flush_running`), so an in-flight flush's
//! segment id is never looked up here in the first place.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use sstable::SegmentReader;

pub struct HandleCache {
    capacity: usize,
    open: std::collections::HashMap<u64, Arc<SegmentReader>>,
    /// Most-recently-used at the back.
    recency: VecDeque<u64>,
}

impl HandleCache {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), open: std::collections::HashMap::new(), recency: VecDeque::new() }
    }

    /// Returns the open reader for `segment_id`, opening (and caching) it
    /// on first use. Errors (missing/corrupt directory) are not cached.
    pub fn get_or_open(&mut self, dir: &Path, segment_id: u64) -> Result<Arc<SegmentReader>> {
        if let Some(reader) = self.open.get(&segment_id) {
            self.touch(segment_id);
            return Ok(reader.clone());
        }
        let reader = Arc::new(SegmentReader::open(dir.join(format!("f{segment_id}")))?);
        if self.open.len() >= self.capacity {
            self.evict_lru();
        }
        self.open.insert(segment_id, reader.clone());
        self.recency.push_back(segment_id);
        Ok(reader)
    }

    fn touch(&mut self, segment_id: u64) {
        if let Some(pos) = self.recency.iter().position(|&id| id == segment_id) {
            self.recency.remove(pos);
        }
        self.recency.push_back(segment_id);
    }

    fn evict_lru(&mut self) {
        if let Some(victim) = self.recency.pop_front() {
            self.open.remove(&victim);
        }
    }

    /// Drops a specific segment's handle, e.g. after it's deleted during
    /// recovery cleanup.
    pub fn invalidate(&mut self, segment_id: u64) {
        self.open.remove(&segment_id);
        if let Some(pos) = self.recency.iter().position(|&id| id == segment_id) {
            self.recency.remove(pos);
        }
    }
}
