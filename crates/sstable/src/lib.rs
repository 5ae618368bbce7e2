//! On-disk segment format for flushed partitions (spec.md §4.B).
//!
//! A segment is a directory `flush/fN/` containing three files written
//! atomically behind a `lock` marker (removed only once all three are
//! durable — the removal is the publish point):
//!
//! ```text
//! flush/fN/
//!   indexer.idx   dense partition index: max_hash, count, {hash, offset}*
//!   filter.blx    flag byte + PK bloom + (optional) one intra bloom per
//!                 sort-keyed partition
//!   data.dat      version header + unary/wide partition blocks, each
//!                 independently zstd-compressed
//! ```
//!
//! Unary partitions (schemas with no sort keys) share blocks keyed by
//! partition hash; wide partitions (schemas with sort keys) get their own
//! section of one or more blocks keyed by sort-key prefix, followed by a
//! footer. Record payload lengths are recovered from neighboring index
//! offsets rather than by schema field-walking, so the reader never needs to
//! know a record's exact encoded size up front.
//!
//! [`merge`] resolves point lookups and range pages across multiple segments,
//! newest-segment-wins with tombstone shadowing.

mod format;
mod merge;
mod reader;
mod writer;

pub use format::{DATA_DAT_VERSION, FILTER_FLAG_PK, FILTER_FLAG_PK_SK};
pub use merge::{lookup as merge_lookup, page_from as merge_page_from};
pub use reader::SegmentReader;
pub use writer::{PartitionData, PartitionRecord, SegmentConfig, SegmentWriter};

#[cfg(test)]
mod tests;
