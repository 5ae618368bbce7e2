mod merge_tests;
mod reader_tests;

use schema::demo::encode_pkey;
use schema::SlotValueType;
use std::collections::BTreeMap;

use crate::{PartitionData, PartitionRecord, SegmentConfig, SegmentWriter};

pub(crate) fn rec(vtype: SlotValueType, payload: &[u8]) -> PartitionRecord {
    PartitionRecord { vtype, payload: payload.to_vec() }
}

pub(crate) fn small_config() -> SegmentConfig {
    SegmentConfig { block_size: 48, ..SegmentConfig::default() }
}

/// Writes a segment with unary (`NoSortSchema`) partitions `hash -> payload`.
pub(crate) fn write_unary_segment(
    dir: &std::path::Path,
    segment_id: u64,
    schema: &dyn schema::SchemaReflect,
    config: &SegmentConfig,
    entries: &[(u64, &[u8])],
) -> std::path::PathBuf {
    let partitions = entries.iter().map(|(hash, payload)| {
        (*hash, encode_pkey(&hash.to_le_bytes()), PartitionData::Unary(rec(SlotValueType::SchemaInstance, payload)))
    });
    SegmentWriter::write(dir, segment_id, schema, config, partitions).unwrap()
}

/// Writes a segment with one wide (`U32SortSchema`) partition keyed by
/// `hash`, containing `sort_key -> payload` slots.
pub(crate) fn write_wide_segment(
    dir: &std::path::Path,
    segment_id: u64,
    schema: &dyn schema::SchemaReflect,
    config: &SegmentConfig,
    hash: u64,
    slots: &[(Vec<u8>, &[u8])],
) -> std::path::PathBuf {
    let mut map = BTreeMap::new();
    for (sk, payload) in slots {
        map.insert(sk.clone(), rec(SlotValueType::SchemaInstance, payload));
    }
    let partitions = vec![(hash, encode_pkey(&hash.to_le_bytes()), PartitionData::Wide(map))];
    SegmentWriter::write(dir, segment_id, schema, config, partitions).unwrap()
}
