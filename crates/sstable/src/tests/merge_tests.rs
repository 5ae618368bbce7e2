use schema::demo::U32SortSchema;
use schema::{SchemaReflect, SlotValueType};
use std::sync::Arc;
use tempfile::tempdir;

use super::{small_config, write_wide_segment};
use crate::{merge_lookup, merge_page_from, SegmentReader};

fn open_newest_first(dirs: &[std::path::PathBuf]) -> Vec<SegmentReader> {
    dirs.iter().rev().map(|d| SegmentReader::open(d).unwrap()).collect()
}

#[test]
fn merge_lookup_prefers_newest_segment() {
    let dir = tempdir().unwrap();
    let schema = U32SortSchema::new(2);
    let sk = U32SortSchema::encode_sort_key(1);

    let seg0 = write_wide_segment(dir.path(), 0, &schema, &small_config(), 5, &[(sk.clone(), b"old")]);
    let seg1 = write_wide_segment(dir.path(), 1, &schema, &small_config(), 5, &[(sk.clone(), b"new")]);

    let segments = open_newest_first(&[seg0, seg1]);
    let schema: Arc<dyn SchemaReflect> = Arc::new(U32SortSchema::new(2));

    let got = merge_lookup(&schema, &segments, 5, Some(&sk)).unwrap().unwrap();
    assert_eq!(got.payload, b"new");
}

#[test]
fn merge_lookup_hides_value_shadowed_by_a_newer_tombstone() {
    let dir = tempdir().unwrap();
    let schema = U32SortSchema::new(2);
    let sk = U32SortSchema::encode_sort_key(1);

    let seg0 = write_wide_segment(dir.path(), 0, &schema, &small_config(), 5, &[(sk.clone(), b"old")]);
    let seg1_dir = dir.path();
    let mut map = std::collections::BTreeMap::new();
    map.insert(sk.clone(), super::rec(SlotValueType::Tombstone, b""));
    let seg1 = crate::SegmentWriter::write(
        seg1_dir,
        1,
        &schema,
        &small_config(),
        vec![(5u64, schema::demo::encode_pkey(&5u64.to_le_bytes()), crate::PartitionData::Wide(map))],
    )
    .unwrap();

    let segments = open_newest_first(&[seg0, seg1]);
    let schema: Arc<dyn SchemaReflect> = Arc::new(U32SortSchema::new(2));

    assert!(merge_lookup(&schema, &segments, 5, Some(&sk)).unwrap().is_none());
}

#[test]
fn merge_page_from_dedups_and_orders_across_segments() {
    let dir = tempdir().unwrap();
    let schema = U32SortSchema::new(2);

    let seg0 = write_wide_segment(
        dir.path(),
        0,
        &schema,
        &small_config(),
        5,
        &[(U32SortSchema::encode_sort_key(1), b"a"), (U32SortSchema::encode_sort_key(3), b"c")],
    );
    let seg1 = write_wide_segment(
        dir.path(),
        1,
        &schema,
        &small_config(),
        5,
        &[(U32SortSchema::encode_sort_key(2), b"b"), (U32SortSchema::encode_sort_key(3), b"c-new")],
    );

    let segments = open_newest_first(&[seg0, seg1]);
    let schema: Arc<dyn SchemaReflect> = Arc::new(U32SortSchema::new(2));

    let page = merge_page_from(&schema, &segments, 5, None, 10).unwrap();
    let keys: Vec<u32> = page.iter().map(|(k, _)| u32::from_be_bytes(k.as_slice().try_into().unwrap())).collect();
    assert_eq!(keys, vec![1, 2, 3]);
    let three = page.iter().find(|(k, _)| k == &U32SortSchema::encode_sort_key(3)).unwrap();
    assert_eq!(three.1.payload, b"c-new");
}
