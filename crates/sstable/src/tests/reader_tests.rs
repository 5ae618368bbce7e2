use schema::demo::{NoSortSchema, U32SortSchema};
use schema::SchemaReflect;
use std::sync::Arc;
use tempfile::tempdir;

use super::{small_config, write_unary_segment, write_wide_segment};
use crate::SegmentReader;

#[test]
fn lookup_finds_unary_partitions_by_hash() {
    let dir = tempdir().unwrap();
    let schema = NoSortSchema::new(1);
    let seg_dir = write_unary_segment(dir.path(), 0, &schema, &small_config(), &[(10, b"aaa"), (20, b"bbb"), (30, b"ccc")]);

    let reader = SegmentReader::open(&seg_dir).unwrap();
    let schema: Arc<dyn SchemaReflect> = Arc::new(NoSortSchema::new(1));

    let got = reader.lookup(&schema, 20, None).unwrap().unwrap();
    assert_eq!(got.payload, b"bbb");

    assert!(reader.lookup(&schema, 99, None).unwrap().is_none());
}

#[test]
fn may_contain_partition_rejects_absent_hashes() {
    let dir = tempdir().unwrap();
    let schema = NoSortSchema::new(1);
    let seg_dir = write_unary_segment(dir.path(), 0, &schema, &small_config(), &[(10, b"aaa")]);
    let reader = SegmentReader::open(&seg_dir).unwrap();
    assert!(reader.may_contain_partition(10));
    // A bloom filter can false-positive but never false-negative.
    if !reader.may_contain_partition(999) {
        assert!(reader.lookup(&Arc::new(NoSortSchema::new(1)), 999, None).unwrap().is_none());
    }
}

#[test]
fn lookup_finds_wide_partition_slots_by_sort_key() {
    let dir = tempdir().unwrap();
    let schema = U32SortSchema::new(2);
    let slots: Vec<(Vec<u8>, &[u8])> = vec![
        (U32SortSchema::encode_sort_key(1), b"one".as_slice()),
        (U32SortSchema::encode_sort_key(2), b"two".as_slice()),
        (U32SortSchema::encode_sort_key(3), b"three".as_slice()),
    ];
    let seg_dir = write_wide_segment(dir.path(), 0, &schema, &small_config(), 77, &slots);

    let reader = SegmentReader::open(&seg_dir).unwrap();
    let schema: Arc<dyn SchemaReflect> = Arc::new(U32SortSchema::new(2));

    let sk2 = U32SortSchema::encode_sort_key(2);
    let got = reader.lookup(&schema, 77, Some(&sk2)).unwrap().unwrap();
    assert_eq!(got.payload, b"two");

    let missing = U32SortSchema::encode_sort_key(4);
    assert!(reader.lookup(&schema, 77, Some(&missing)).unwrap().is_none());
}

#[test]
fn page_from_yields_ascending_sort_key_order() {
    let dir = tempdir().unwrap();
    let schema = U32SortSchema::new(2);
    let slots: Vec<(Vec<u8>, &[u8])> = vec![
        (U32SortSchema::encode_sort_key(3), b"three".as_slice()),
        (U32SortSchema::encode_sort_key(1), b"one".as_slice()),
        (U32SortSchema::encode_sort_key(2), b"two".as_slice()),
    ];
    let seg_dir = write_wide_segment(dir.path(), 0, &schema, &small_config(), 5, &slots);

    let reader = SegmentReader::open(&seg_dir).unwrap();
    let schema: Arc<dyn SchemaReflect> = Arc::new(U32SortSchema::new(2));

    let page = reader.page_from(&schema, 5, None, 10).unwrap();
    let keys: Vec<u32> = page.iter().map(|(k, _)| u32::from_be_bytes(k.as_slice().try_into().unwrap())).collect();
    assert_eq!(keys, vec![1, 2, 3]);
}

#[test]
fn page_from_respects_start_and_count() {
    let dir = tempdir().unwrap();
    let schema = U32SortSchema::new(2);
    let slots: Vec<(Vec<u8>, &[u8])> = (0u32..8).map(|i| (U32SortSchema::encode_sort_key(i), b"x".as_slice())).collect();
    let seg_dir = write_wide_segment(dir.path(), 0, &schema, &small_config(), 5, &slots);

    let reader = SegmentReader::open(&seg_dir).unwrap();
    let schema: Arc<dyn SchemaReflect> = Arc::new(U32SortSchema::new(2));

    let start = U32SortSchema::encode_sort_key(3);
    let page = reader.page_from(&schema, 5, Some(&start), 2).unwrap();
    let keys: Vec<u32> = page.iter().map(|(k, _)| u32::from_be_bytes(k.as_slice().try_into().unwrap())).collect();
    assert_eq!(keys, vec![3, 4]);
}

#[test]
fn lookup_finds_keys_in_every_block_of_a_multi_block_partition() {
    let dir = tempdir().unwrap();
    let schema = U32SortSchema::new(2);
    // `small_config()`'s 48-byte blocks force this partition across several
    // blocks, so a hit on every key exercises the sparse block index's
    // binary search rather than just the first (or only) block.
    let slots: Vec<(Vec<u8>, &[u8])> = (0u32..20).map(|i| (U32SortSchema::encode_sort_key(i), b"0123456789".as_slice())).collect();
    let seg_dir = write_wide_segment(dir.path(), 0, &schema, &small_config(), 42, &slots);

    let reader = SegmentReader::open(&seg_dir).unwrap();
    let schema: Arc<dyn SchemaReflect> = Arc::new(U32SortSchema::new(2));

    for i in 0u32..20 {
        let sk = U32SortSchema::encode_sort_key(i);
        let got = reader.lookup(&schema, 42, Some(&sk)).unwrap().unwrap();
        assert_eq!(got.payload, b"0123456789");
    }

    let missing = U32SortSchema::encode_sort_key(999);
    assert!(reader.lookup(&schema, 42, Some(&missing)).unwrap().is_none());
}

#[test]
fn open_rejects_segment_left_with_a_lock_file() {
    let dir = tempdir().unwrap();
    let schema = NoSortSchema::new(1);
    let seg_dir = write_unary_segment(dir.path(), 0, &schema, &small_config(), &[(10, b"aaa")]);
    std::fs::File::create(seg_dir.join("lock")).unwrap();
    assert!(SegmentReader::open(&seg_dir).is_err());
}
