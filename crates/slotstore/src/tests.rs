use super::*;
use schema::SlotValueType;

// -------------------- Partition lifecycle --------------------

#[test]
fn get_or_create_partition_reports_creation_once() {
    let mut store = SlotStore::new();
    let (_, created) = store.get_or_create_partition(1, b"pk".to_vec(), false);
    assert!(created);
    let (_, created_again) = store.get_or_create_partition(1, b"pk".to_vec(), false);
    assert!(!created_again);
    assert_eq!(store.len(), 1);
}

#[test]
fn single_variant_chosen_when_schema_has_no_sort_keys() {
    let mut store = SlotStore::new();
    store.get_or_create_partition(1, b"pk".to_vec(), false);
    match &store.partition(1).unwrap().variant {
        PartitionVariant::Single(None) => {}
        other => panic!("expected empty Single variant, got {other:?}"),
    }
}

#[test]
fn ordered_variant_chosen_when_schema_has_sort_keys() {
    let mut store = SlotStore::new();
    store.get_or_create_partition(1, b"pk".to_vec(), true);
    match &store.partition(1).unwrap().variant {
        PartitionVariant::Ordered(map) => assert!(map.is_empty()),
        other => panic!("expected empty Ordered variant, got {other:?}"),
    }
}

// -------------------- create_slot / find_slot --------------------

#[test]
fn create_and_find_slot_single_variant() {
    let mut store = SlotStore::new();
    store.get_or_create_partition(1, b"pk".to_vec(), false);
    store.create_slot(1, b"", SlotValueType::SchemaInstance, b"hello");
    let slot = store.find_slot(1, b"").unwrap();
    assert_eq!(slot.buffer, b"hello".to_vec());
    assert_eq!(slot.vtype, SlotValueType::SchemaInstance);
}

#[test]
fn create_and_find_slot_ordered_variant() {
    let mut store = SlotStore::new();
    store.get_or_create_partition(1, b"pk".to_vec(), true);
    store.create_slot(1, b"a", SlotValueType::FieldSequence, b"va");
    store.create_slot(1, b"b", SlotValueType::FieldSequence, b"vb");

    assert_eq!(store.find_slot(1, b"a").unwrap().buffer, b"va".to_vec());
    assert_eq!(store.find_slot(1, b"b").unwrap().buffer, b"vb".to_vec());
    assert!(store.find_slot(1, b"c").is_none());
}

#[test]
fn create_slot_overwrites_in_place_when_capacity_suffices() {
    let mut store = SlotStore::new();
    store.get_or_create_partition(1, b"pk".to_vec(), false);
    store.create_slot(1, b"", SlotValueType::SchemaInstance, b"0123456789");
    let cap_before = store.find_slot(1, b"").unwrap().buffer.capacity();

    store.create_slot(1, b"", SlotValueType::SchemaInstance, b"short");
    let slot = store.find_slot(1, b"").unwrap();
    assert_eq!(slot.buffer, b"short".to_vec());
    assert_eq!(slot.buffer.capacity(), cap_before, "overwrite should reuse the existing allocation");
}

#[test]
fn create_slot_reallocates_when_capacity_insufficient() {
    let mut store = SlotStore::new();
    store.get_or_create_partition(1, b"pk".to_vec(), false);
    store.create_slot(1, b"", SlotValueType::SchemaInstance, b"ab");
    store.create_slot(1, b"", SlotValueType::SchemaInstance, b"a much longer payload than before");
    let slot = store.find_slot(1, b"").unwrap();
    assert_eq!(slot.buffer, b"a much longer payload than before".to_vec());
}

#[test]
fn create_slot_updates_vtype_on_overwrite() {
    let mut store = SlotStore::new();
    store.get_or_create_partition(1, b"pk".to_vec(), false);
    store.create_slot(1, b"", SlotValueType::FieldSequence, b"x");
    store.create_slot(1, b"", SlotValueType::Tombstone, b"");
    assert_eq!(store.find_slot(1, b"").unwrap().vtype, SlotValueType::Tombstone);
}

// -------------------- resize_slot --------------------

#[test]
fn resize_slot_preserves_payload_prefix_when_growing() {
    let mut store = SlotStore::new();
    store.get_or_create_partition(1, b"pk".to_vec(), false);
    store.create_slot(1, b"", SlotValueType::SchemaInstance, b"abc");
    store.resize_slot(1, b"", 6).unwrap();
    let slot = store.find_slot(1, b"").unwrap();
    assert_eq!(&slot.buffer[..3], b"abc");
    assert_eq!(slot.buffer.len(), 6);
}

#[test]
fn resize_slot_on_missing_slot_returns_none() {
    let mut store = SlotStore::new();
    store.get_or_create_partition(1, b"pk".to_vec(), true);
    assert!(store.resize_slot(1, b"missing", 10).is_none());
}

// -------------------- page_from --------------------

#[test]
fn page_from_returns_entries_in_sort_key_order() {
    let mut store = SlotStore::new();
    store.get_or_create_partition(1, b"pk".to_vec(), true);
    store.create_slot(1, b"c", SlotValueType::FieldSequence, b"3");
    store.create_slot(1, b"a", SlotValueType::FieldSequence, b"1");
    store.create_slot(1, b"b", SlotValueType::FieldSequence, b"2");

    let page = store.page_from(1, None, 10);
    let keys: Vec<&[u8]> = page.iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
}

#[test]
fn page_from_respects_start_and_count() {
    let mut store = SlotStore::new();
    store.get_or_create_partition(1, b"pk".to_vec(), true);
    for k in ["a", "b", "c", "d"] {
        store.create_slot(1, k.as_bytes(), SlotValueType::FieldSequence, b"v");
    }

    let page = store.page_from(1, Some(b"b"), 2);
    let keys: Vec<&[u8]> = page.iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, vec![b"b".as_slice(), b"c".as_slice()]);
}

#[test]
fn page_from_single_variant_yields_at_most_one_entry() {
    let mut store = SlotStore::new();
    store.get_or_create_partition(1, b"pk".to_vec(), false);
    store.create_slot(1, b"", SlotValueType::SchemaInstance, b"only");
    assert_eq!(store.page_from(1, None, 10).len(), 1);
}

#[test]
fn page_from_missing_partition_is_empty() {
    let store = SlotStore::new();
    assert!(store.page_from(42, None, 10).is_empty());
}

// -------------------- Pressure accounting --------------------

#[test]
fn pressure_grows_monotonically_and_resets_on_flush() {
    let mut store = SlotStore::new();
    assert_eq!(store.pressure(), 0);
    store.record_write_pressure(100, 4);
    let after_one = store.pressure();
    assert!(after_one > 0);
    store.record_write_pressure(50, 4);
    assert!(store.pressure() > after_one);

    store.reset_pressure();
    assert_eq!(store.pressure(), 0);
}

#[test]
fn remove_and_reset_pressure_are_nonzero() {
    let mut store = SlotStore::new();
    store.record_remove_pressure();
    assert!(store.pressure() > 0);
    store.reset_pressure();
    store.record_reset_pressure(12);
    assert!(store.pressure() > 0);
}

// -------------------- take (flush swap) --------------------

#[test]
fn take_returns_old_store_and_leaves_a_fresh_empty_one() {
    let mut store = SlotStore::new();
    store.get_or_create_partition(1, b"pk".to_vec(), false);
    store.create_slot(1, b"", SlotValueType::SchemaInstance, b"v");
    store.record_write_pressure(1, 0);

    let old = store.take();
    assert_eq!(old.len(), 1);
    assert!(old.pressure() > 0);
    assert!(store.is_empty());
    assert_eq!(store.pressure(), 0);
}
