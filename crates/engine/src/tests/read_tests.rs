use schema::demo::U32SortSchema;

use crate::{FieldBitmap, WriteOp};

use super::helpers::*;

#[test]
fn missing_value_reads_as_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_no_sort(dir.path());
    let (h, _pk) = pkey(b"ghost");
    assert!(!cache.exists(h, b"").unwrap());
}

#[test]
fn value_survives_flush_to_segment() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_no_sort(dir.path());
    let (h, pk) = pkey(b"row");
    cache.write(h, pk, b"", WriteOp::Field { field_id: 0, bytes: &7u64.to_le_bytes() }, 0).unwrap();
    cache.flush().unwrap();
    cache.drain_flushes();

    let mut seen = None;
    cache
        .read(h, b"", FieldBitmap::single(0), |_, bytes| seen = Some(u64::from_le_bytes(bytes.try_into().unwrap())))
        .unwrap();
    assert_eq!(seen, Some(7));
}

#[test]
fn tombstone_in_newer_segment_shadows_older_value() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_no_sort(dir.path());
    let (h, pk) = pkey(b"row");
    cache.write(h, pk, b"", WriteOp::Field { field_id: 0, bytes: &1u64.to_le_bytes() }, 0).unwrap();
    cache.flush().unwrap();
    cache.drain_flushes();

    cache.remove(h, b"", 0).unwrap();
    cache.flush().unwrap();
    cache.drain_flushes();

    assert!(!cache.exists(h, b"").unwrap());
}

#[test]
fn field_sequence_merges_across_live_and_segment_layers() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_no_sort(dir.path());
    let (h, pk) = pkey(b"row");
    cache.write(h, pk.clone(), b"", WriteOp::Field { field_id: 1, bytes: b"older" }, 0).unwrap();
    cache.flush().unwrap();
    cache.drain_flushes();

    cache.write(h, pk, b"", WriteOp::Field { field_id: 0, bytes: &5u64.to_le_bytes() }, 0).unwrap();

    let mut a = None;
    let mut b = None;
    let found = cache
        .read(h, b"", FieldBitmap::none().with(0).with(1), |field_id, bytes| {
            if field_id == 0 {
                a = Some(u64::from_le_bytes(bytes.try_into().unwrap()));
            } else {
                b = Some(bytes.to_vec());
            }
        })
        .unwrap();

    assert!(found);
    assert_eq!(a, Some(5));
    assert_eq!(b, Some(b"older".to_vec()));
}

#[test]
fn page_from_merges_live_and_segment_newest_wins() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_sorted(dir.path());
    let (h, pk) = pkey(b"partition");
    let sk1 = U32SortSchema::encode_sort_key(1);
    let sk2 = U32SortSchema::encode_sort_key(2);

    cache.write(h, pk.clone(), &sk1, WriteOp::Field { field_id: 0, bytes: &1u64.to_le_bytes() }, 0).unwrap();
    cache.write(h, pk.clone(), &sk2, WriteOp::Field { field_id: 0, bytes: &2u64.to_le_bytes() }, 0).unwrap();
    cache.flush().unwrap();
    cache.drain_flushes();

    cache.write(h, pk, &sk2, WriteOp::Field { field_id: 0, bytes: &20u64.to_le_bytes() }, 0).unwrap();

    let page = cache.page(h, 10).unwrap();
    assert_eq!(page.len(), 2);
    let values: Vec<u64> = page.iter().map(|e| u64::from_le_bytes(e.payload[1..9].try_into().unwrap())).collect();
    assert_eq!(values, vec![1, 20]);
}

#[test]
fn page_from_start_key_skips_earlier_entries() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_sorted(dir.path());
    let (h, pk) = pkey(b"partition");
    for v in [1u32, 2, 3] {
        let sk = U32SortSchema::encode_sort_key(v);
        cache.write(h, pk.clone(), &sk, WriteOp::Field { field_id: 0, bytes: &(v as u64).to_le_bytes() }, 0).unwrap();
    }

    let start = U32SortSchema::encode_sort_key(2);
    let page = cache.page_from(h, Some(&start), 10).unwrap();
    let keys: Vec<u32> = page.iter().map(|e| u32::from_be_bytes(e.sort_key.clone().try_into().unwrap())).collect();
    assert_eq!(keys, vec![2, 3]);
}
