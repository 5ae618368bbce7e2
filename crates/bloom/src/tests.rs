use super::*;
use std::io::Cursor;

// -------------------- Construction --------------------

#[test]
fn new_creates_valid_filter() {
    let bf = BloomFilter::new(100, 100); // 1%
    assert!(bf.num_bits() > 0);
    assert!(bf.num_hashes() > 0);
    assert!(!bf.bits.is_empty());
}

#[test]
#[should_panic(expected = "expected_items must be > 0")]
fn new_panics_on_zero_items() {
    BloomFilter::new(0, 100);
}

#[test]
#[should_panic(expected = "fp_rate_basis_points must be > 0")]
fn new_panics_on_zero_fpr() {
    BloomFilter::new(100, 0);
}

// -------------------- Insert / Contains --------------------

#[test]
fn inserted_key_is_found() {
    let mut bf = BloomFilter::new(100, 100);
    bf.insert(b"hello");
    assert!(bf.may_contain(b"hello"));
}

#[test]
fn missing_key_is_not_found() {
    let bf = BloomFilter::new(100, 100);
    assert!(!bf.may_contain(b"hello"));
}

#[test]
fn many_keys_all_found() {
    let mut bf = BloomFilter::new(1000, 100);
    for i in 0..1000u64 {
        bf.insert(&i.to_le_bytes());
    }
    for i in 0..1000u64 {
        assert!(
            bf.may_contain(&i.to_le_bytes()),
            "key {} should be found",
            i
        );
    }
}

#[test]
fn u64_convenience_methods_agree_with_byte_methods() {
    let mut bf = BloomFilter::new(100, 100);
    bf.insert_u64(42);
    assert!(bf.may_contain_u64(42));
    assert!(bf.may_contain(&42u64.to_le_bytes()));
}

#[test]
fn false_positive_rate_is_reasonable() {
    let n = 10_000u32;
    let fpr_bp = 100; // 1%
    let mut bf = BloomFilter::new(n, fpr_bp);

    for i in 0..n as u64 {
        bf.insert(&i.to_le_bytes());
    }

    let mut false_positives = 0;
    let test_count = 10_000u64;
    for i in (n as u64)..(n as u64 + test_count) {
        if bf.may_contain(&i.to_le_bytes()) {
            false_positives += 1;
        }
    }

    let actual_fpr = false_positives as f64 / test_count as f64;
    let target_fpr = fpr_bp as f64 / 10_000.0;
    // Allow up to 3x the target FPR (statistical variance)
    assert!(
        actual_fpr < target_fpr * 3.0,
        "FPR too high: {:.4} (target {:.4})",
        actual_fpr,
        target_fpr
    );
}

#[test]
fn empty_key() {
    let mut bf = BloomFilter::new(10, 100);
    bf.insert(b"");
    assert!(bf.may_contain(b""));
}

#[test]
fn binary_key() {
    let mut bf = BloomFilter::new(10, 100);
    let key = vec![0u8, 1, 2, 255, 254, 253];
    bf.insert(&key);
    assert!(bf.may_contain(&key));
}

// -------------------- Serialization --------------------

#[test]
fn roundtrip_serialize_deserialize() {
    let mut bf = BloomFilter::new(500, 100);
    for i in 0..500u64 {
        bf.insert(&i.to_le_bytes());
    }

    let mut buf = Vec::new();
    bf.write_to(&mut buf).unwrap();
    assert_eq!(buf.len(), bf.serialized_size());

    let mut cursor = Cursor::new(&buf);
    let bf2 = BloomFilter::read_from(&mut cursor, buf.len()).unwrap();

    assert_eq!(bf2.num_bits(), bf.num_bits());
    assert_eq!(bf2.num_hashes(), bf.num_hashes());
    assert_eq!(bf2.key_count(), bf.key_count());
    assert_eq!(bf2.fp_rate_basis_points(), bf.fp_rate_basis_points());
    assert_eq!(bf2.bits, bf.bits);

    for i in 0..500u64 {
        assert!(
            bf2.may_contain(&i.to_le_bytes()),
            "key {} missing after roundtrip",
            i
        );
    }
}

#[test]
fn two_filters_built_for_same_n_and_p_serialize_identically() {
    let mut a = BloomFilter::new(500, 100);
    let mut b = BloomFilter::new(500, 100);
    a.insert(b"x");
    b.insert(b"x");
    let mut buf_a = Vec::new();
    let mut buf_b = Vec::new();
    a.write_to(&mut buf_a).unwrap();
    b.write_to(&mut buf_b).unwrap();
    assert_eq!(buf_a, buf_b);
}

#[test]
fn serialized_size_is_correct() {
    let bf = BloomFilter::new(100, 500); // 5%
    // 2 (fp_rate_basis_points) + 4 (key_count) + bits.len()
    assert_eq!(bf.serialized_size(), 6 + bf.bits.len());
}

#[test]
fn deserialize_rejects_oversized_bloom() {
    // key_count large enough that the derived bit array exceeds the 128 MiB cap
    let mut buf = Vec::new();
    buf.extend_from_slice(&100u16.to_le_bytes()); // fp_rate_basis_points = 1%
    buf.extend_from_slice(&2_000_000_000u32.to_le_bytes()); // key_count

    let mut cursor = Cursor::new(&buf);
    let result = BloomFilter::read_from(&mut cursor, buf.len());
    assert!(result.is_err());
}

#[test]
fn deserialize_rejects_truncated_header() {
    let buf = vec![0u8, 1u8, 2u8];
    let mut cursor = Cursor::new(&buf);
    let result = BloomFilter::read_from(&mut cursor, buf.len());
    assert!(result.is_err());
}

#[test]
fn deserialize_rejects_short_bit_array() {
    let bf = BloomFilter::new(500, 100);
    let mut buf = Vec::new();
    bf.write_to(&mut buf).unwrap();
    let truncated = &buf[..buf.len() - 1];
    let mut cursor = Cursor::new(truncated);
    let result = BloomFilter::read_from(&mut cursor, truncated.len());
    assert!(result.is_err());
}

// -------------------- Debug --------------------

#[test]
fn debug_impl_works() {
    let bf = BloomFilter::new(100, 100);
    let debug = format!("{:?}", bf);
    assert!(debug.contains("BloomFilter"));
    assert!(debug.contains("num_bits"));
    assert!(debug.contains("num_hashes"));
}

// -------------------- Edge cases --------------------

#[test]
fn single_item_filter() {
    let mut bf = BloomFilter::new(1, 100);
    bf.insert(b"only");
    assert!(bf.may_contain(b"only"));
}

#[test]
fn very_low_fpr() {
    let bf = BloomFilter::new(100, 1); // 0.01%
    assert!(bf.num_bits() > 1000);
    assert!(bf.num_hashes() > 5);
}

#[test]
fn high_fpr_still_works() {
    let mut bf = BloomFilter::new(100, 5000); // 50%
    bf.insert(b"test");
    assert!(bf.may_contain(b"test"));
}
