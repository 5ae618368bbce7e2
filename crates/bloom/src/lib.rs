///! # Bloom Filter
///!
///! A space-efficient probabilistic data structure for set membership testing.
///!
///! A bloom filter can tell you with certainty that a key is **not** in the set
///! (no false negatives), but may occasionally report that a key **is** in the
///! set when it isn't (false positives). The false positive rate depends on the
///! number of bits and hash functions used, both derived from the expected key
///! count rather than stored explicitly.
///!
///! ## Usage
///!
///! A partition-level filter and an intra-partition (partition key + sort key)
///! filter are embedded per on-disk segment. Point lookups check the relevant
///! filter first -- if it says "not present", the segment is skipped entirely,
///! avoiding a sparse-index probe and the disk read that would follow it.
///!
///! ## Example
///!
///! ```rust,no_run
///! use bloom::BloomFilter;
///!
///! let mut bf = BloomFilter::new(1000, 100); // 1% false-positive rate
///! bf.insert(b"hello");
///! assert!(bf.may_contain(b"hello"));
///! ```
use std::io::{self, Read, Write};
use xxhash_rust::xxh3::xxh3_64_with_seed;

const SEED_1: u64 = 0x9E37_79B9_7F4A_7C15;
const SEED_2: u64 = 0xC2B2_AE3D_27D4_EB4F;

/// A bloom filter backed by a bit vector with `k` independent hash functions.
///
/// Uses double hashing: `h(i) = h1 + i * h2` where `h1` and `h2` are xxh3_64
/// of the key under two different seeds.
///
/// `num_bits` and `num_hashes` are not part of the serialized form -- they are
/// re-derived from `key_count` and `fp_rate_basis_points` on read, so two
/// filters built for the same (n, p) always serialize to the same bytes.
pub struct BloomFilter {
    /// The bit vector storing the filter state.
    bits: Vec<u8>,
    /// Number of bits in the filter.
    num_bits: u64,
    /// Number of hash functions (k).
    num_hashes: u32,
    /// Expected key count this filter was sized for.
    key_count: u32,
    /// Target false-positive rate, in basis points (100 == 1%).
    fp_rate_basis_points: u16,
}

impl BloomFilter {
    /// Creates a new bloom filter sized for `expected_items` with the given
    /// target false-positive rate expressed in basis points.
    ///
    /// # Panics
    ///
    /// Panics if `expected_items` is 0 or `fp_rate_basis_points` is 0.
    pub fn new(expected_items: u32, fp_rate_basis_points: u16) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(fp_rate_basis_points > 0, "fp_rate_basis_points must be > 0");

        let (num_bits, num_hashes) = bits_and_hashes(expected_items, fp_rate_basis_points);
        let byte_len = bits_len_bytes(num_bits);

        Self {
            bits: vec![0u8; byte_len],
            num_bits,
            num_hashes,
            key_count: expected_items,
            fp_rate_basis_points,
        }
    }

    /// Creates a bloom filter from raw parts (used during deserialization).
    fn from_raw(
        bits: Vec<u8>,
        num_bits: u64,
        num_hashes: u32,
        key_count: u32,
        fp_rate_basis_points: u16,
    ) -> Self {
        Self {
            bits,
            num_bits,
            num_hashes,
            key_count,
            fp_rate_basis_points,
        }
    }

    /// Inserts a key into the bloom filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = self.hash_pair(key);
        for i in 0..self.num_hashes {
            let bit_idx = self.get_bit_index(h1, h2, i);
            self.set_bit(bit_idx);
        }
    }

    /// Convenience insert for the partition-hash keyspace.
    pub fn insert_u64(&mut self, key: u64) {
        self.insert(&key.to_le_bytes());
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not** in the set.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = self.hash_pair(key);
        for i in 0..self.num_hashes {
            let bit_idx = self.get_bit_index(h1, h2, i);
            if !self.get_bit(bit_idx) {
                return false;
            }
        }
        true
    }

    /// Convenience lookup for the partition-hash keyspace.
    #[must_use]
    pub fn may_contain_u64(&self, key: u64) -> bool {
        self.may_contain(&key.to_le_bytes())
    }

    /// Returns the number of bits in the filter.
    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Returns the number of hash functions.
    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Returns the expected key count this filter was built for.
    #[must_use]
    pub fn key_count(&self) -> u32 {
        self.key_count
    }

    /// Returns the target false-positive rate, in basis points.
    #[must_use]
    pub fn fp_rate_basis_points(&self) -> u16 {
        self.fp_rate_basis_points
    }

    /// Returns the size of the serialized bloom filter in bytes.
    ///
    /// Layout: `fp_rate_basis_points(u16) + key_count(u32) + bits`.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        2 + 4 + self.bits.len()
    }

    /// Serializes the bloom filter to a writer.
    ///
    /// Wire format (all little-endian):
    /// ```text
    /// [fp_rate_basis_points: u16][key_count: u32][bits: bytes]
    /// ```
    /// `num_bits` and `num_hashes` are intentionally absent -- both follow
    /// deterministically from the two stored fields.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.fp_rate_basis_points.to_le_bytes())?;
        w.write_all(&self.key_count.to_le_bytes())?;
        w.write_all(&self.bits)?;
        Ok(())
    }

    /// Deserializes a bloom filter from a reader. `total_len` is the number
    /// of bytes the caller has available for this filter (e.g. the span
    /// reserved for it in `filter.blx`), used to bound the bit-array read.
    pub fn read_from<R: Read>(r: &mut R, total_len: usize) -> io::Result<Self> {
        if total_len < 6 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "bloom filter header truncated"));
        }
        let mut buf2 = [0u8; 2];
        let mut buf4 = [0u8; 4];

        r.read_exact(&mut buf2)?;
        let fp_rate_basis_points = u16::from_le_bytes(buf2);

        r.read_exact(&mut buf4)?;
        let key_count = u32::from_le_bytes(buf4);

        let (num_bits, num_hashes) = bits_and_hashes(key_count, fp_rate_basis_points);
        let expected_bits_len = bits_len_bytes(num_bits);

        // Safety cap: bloom filter should not exceed 128 MiB
        const MAX_BLOOM_BYTES: usize = 128 * 1024 * 1024;
        if expected_bits_len > MAX_BLOOM_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bloom filter too large: {} bytes", expected_bits_len),
            ));
        }
        if total_len - 6 < expected_bits_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "bloom filter buffer shorter than its derived bit array",
            ));
        }

        let mut bits = vec![0u8; expected_bits_len];
        r.read_exact(&mut bits)?;

        Ok(Self::from_raw(bits, num_bits, num_hashes, key_count, fp_rate_basis_points))
    }

    // ---- Internal helpers ----

    /// Computes two independent 64-bit hashes using xxh3 with different seeds.
    fn hash_pair(&self, key: &[u8]) -> (u64, u64) {
        let h1 = xxh3_64_with_seed(key, SEED_1);
        let h2 = xxh3_64_with_seed(key, SEED_2);
        (h1, h2)
    }

    /// Double hashing: h(i) = (h1 + i * h2) mod num_bits.
    fn get_bit_index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }

    fn set_bit(&mut self, idx: u64) {
        let byte_idx = (idx / 8) as usize;
        let bit_offset = (idx % 8) as u8;
        self.bits[byte_idx] |= 1 << bit_offset;
    }

    fn get_bit(&self, idx: u64) -> bool {
        let byte_idx = (idx / 8) as usize;
        let bit_offset = (idx % 8) as u8;
        (self.bits[byte_idx] >> bit_offset) & 1 == 1
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("key_count", &self.key_count)
            .field("fp_rate_basis_points", &self.fp_rate_basis_points)
            .field("bytes", &self.bits.len())
            .finish()
    }
}

/// `m = ceil(-n * ln(p) / ln(2)^2)`, `k = max(1, round(m * ln(2) / n))`.
///
/// `n` is floored at 1 so a filter built for zero expected keys still gets a
/// minimal, well-defined bit array instead of dividing by zero.
fn bits_and_hashes(expected_items: u32, fp_rate_basis_points: u16) -> (u64, u32) {
    let n = (expected_items.max(1)) as f64;
    let p = (fp_rate_basis_points.max(1) as f64 / 10_000.0).min(0.9999);
    let ln2 = std::f64::consts::LN_2;

    let m = (-n * p.ln() / (ln2 * ln2)).ceil() as u64;
    let m = m.max(8);

    let k = ((m as f64 / n) * ln2).round() as u32;
    let k = k.max(1);

    (m, k)
}

fn bits_len_bytes(num_bits: u64) -> usize {
    ((num_bits + 7) / 8) as usize
}

#[cfg(test)]
mod tests;
