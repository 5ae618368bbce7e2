//! Wire constants, block compression and checksums for the on-disk segment
//! layout (spec.md §4.B): `data.dat`'s header, `filter.blx`'s flag byte, and
//! the adaptive block codec shared by the unary and wide partition layouts.

use anyhow::{anyhow, Result};
use schema::SlotValueType;
use xxhash_rust::xxh3::xxh3_64;

/// `data.dat` header format version.
pub const DATA_DAT_VERSION: u64 = 1;

/// `filter.blx` flag bits: which blooms this segment carries.
pub const FILTER_FLAG_PK: u8 = 0b01;
pub const FILTER_FLAG_PK_SK: u8 = 0b10;

pub fn data_type_byte(vtype: SlotValueType) -> u8 {
    vtype as u8
}

pub fn data_type_from_byte(b: u8) -> Result<SlotValueType> {
    SlotValueType::from_u8(b).ok_or_else(|| anyhow!("unknown DataType byte {b}"))
}

/// 64-bit hash of the concatenation of `{key, value}` bytes fed to the
/// compressor, in writing order (spec.md §4.B's `block_checksum` invariant).
pub fn block_checksum(parts: &[(&[u8], &[u8])]) -> u64 {
    let mut buf = Vec::new();
    for (k, v) in parts {
        buf.extend_from_slice(k);
        buf.extend_from_slice(v);
    }
    xxh3_64(&buf)
}

/// Compresses `raw` with zstd; falls back to the raw bytes (with the
/// `compressed_len == decompressed_len` sentinel) when the compressed form
/// doesn't beat `compression_ratio`.
pub fn compress_adaptive(raw: &[u8], compression_ratio: f64) -> Vec<u8> {
    if raw.is_empty() {
        return Vec::new();
    }
    let compressed = zstd::bulk::compress(raw, 3).unwrap_or_else(|_| raw.to_vec());
    if (compressed.len() as f64) / (raw.len() as f64) >= compression_ratio {
        raw.to_vec()
    } else {
        compressed
    }
}

/// Inverse of [`compress_adaptive`].
pub fn decompress_block(bytes: &[u8], decompressed_len: u32, compressed_len: u32) -> Result<Vec<u8>> {
    if compressed_len == decompressed_len {
        return Ok(bytes.to_vec());
    }
    Ok(zstd::bulk::decompress(bytes, decompressed_len as usize)?)
}
