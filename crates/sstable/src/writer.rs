//! Builds a segment directory (`flush/fN/`) from a sorted partition stream.
//!
//! Mirrors the teacher's atomic write discipline (write everything under a
//! name the reader won't look at until it's complete, `fsync`, then publish)
//! but adapted to spec.md's `lock`-file protocol: the segment directory is
//! created and populated with `lock` present first; `lock` is removed only
//! once `data.dat`/`indexer.idx`/`filter.blx` are durably on disk, and that
//! removal is the publish point. Recovery (in `engine`) deletes any `fN/`
//! still carrying `lock`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use mapper::{Mapper, OpenFlags, WriteData};
use schema::{SchemaReflect, SlotValueType};

use bloom::BloomFilter;

use crate::format::{
    block_checksum, compress_adaptive, data_type_byte, DATA_DAT_VERSION, FILTER_FLAG_PK, FILTER_FLAG_PK_SK,
};

/// One slot's value, decoupled from `slotstore::Slot` so this crate doesn't
/// need to depend on it — `engine` adapts at flush time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    pub vtype: SlotValueType,
    pub payload: Vec<u8>,
}

/// A partition's buffered contents, shaped like `slotstore::PartitionVariant`
/// but using the empty sort key for the unary case's one record.
#[derive(Debug, Clone)]
pub enum PartitionData {
    Unary(PartitionRecord),
    Wide(BTreeMap<Vec<u8>, PartitionRecord>),
}

/// Tunables mirrored from `cache.*` config (spec.md §6).
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    pub block_size: u64,
    pub block_sparse_index_ratio: u64,
    pub partition_sparse_index_ratio: u64,
    pub partition_bloom_fp_rate_bp: u16,
    pub intra_partition_bloom_fp_rate_bp: u16,
    pub compression_ratio: f64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            block_size: 32 * 1024,
            block_sparse_index_ratio: 1,
            partition_sparse_index_ratio: 1,
            partition_bloom_fp_rate_bp: 100,
            intra_partition_bloom_fp_rate_bp: 100,
            compression_ratio: 0.9,
        }
    }
}

pub struct SegmentWriter;

/// One finished, compressed block plus the index entries needed by its
/// owner (the unary stream or a single wide partition).
struct Block {
    checksum: u64,
    /// `(key_bytes, offset_in_block)` in ascending order.
    index: Vec<(Vec<u8>, u64)>,
    decompressed_len: u32,
    compressed: Vec<u8>,
}

fn build_block(records: &[(Vec<u8>, SlotValueType, Vec<u8>)], compression_ratio: f64) -> Block {
    let mut body = Vec::new();
    let mut index = Vec::with_capacity(records.len());
    for (key, vtype, payload) in records {
        index.push((key.clone(), body.len() as u64));
        body.push(data_type_byte(*vtype));
        body.extend_from_slice(payload);
    }
    let checksum_parts: Vec<(&[u8], &[u8])> =
        records.iter().map(|(k, _, p)| (k.as_slice(), p.as_slice())).collect();
    let checksum = block_checksum(&checksum_parts);
    let decompressed_len = body.len() as u32;
    let compressed = compress_adaptive(&body, compression_ratio);
    Block { checksum, index, decompressed_len, compressed }
}

#[derive(Clone, Copy)]
enum KeyOffsetWidth {
    U32,
    U64,
}

/// Splits `sorted` (already in key order) into one or more blocks, each
/// targeting `block_size` uncompressed bytes, appending the encoded form of
/// each block to `out`. Returns `(first_key_of_block, absolute_offset)` for
/// every block appended, in order.
fn write_blocks(
    out: &mut Vec<u8>,
    sorted: &[(Vec<u8>, SlotValueType, Vec<u8>)],
    block_size: u64,
    compression_ratio: f64,
    key_offset_width: KeyOffsetWidth,
) -> Vec<(Vec<u8>, u64)> {
    let mut footer_rows = Vec::new();
    let mut start = 0usize;
    while start < sorted.len() {
        let mut end = start + 1;
        let mut running = sorted[start].2.len() + sorted[start].0.len() + 1;
        while end < sorted.len() && (running as u64) < block_size {
            running += sorted[end].2.len() + sorted[end].0.len() + 1;
            end += 1;
        }
        let chunk = &sorted[start..end];
        let block = build_block(chunk, compression_ratio);
        let abs_offset = out.len() as u64;
        footer_rows.push((chunk[0].0.clone(), abs_offset));
        out.write_u64::<LittleEndian>(block.checksum).unwrap();
        out.write_u32::<LittleEndian>(block.index.len() as u32).unwrap();
        for (key, offset_in_block) in &block.index {
            out.extend_from_slice(key);
            match key_offset_width {
                KeyOffsetWidth::U32 => out.write_u32::<LittleEndian>(*offset_in_block as u32).unwrap(),
                KeyOffsetWidth::U64 => out.write_u64::<LittleEndian>(*offset_in_block).unwrap(),
            }
        }
        out.write_u32::<LittleEndian>(block.decompressed_len).unwrap();
        out.write_u32::<LittleEndian>(block.compressed.len() as u32).unwrap();
        out.extend_from_slice(&block.compressed);
        start = end;
    }
    footer_rows
}

fn block_count(sorted: &[(Vec<u8>, SlotValueType, Vec<u8>)], block_size: u64) -> usize {
    let mut count = 0;
    let mut start = 0usize;
    while start < sorted.len() {
        let mut end = start + 1;
        let mut running = sorted[start].2.len() + sorted[start].0.len() + 1;
        while end < sorted.len() && (running as u64) < block_size {
            running += sorted[end].2.len() + sorted[end].0.len() + 1;
            end += 1;
        }
        count += 1;
        start = end;
    }
    count
}

impl SegmentWriter {
    /// Writes a complete segment directory under `dir` named `fN` where
    /// `N = segment_id`. `partitions` must already be in ascending
    /// `partition_hash` order (spec.md's strictly-increasing indexer
    /// invariant) — the flush path sorts the slot store's `HashMap` before
    /// calling this.
    pub fn write<I>(
        dir: &Path,
        segment_id: u64,
        schema: &dyn SchemaReflect,
        config: &SegmentConfig,
        partitions: I,
    ) -> Result<PathBuf>
    where
        I: IntoIterator<Item = (u64, Vec<u8>, PartitionData)>,
    {
        let segment_dir = dir.join(format!("f{segment_id}"));
        fs::create_dir_all(&segment_dir)?;
        let lock_path = segment_dir.join("lock");
        fs::File::create(&lock_path)?;

        let mut data_buf = Vec::new();
        data_buf.write_u64::<LittleEndian>(DATA_DAT_VERSION).unwrap();
        data_buf.write_u64::<LittleEndian>(config.block_sparse_index_ratio).unwrap();
        data_buf.write_u64::<LittleEndian>(config.partition_sparse_index_ratio).unwrap();
        data_buf.write_u64::<LittleEndian>(config.block_size).unwrap();

        let mut indexer_rows: Vec<(u64, u64)> = Vec::new();
        let mut pk_hashes: Vec<u64> = Vec::new();
        // (patch position in data_buf, the partition's intra-key bloom)
        let mut intra_blooms: Vec<(usize, BloomFilter)> = Vec::new();

        if !schema.has_sort_keys() {
            let mut entries: Vec<(u64, Vec<u8>, SlotValueType, Vec<u8>)> = Vec::new();
            for (hash, _pkey, data) in partitions {
                let PartitionData::Unary(rec) = data else {
                    bail!("schema has no sort keys but a Wide partition was supplied");
                };
                pk_hashes.push(hash);
                entries.push((hash, hash.to_le_bytes().to_vec(), rec.vtype, rec.payload));
            }
            let as_records: Vec<(Vec<u8>, SlotValueType, Vec<u8>)> =
                entries.iter().map(|(_, k, v, p)| (k.clone(), *v, p.clone())).collect();
            let footer_rows =
                write_blocks(&mut data_buf, &as_records, config.block_size, config.compression_ratio, KeyOffsetWidth::U64);

            // Every partition in a block shares that block's absolute offset.
            let mut block_iter = footer_rows.into_iter().peekable();
            let mut current_offset = 0u64;
            for (hash, key, _, _) in &entries {
                while let Some((next_key, next_offset)) = block_iter.peek() {
                    if next_key.as_slice() <= key.as_slice() {
                        current_offset = *next_offset;
                        block_iter.next();
                    } else {
                        break;
                    }
                }
                indexer_rows.push((*hash, current_offset));
            }
        } else {
            for (hash, pkey, data) in partitions {
                let PartitionData::Wide(map) = data else {
                    bail!("schema has sort keys but a Unary partition was supplied");
                };
                ensure!(schema.sort_key_is_static(), "dynamic-length sort keys are not supported by this writer");
                pk_hashes.push(hash);

                let partition_start = data_buf.len();
                indexer_rows.push((hash, partition_start as u64));
                data_buf.write_u64::<LittleEndian>(0).unwrap(); // partition_size placeholder
                let content_start = data_buf.len();
                data_buf.extend_from_slice(&pkey);

                let sorted: Vec<(Vec<u8>, SlotValueType, Vec<u8>)> =
                    map.into_iter().map(|(k, v)| (k, v.vtype, v.payload)).collect();
                data_buf.write_u32::<LittleEndian>(block_count(&sorted, config.block_size) as u32).unwrap();
                let footer_offset_patch_pos = data_buf.len();
                data_buf.write_u64::<LittleEndian>(0).unwrap(); // footer_offset placeholder
                let footer_rows =
                    write_blocks(&mut data_buf, &sorted, config.block_size, config.compression_ratio, KeyOffsetWidth::U32);

                let footer_offset = data_buf.len() as u64;
                data_buf[footer_offset_patch_pos..footer_offset_patch_pos + 8].copy_from_slice(&footer_offset.to_le_bytes());

                // Partition footer.
                let sort_bloom_patch_pos = data_buf.len() + 4;
                data_buf.write_u32::<LittleEndian>(footer_rows.len() as u32).unwrap();
                data_buf.write_u64::<LittleEndian>(0).unwrap(); // sort_bloom_offset placeholder
                for (key, abs_offset) in &footer_rows {
                    data_buf.extend_from_slice(key);
                    data_buf.write_u64::<LittleEndian>(*abs_offset).unwrap();
                }

                let partition_size = (data_buf.len() - content_start) as u64;
                data_buf[partition_start..partition_start + 8].copy_from_slice(&partition_size.to_le_bytes());

                if !sorted.is_empty() {
                    let mut bloom = BloomFilter::new(sorted.len() as u32, config.intra_partition_bloom_fp_rate_bp);
                    for (key, _, _) in &sorted {
                        bloom.insert(key);
                    }
                    intra_blooms.push((sort_bloom_patch_pos, bloom));
                }
            }
        }

        // filter.blx: PK bloom, then every partition's intra bloom, patching
        // each partition footer's placeholder with its absolute offset.
        let mut filter_buf = Vec::new();
        let flag = if intra_blooms.is_empty() { FILTER_FLAG_PK } else { FILTER_FLAG_PK | FILTER_FLAG_PK_SK };
        filter_buf.push(flag);
        let mut pk_bloom = BloomFilter::new(pk_hashes.len().max(1) as u32, config.partition_bloom_fp_rate_bp);
        for h in &pk_hashes {
            pk_bloom.insert_u64(*h);
        }
        pk_bloom.write_to(&mut filter_buf)?;
        for (patch_pos, bloom) in &intra_blooms {
            let offset = filter_buf.len() as u64;
            bloom.write_to(&mut filter_buf)?;
            data_buf[*patch_pos..*patch_pos + 8].copy_from_slice(&offset.to_le_bytes());
        }

        let mut indexer_buf = Vec::new();
        let max_hash = indexer_rows.last().map(|(h, _)| *h).unwrap_or(0);
        indexer_buf.write_u64::<LittleEndian>(max_hash).unwrap();
        indexer_buf.write_u32::<LittleEndian>(indexer_rows.len() as u32).unwrap();
        for (hash, offset) in &indexer_rows {
            indexer_buf.write_u64::<LittleEndian>(*hash).unwrap();
            indexer_buf.write_u64::<LittleEndian>(*offset).unwrap();
        }

        write_whole_file(&segment_dir.join("data.dat"), &data_buf)?;
        write_whole_file(&segment_dir.join("indexer.idx"), &indexer_buf)?;
        write_whole_file(&segment_dir.join("filter.blx"), &filter_buf)?;

        fs::remove_file(&lock_path)?;
        if let Ok(dir_handle) = fs::File::open(&segment_dir) {
            let _ = dir_handle.sync_all();
        }

        Ok(segment_dir)
    }
}

fn write_whole_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut mapper = Mapper::open(path, Some(bytes.len() as u64), OpenFlags::READ | OpenFlags::WRITE)?;
    mapper.write(0, WriteData::Single(bytes))?;
    mapper.flush(None)?;
    Ok(())
}
