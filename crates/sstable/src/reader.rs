//! Reads a segment directory (spec.md §4.B): loads `indexer.idx` and
//! `filter.blx` into memory, mmaps `data.dat`, and answers point lookups and
//! sort-key-ordered pages against it without schema field-walking — payload
//! length is recovered from neighboring index offsets.

use anyhow::{anyhow, bail, ensure, Result};
use bloom::BloomFilter;
use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use schema::SchemaReflect;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::format::{data_type_from_byte, decompress_block, DATA_DAT_VERSION, FILTER_FLAG_PK, FILTER_FLAG_PK_SK};
use crate::writer::PartitionRecord;

/// One parsed block: its key → in-block-offset index, the decompressed body,
/// and the body's total length (needed to frame the final record's payload).
struct ParsedBlock {
    index: Vec<(Vec<u8>, u64)>,
    body: Vec<u8>,
}

/// In-block offset width: unary blocks key off the 8-byte partition hash
/// with 8-byte offsets; wide blocks key off the sort-key prefix with 4-byte
/// offsets (spec.md §4.B). Must mirror `writer::KeyOffsetWidth`.
#[derive(Clone, Copy)]
enum OffsetWidth {
    U32,
    U64,
}

impl OffsetWidth {
    fn bytes(self) -> usize {
        match self {
            OffsetWidth::U32 => 4,
            OffsetWidth::U64 => 8,
        }
    }
}

/// Opens a segment directory for reads.
///
/// `indexer.idx` and `filter.blx` are read fully into memory on open;
/// `data.dat` is mmapped so block reads don't copy until decompression.
pub struct SegmentReader {
    #[allow(dead_code)]
    dir: PathBuf,
    indexer: Vec<(u64, u64)>,
    pk_bloom: BloomFilter,
    filter_flag: u8,
    filter_bytes: Vec<u8>,
    pk_sk_bloom_start: usize,
    data: Mmap,
}

impl SegmentReader {
    /// Opens `segment_dir`. Bails if a `lock` file is present — the segment
    /// was left mid-write by a crashed writer and must not be read.
    pub fn open<P: AsRef<Path>>(segment_dir: P) -> Result<Self> {
        let dir = segment_dir.as_ref().to_path_buf();
        if dir.join("lock").exists() {
            bail!("segment {} still carries a lock file", dir.display());
        }

        let idx_bytes = fs::read(dir.join("indexer.idx"))?;
        ensure!(idx_bytes.len() >= 12, "indexer.idx truncated");
        let partition_count = LittleEndian::read_u32(&idx_bytes[8..12]) as usize;
        let mut indexer = Vec::with_capacity(partition_count);
        let mut cur = 12usize;
        for _ in 0..partition_count {
            ensure!(cur + 16 <= idx_bytes.len(), "indexer.idx row truncated");
            let hash = LittleEndian::read_u64(&idx_bytes[cur..cur + 8]);
            let offset = LittleEndian::read_u64(&idx_bytes[cur + 8..cur + 16]);
            indexer.push((hash, offset));
            cur += 16;
        }

        let filter_bytes = fs::read(dir.join("filter.blx"))?;
        ensure!(!filter_bytes.is_empty(), "filter.blx empty");
        let filter_flag = filter_bytes[0];
        ensure!(filter_flag & FILTER_FLAG_PK != 0, "filter.blx missing PK bloom");
        let mut fr = Cursor::new(&filter_bytes[1..]);
        let pk_bloom = BloomFilter::read_from(&mut fr, filter_bytes.len() - 1)?;
        let pk_sk_bloom_start = 1 + fr.position() as usize;

        let file = fs::File::open(dir.join("data.dat"))?;
        let data = unsafe { Mmap::map(&file)? };
        ensure!(data.len() >= 32, "data.dat header truncated");
        let version = LittleEndian::read_u64(&data[0..8]);
        ensure!(version == DATA_DAT_VERSION, "unsupported data.dat version {version}");

        Ok(Self {
            dir,
            indexer,
            pk_bloom,
            filter_flag,
            filter_bytes,
            pk_sk_bloom_start,
            data,
        })
    }

    /// Binary-searches the dense partition index for `hash`, returning the
    /// absolute `data.dat` offset where this partition's content begins.
    fn indexer_lookup(&self, hash: u64) -> Option<u64> {
        self.indexer
            .binary_search_by_key(&hash, |&(h, _)| h)
            .ok()
            .map(|i| self.indexer[i].1)
    }

    /// Fast negative-lookup check against the segment-wide PK bloom.
    pub fn may_contain_partition(&self, hash: u64) -> bool {
        self.pk_bloom.may_contain_u64(hash)
    }

    /// Looks up a single slot by partition hash (+ sort key, for wide
    /// partitions). Returns `Ok(None)` if the partition or sort key isn't
    /// present in this segment.
    pub fn lookup(
        &self,
        schema: &Arc<dyn SchemaReflect>,
        hash: u64,
        sort_key: Option<&[u8]>,
    ) -> Result<Option<PartitionRecord>> {
        if !self.may_contain_partition(hash) {
            return Ok(None);
        }
        let Some(offset) = self.indexer_lookup(hash) else {
            return Ok(None);
        };

        if !schema.has_sort_keys() {
            let block = parse_block(&self.data, offset as usize, 8, OffsetWidth::U64)?;
            return self.find_in_block(&block, &hash.to_le_bytes());
        }

        let sort_key = sort_key.ok_or_else(|| anyhow!("wide partition lookup requires a sort key"))?;
        let key_len = static_sort_key_len(schema)?;
        let footer_offset = wide_partition_header(&self.data, offset as usize, schema)?;
        let footer = parse_partition_footer(&self.data, footer_offset, key_len)?;

        if self.filter_flag & FILTER_FLAG_PK_SK != 0 {
            let bloom = self.intra_bloom_at(footer.sort_bloom_offset)?;
            if !bloom.may_contain(sort_key) {
                return Ok(None);
            }
        }

        let Some(block_idx) = candidate_block_index(&footer.rows, sort_key) else {
            return Ok(None);
        };
        let block = parse_block(&self.data, footer.rows[block_idx].1 as usize, key_len, OffsetWidth::U32)?;
        find_sort_key_in_block(&block, sort_key)
    }

    /// Returns up to `count` `(sort_key, record)` pairs from a wide partition,
    /// in ascending sort-key order, starting at the first key `>= start`
    /// (or from the beginning if `start` is `None`).
    pub fn page_from(
        &self,
        schema: &Arc<dyn SchemaReflect>,
        hash: u64,
        start: Option<&[u8]>,
        count: usize,
    ) -> Result<Vec<(Vec<u8>, PartitionRecord)>> {
        if count == 0 || !self.may_contain_partition(hash) {
            return Ok(Vec::new());
        }
        let Some(offset) = self.indexer_lookup(hash) else {
            return Ok(Vec::new());
        };
        ensure!(schema.has_sort_keys(), "page_from requires a sort-keyed schema");
        let key_len = static_sort_key_len(schema)?;

        let footer_offset = wide_partition_header(&self.data, offset as usize, schema)?;
        let footer = parse_partition_footer(&self.data, footer_offset, key_len)?;
        if footer.rows.is_empty() {
            return Ok(Vec::new());
        }

        // Binary-search to the block that could hold `start` (or the first
        // block, scanning from the beginning); a range scan still has to
        // walk forward from there one block at a time.
        let start_idx = match start {
            Some(s) => candidate_block_index(&footer.rows, s).unwrap_or(0),
            None => 0,
        };

        let mut out = Vec::new();
        'blocks: for (_, block_offset) in &footer.rows[start_idx..] {
            let block = parse_block(&self.data, *block_offset as usize, key_len, OffsetWidth::U32)?;
            for (pos, (key, _)) in block.index.iter().enumerate() {
                if let Some(s) = start {
                    if key.as_slice() < s {
                        continue;
                    }
                }
                let rec = extract_payload(&block, pos, key_len)?;
                out.push((key.clone(), rec));
                if out.len() >= count {
                    break 'blocks;
                }
            }
        }
        Ok(out)
    }

    /// Looks up `key` within an already-parsed unary block's index. Unary
    /// blocks key off the raw little-endian partition hash, whose byte order
    /// doesn't track numeric order, so this can only check for an exact
    /// match rather than binary-search.
    fn find_in_block(&self, block: &ParsedBlock, key: &[u8]) -> Result<Option<PartitionRecord>> {
        let key_len = key.len();
        match block.index.iter().position(|(k, _)| k.as_slice() == key) {
            Some(pos) => Ok(Some(extract_payload(block, pos, key_len)?)),
            None => Ok(None),
        }
    }

    /// Intra-partition bloom for a wide partition, if this segment carries
    /// PK-SK blooms; `bloom_offset` is the absolute `filter.blx` byte offset
    /// recorded in the partition's footer.
    pub fn intra_bloom_at(&self, bloom_offset: u64) -> Result<BloomFilter> {
        ensure!(self.filter_flag & FILTER_FLAG_PK_SK != 0, "segment carries no intra-partition blooms");
        let start = bloom_offset as usize;
        ensure!(start >= self.pk_sk_bloom_start, "bloom_offset precedes PK-SK bloom region");
        ensure!(start < self.filter_bytes.len(), "bloom_offset past end of filter.blx");
        let mut r = Cursor::new(&self.filter_bytes[start..]);
        BloomFilter::read_from(&mut r, self.filter_bytes.len() - start)
    }
}

/// Parses `[partition_size][pkey_len via schema][pkey][block_count][footer_offset]`
/// at `offset`, returning the absolute `data.dat` offset of this partition's
/// footer — letting the reader jump straight there without walking blocks.
fn wide_partition_header(data: &[u8], offset: usize, schema: &Arc<dyn SchemaReflect>) -> Result<usize> {
    ensure!(offset + 8 <= data.len(), "wide partition header truncated");
    let pkey_len = schema.partition_key_len(&data[offset + 8..]);
    let pkey_start = offset + 8;
    let block_count_off = pkey_start + pkey_len;
    ensure!(block_count_off + 4 + 8 <= data.len(), "wide partition missing block_count/footer_offset");
    let footer_offset = LittleEndian::read_u64(&data[block_count_off + 4..block_count_off + 12]);
    Ok(footer_offset as usize)
}

/// A wide partition's footer (spec.md §4.B): the sparse block index — one
/// `(first_key_of_block, block_abs_offset)` row per block, ascending by key
/// — plus the absolute `filter.blx` offset of this partition's intra-bloom.
struct PartitionFooter {
    sort_bloom_offset: u64,
    rows: Vec<(Vec<u8>, u64)>,
}

/// Parses `[sparse_block_index_count][sort_bloom_offset]` followed by that
/// many `[key][block_abs_offset]` rows at `footer_offset`.
fn parse_partition_footer(data: &[u8], footer_offset: usize, key_len: usize) -> Result<PartitionFooter> {
    ensure!(footer_offset + 12 <= data.len(), "partition footer truncated");
    let count = LittleEndian::read_u32(&data[footer_offset..footer_offset + 4]) as usize;
    let sort_bloom_offset = LittleEndian::read_u64(&data[footer_offset + 4..footer_offset + 12]);
    let row_len = key_len + 8;
    let mut cur = footer_offset + 12;
    let mut rows = Vec::with_capacity(count);
    for _ in 0..count {
        ensure!(cur + row_len <= data.len(), "partition footer row truncated");
        let key = data[cur..cur + key_len].to_vec();
        let block_abs_offset = LittleEndian::read_u64(&data[cur + key_len..cur + row_len]);
        rows.push((key, block_abs_offset));
        cur += row_len;
    }
    Ok(PartitionFooter { sort_bloom_offset, rows })
}

/// Binary-searches `rows` (ascending by each block's first key) for the
/// index of the last block whose first key is `<= target` — the only block
/// `target` could be in, since every later block starts strictly after it.
/// `None` if `target` precedes every block's first key.
fn candidate_block_index(rows: &[(Vec<u8>, u64)], target: &[u8]) -> Option<usize> {
    rows.partition_point(|(k, _)| k.as_slice() <= target).checked_sub(1)
}

/// Binary-searches a wide block's index for an exact sort-key match. Valid
/// only for wide blocks, whose keys are written in the schema's own
/// ascending byte order (unlike unary blocks, see `SegmentReader::find_in_block`).
fn find_sort_key_in_block(block: &ParsedBlock, key: &[u8]) -> Result<Option<PartitionRecord>> {
    let key_len = key.len();
    match block.index.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
        Ok(pos) => Ok(Some(extract_payload(block, pos, key_len)?)),
        Err(_) => Ok(None),
    }
}

/// Static sort-key width for `schema`; this reader only supports
/// schemas whose sort key is entirely a fixed-width static prefix.
fn static_sort_key_len(schema: &Arc<dyn SchemaReflect>) -> Result<usize> {
    ensure!(schema.sort_key_is_static(), "reader only supports static-length sort keys");
    Ok(schema.static_prefix_len())
}

/// Parses a block at `offset` whose keys are all `key_len` bytes wide,
/// returning only the parsed block (caller already knows the next offset).
fn parse_block(data: &[u8], offset: usize, key_len: usize, offset_width: OffsetWidth) -> Result<ParsedBlock> {
    let (block, _) = parse_block_with_len(data, offset, key_len, offset_width)?;
    Ok(block)
}

/// Parses a block at `offset`, returning the parsed block plus its total
/// on-disk length (checksum + index + decompressed_len/compressed_len + body)
/// so the caller can advance to the next block.
fn parse_block_with_len(data: &[u8], offset: usize, key_len: usize, offset_width: OffsetWidth) -> Result<(ParsedBlock, usize)> {
    ensure!(offset + 12 <= data.len(), "block header truncated");
    let _checksum = LittleEndian::read_u64(&data[offset..offset + 8]);
    let index_count = LittleEndian::read_u32(&data[offset + 8..offset + 12]) as usize;

    let row_len = key_len + offset_width.bytes();
    let mut cur = offset + 12;
    let mut index = Vec::with_capacity(index_count);
    for _ in 0..index_count {
        ensure!(cur + row_len <= data.len(), "block index row truncated");
        let key = data[cur..cur + key_len].to_vec();
        let in_block_offset = match offset_width {
            OffsetWidth::U32 => LittleEndian::read_u32(&data[cur + key_len..cur + row_len]) as u64,
            OffsetWidth::U64 => LittleEndian::read_u64(&data[cur + key_len..cur + row_len]),
        };
        index.push((key, in_block_offset));
        cur += row_len;
    }

    ensure!(cur + 8 <= data.len(), "block length prefix truncated");
    let decompressed_len = LittleEndian::read_u32(&data[cur..cur + 4]);
    let compressed_len = LittleEndian::read_u32(&data[cur + 4..cur + 8]);
    cur += 8;
    ensure!(cur + compressed_len as usize <= data.len(), "block body truncated");
    let body = decompress_block(&data[cur..cur + compressed_len as usize], decompressed_len, compressed_len)?;
    cur += compressed_len as usize;

    Ok((ParsedBlock { index, body }, cur - offset))
}

/// Recovers the payload for the `pos`-th entry in `block.index` using
/// neighbor-offset framing: this entry's payload runs from its own
/// `{DataType byte}` to the next entry's `in_block_offset` (or the body's
/// end, for the last entry).
fn extract_payload(block: &ParsedBlock, pos: usize, _key_len: usize) -> Result<PartitionRecord> {
    let (_, start) = block.index[pos];
    let start = start as usize;
    let end = if pos + 1 < block.index.len() {
        block.index[pos + 1].1 as usize
    } else {
        block.body.len()
    };
    ensure!(start < block.body.len() && end <= block.body.len() && start < end, "corrupt block framing");
    let vtype = data_type_from_byte(block.body[start])?;
    let payload = block.body[start + 1..end].to_vec();
    Ok(PartitionRecord { vtype, payload })
}
