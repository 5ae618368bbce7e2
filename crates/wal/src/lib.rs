//! # WAL — write-ahead log
//!
//! Guarantees that every mutation accepted by a `MemoryCache` survives a
//! crash and replays back into an empty slot store in arrival order.
//!
//! ## Shard ring
//!
//! Records live in a ring of fixed-size shard files under a WAL directory:
//! `logs/s0`, `logs/s1`, ... Each shard is reserved at `shard_size` bytes up
//! front (so its tail is zero-filled before any record lands in it) and
//! memory-mapped for the lifetime of the writer.
//!
//! Record layout:
//! ```text
//! [ WriteType : u8 ]
//! CreatePartition: [ pkey_bytes ]                 // length via schema.partition_key_len
//! others:          [ partition_hash : u64 ]
//!                  [ sort_key_bytes ]              // length via schema.sort_key_len
//!                  [ length : u32 ][ payload ]     // Field/Table/WProc only
//! ```
//!
//! `Reserved(0)` is not a real write type; it is what an unused shard tail
//! already reads as, and what a shard reads as at the position of a record
//! that has not yet committed. Replay treats the first `Reserved` byte (or
//! any other short/invalid read) as the end of valid data in that shard,
//! without raising an error.
//!
//! ## Commit protocol
//!
//! 1. If the current shard lacks room, stamp `Reserved` at the write
//!    cursor, flush, and rotate to a fresh shard.
//! 2. Write the record's payload bytes (everything after the type byte)
//!    first. The type byte at the front is still `Reserved(0)`.
//! 3. Write the real `WriteType` byte last. This is the atomic step that
//!    makes the record visible to a replay; a crash before it leaves the
//!    record invisible.
//!
//! ## Snapshot-on-flush
//!
//! When the owning `MemoryCache` begins a flush, every current root shard
//! is moved into `logs/snapshotN/` (`N` the new segment id) and the root
//! ring restarts at `s0`. The snapshot directory is deleted once the
//! segment is durable. On recovery, snapshot directories are replayed
//! first (oldest segment id to newest), then the root shards.

use byteorder::{LittleEndian, WriteBytesExt};
use mapper::{Mapper, OpenFlags, WriteData};
use schema::SchemaReflect;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One byte identifying a WAL record's shape. `Reserved = 0` is the
/// uncommitted/terminator sentinel, not a record a caller ever constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WriteType {
    Reserved = 0,
    Field = 1,
    Table = 2,
    WProc = 3,
    Remov = 4,
    Reset = 5,
    CreatePartition = 6,
}

impl WriteType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Reserved),
            1 => Some(Self::Field),
            2 => Some(Self::Table),
            3 => Some(Self::WProc),
            4 => Some(Self::Remov),
            5 => Some(Self::Reset),
            6 => Some(Self::CreatePartition),
            _ => None,
        }
    }
}

/// A single decoded WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Declares a partition's existence ahead of its first slot write
    /// (used for partitions that hold no slot payload of their own yet).
    CreatePartition { pkey: Vec<u8> },
    /// A sparse field write against a `FieldSequence`/`SchemaInstance` slot.
    Field {
        partition_hash: u64,
        sort_key: Vec<u8>,
        payload: Vec<u8>,
    },
    /// A full schema-encoded record write.
    Table {
        partition_hash: u64,
        sort_key: Vec<u8>,
        payload: Vec<u8>,
    },
    /// A write-procedure invocation; `payload` carries `[field_id][opcode][args]`.
    WProc {
        partition_hash: u64,
        sort_key: Vec<u8>,
        payload: Vec<u8>,
    },
    /// Deletes one slot, leaving a tombstone.
    Remov {
        partition_hash: u64,
        sort_key: Vec<u8>,
    },
    /// Clears a slot's value without deleting it.
    Reset {
        partition_hash: u64,
        sort_key: Vec<u8>,
    },
}

impl WalRecord {
    fn write_type(&self) -> WriteType {
        match self {
            WalRecord::CreatePartition { .. } => WriteType::CreatePartition,
            WalRecord::Field { .. } => WriteType::Field,
            WalRecord::Table { .. } => WriteType::Table,
            WalRecord::WProc { .. } => WriteType::WProc,
            WalRecord::Remov { .. } => WriteType::Remov,
            WalRecord::Reset { .. } => WriteType::Reset,
        }
    }
}

#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAL record is larger than the shard size")]
    RecordTooLarge,
}

/// Append-only writer over one WAL's shard ring.
pub struct WalWriter {
    dir: PathBuf,
    shard_size: u64,
    shard_index: u32,
    mapper: Mapper,
    cursor: u64,
}

impl WalWriter {
    /// Opens (creating if necessary) the WAL directory, resuming from the
    /// highest-numbered existing root shard. If that shard already holds
    /// records (a restart without an intervening flush), the write cursor
    /// is positioned after the last valid one so appends continue there
    /// rather than overwriting replayable history.
    pub fn open(dir: impl AsRef<Path>, shard_size: u64, schema: &dyn SchemaReflect) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let shard_index = highest_root_shard_index(&dir)?;
        let path = shard_path(&dir, shard_index);
        let existed = path.exists();

        let mut mapper = Mapper::open(&path, Some(shard_size), OpenFlags::READ | OpenFlags::WRITE)?;
        mapper.map(None)?;

        let cursor = if existed {
            let bytes = mapper.as_slice().map(|s| s.to_vec()).unwrap_or_default();
            scan_shard(&bytes, schema, |_| {})
        } else {
            0
        };

        Ok(Self {
            dir,
            shard_size,
            shard_index,
            mapper,
            cursor,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current shard's write offset; exposed for tests that want to assert
    /// on shard occupancy.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn shard_index(&self) -> u32 {
        self.shard_index
    }

    /// Appends `record`, rotating to a fresh shard first if it wouldn't fit.
    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        let body = encode_body(record);
        let record_len = 1 + body.len() as u64;
        if record_len > self.shard_size {
            return Err(WalError::RecordTooLarge);
        }
        if self.cursor + record_len > self.shard_size {
            self.rotate()?;
        }

        let type_offset = self.cursor;
        let body_offset = type_offset + 1;

        // Payload first; the type byte at `type_offset` is still Reserved(0).
        self.mapper.write(body_offset, WriteData::Single(&body))?;
        self.mapper.flush(None)?;

        // Commits the record.
        let type_byte = [record.write_type() as u8];
        self.mapper.write(type_offset, WriteData::Single(&type_byte))?;
        self.mapper.flush(None)?;

        self.cursor += record_len;
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), WalError> {
        self.mapper
            .write(self.cursor, WriteData::Single(&[WriteType::Reserved as u8]))?;
        self.mapper.flush(None)?;
        self.mapper.unmap(true)?;

        self.shard_index += 1;
        let path = shard_path(&self.dir, self.shard_index);
        let mut mapper = Mapper::open(&path, Some(self.shard_size), OpenFlags::READ | OpenFlags::WRITE)?;
        mapper.map(None)?;
        self.mapper = mapper;
        self.cursor = 0;
        Ok(())
    }

    /// Moves every current root shard into `logs/snapshotN/` and restarts
    /// the root ring at `s0`. Called when the owning cache begins a flush;
    /// `segment_id` is the id of the segment that flush will produce.
    pub fn snapshot_for_flush(&mut self, segment_id: u64) -> Result<PathBuf, WalError> {
        self.mapper.flush(None)?;
        self.mapper.unmap(true)?;

        let snapshot_dir = snapshot_path(&self.dir, segment_id);
        fs::create_dir_all(&snapshot_dir)?;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() && is_root_shard(&path) {
                let dest = snapshot_dir.join(path.file_name().unwrap());
                fs::rename(&path, dest)?;
            }
        }

        self.shard_index = 0;
        let path = shard_path(&self.dir, 0);
        let mut mapper = Mapper::open(&path, Some(self.shard_size), OpenFlags::READ | OpenFlags::WRITE)?;
        mapper.map(None)?;
        self.mapper = mapper;
        self.cursor = 0;
        Ok(snapshot_dir)
    }
}

/// Deletes a snapshot directory once its segment has become durable.
pub fn discard_snapshot(dir: impl AsRef<Path>, segment_id: u64) -> Result<(), WalError> {
    let snapshot_dir = snapshot_path(dir.as_ref(), segment_id);
    if snapshot_dir.exists() {
        fs::remove_dir_all(&snapshot_dir)?;
    }
    Ok(())
}

/// Replays a WAL directory into `apply`, in the order a restart must see
/// them: crashed-flush snapshots first (oldest segment id to newest, shard
/// order within each), then the root shard ring.
///
/// Non-fatal per the WAL's failure model: a torn shard -- a `Reserved` type
/// byte, a short read, or an out-of-range embedded length -- stops replay
/// of that shard at its last complete record, without returning an error.
pub fn replay<F: FnMut(WalRecord)>(
    dir: impl AsRef<Path>,
    schema: &dyn SchemaReflect,
    mut apply: F,
) -> Result<(), WalError> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(());
    }

    let mut snapshots: Vec<(u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("snapshot"))
                .and_then(|n| n.parse::<u64>().ok())
            {
                snapshots.push((id, path));
            }
        }
    }
    snapshots.sort_by_key(|(id, _)| *id);

    for (_, snapshot_dir) in &snapshots {
        replay_shard_dir(&snapshot_dir, schema, &mut apply)?;
    }
    replay_shard_dir(dir, schema, &mut apply)?;
    Ok(())
}

fn replay_shard_dir<F: FnMut(WalRecord)>(
    dir: &Path,
    schema: &dyn SchemaReflect,
    apply: &mut F,
) -> Result<(), WalError> {
    let mut shards: Vec<(u32, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && is_root_shard(&path) {
            if let Some(n) = shard_number(&path) {
                shards.push((n, path));
            }
        }
    }
    shards.sort_by_key(|(n, _)| *n);

    for (_, path) in shards {
        let bytes = fs::read(&path)?;
        scan_shard(&bytes, schema, |record| apply(record));
    }
    Ok(())
}

// ---- Encoding / decoding ----

fn encode_body(record: &WalRecord) -> Vec<u8> {
    let mut buf = Vec::new();
    match record {
        WalRecord::CreatePartition { pkey } => {
            buf.extend_from_slice(pkey);
        }
        WalRecord::Field { partition_hash, sort_key, payload }
        | WalRecord::Table { partition_hash, sort_key, payload }
        | WalRecord::WProc { partition_hash, sort_key, payload } => {
            buf.write_u64::<LittleEndian>(*partition_hash).unwrap();
            buf.extend_from_slice(sort_key);
            buf.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
            buf.extend_from_slice(payload);
        }
        WalRecord::Remov { partition_hash, sort_key } | WalRecord::Reset { partition_hash, sort_key } => {
            buf.write_u64::<LittleEndian>(*partition_hash).unwrap();
            buf.extend_from_slice(sort_key);
        }
    }
    buf
}

/// Scans `bytes` from offset 0 until a `Reserved` type byte, an unknown type
/// byte, or a short/invalid read. Returns the offset of the first unused
/// byte, i.e. where the next record may be appended (or replay should stop).
fn scan_shard<F: FnMut(WalRecord)>(bytes: &[u8], schema: &dyn SchemaReflect, mut apply: F) -> u64 {
    let mut offset: usize = 0;
    loop {
        if offset >= bytes.len() {
            return offset as u64;
        }
        let Some(write_type) = WriteType::from_u8(bytes[offset]) else {
            return offset as u64;
        };
        if write_type == WriteType::Reserved {
            return offset as u64;
        }
        match decode_record(write_type, &bytes[offset + 1..], schema) {
            Some((record, consumed)) => {
                apply(record);
                offset += 1 + consumed;
            }
            None => return offset as u64,
        }
    }
}

fn decode_record(write_type: WriteType, rest: &[u8], schema: &dyn SchemaReflect) -> Option<(WalRecord, usize)> {
    match write_type {
        WriteType::Reserved => None,
        WriteType::CreatePartition => {
            if rest.is_empty() {
                return None;
            }
            let pkey_len = schema.partition_key_len(rest);
            if pkey_len == 0 || pkey_len > rest.len() {
                return None;
            }
            Some((WalRecord::CreatePartition { pkey: rest[..pkey_len].to_vec() }, pkey_len))
        }
        WriteType::Remov | WriteType::Reset => {
            let (partition_hash, sort_key, consumed) = decode_hash_and_sort_key(rest, schema)?;
            let record = if write_type == WriteType::Remov {
                WalRecord::Remov { partition_hash, sort_key }
            } else {
                WalRecord::Reset { partition_hash, sort_key }
            };
            Some((record, consumed))
        }
        WriteType::Field | WriteType::Table | WriteType::WProc => {
            let (partition_hash, sort_key, consumed) = decode_hash_and_sort_key(rest, schema)?;
            let after_sk = &rest[consumed..];
            if after_sk.len() < 4 {
                return None;
            }
            let payload_len = u32::from_le_bytes(after_sk[0..4].try_into().ok()?) as usize;
            let payload_region = &after_sk[4..];
            if payload_len > payload_region.len() {
                return None;
            }
            let payload = payload_region[..payload_len].to_vec();
            let total = consumed + 4 + payload_len;
            let record = match write_type {
                WriteType::Field => WalRecord::Field { partition_hash, sort_key, payload },
                WriteType::Table => WalRecord::Table { partition_hash, sort_key, payload },
                WriteType::WProc => WalRecord::WProc { partition_hash, sort_key, payload },
                _ => unreachable!(),
            };
            Some((record, total))
        }
    }
}

fn decode_hash_and_sort_key(rest: &[u8], schema: &dyn SchemaReflect) -> Option<(u64, Vec<u8>, usize)> {
    if rest.len() < 8 {
        return None;
    }
    let partition_hash = u64::from_le_bytes(rest[0..8].try_into().ok()?);
    let sk_region = &rest[8..];
    let sort_key_len = if schema.has_sort_keys() {
        schema.sort_key_len(sk_region)
    } else {
        0
    };
    if sort_key_len > sk_region.len() {
        return None;
    }
    Some((partition_hash, sk_region[..sort_key_len].to_vec(), 8 + sort_key_len))
}

// ---- Path helpers ----

fn shard_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("s{index}"))
}

fn snapshot_path(dir: &Path, segment_id: u64) -> PathBuf {
    dir.join(format!("snapshot{segment_id}"))
}

fn shard_number(path: &Path) -> Option<u32> {
    path.file_name()?.to_str()?.strip_prefix('s')?.parse().ok()
}

fn is_root_shard(path: &Path) -> bool {
    shard_number(path).is_some()
}

fn highest_root_shard_index(dir: &Path) -> Result<u32, WalError> {
    let mut max = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() {
            if let Some(n) = shard_number(&path) {
                max = Some(max.map_or(n, |m: u32| m.max(n)));
            }
        }
    }
    Ok(max.unwrap_or(0))
}
