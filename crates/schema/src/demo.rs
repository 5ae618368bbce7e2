//! Two concrete schemas used by tests and the `cli`/`mount` demo: one with no
//! sort keys, one with a single static `u32` sort key. Both share the same
//! two data fields so test fixtures can be written once and reused.
//!
//! Field layout (both schemas):
//! - field 0 (`A`): fixed 8-byte little-endian `u64` counter.
//! - field 1 (`B`): length-prefixed (`u32` LE len) byte string.
//!
//! Write-procedures:
//! - `(field=0, opcode=0)` "increment": adds a `u64` delta to `A`. `Static(8)`.
//! - `(field=1, opcode=0)` "append": appends bytes to `B`. `Dynamic`.
//!
//! Partition keys are self-describing: `[len: u16 LE][bytes]`.

use anyhow::{ensure, Result};

use crate::{SchemaReflect, SlotValueType, SortDirection, WProcStorage};

const FIELD_A: u8 = 0;
const FIELD_B: u8 = 1;

fn field_a_default() -> [u8; 8] {
    0u64.to_le_bytes()
}

fn field_b_default() -> [u8; 4] {
    0u32.to_le_bytes()
}

/// Reads one field's on-wire size out of a `{field_id}{field_bytes}*` or
/// flat-instance buffer, starting at `offset`.
fn field_size_at(field_id: u8, bytes: &[u8]) -> usize {
    match field_id {
        FIELD_A => 8,
        FIELD_B => {
            let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
            4 + len
        }
        _ => 0,
    }
}

/// Finds `(offset, size)` of `field_id` inside a `FieldSequence` buffer, if present.
fn find_field_seq(buf: &[u8], field_id: u8) -> Option<(usize, usize)> {
    let mut off = 0;
    while off < buf.len() {
        let fid = buf[off];
        let size = field_size_at(fid, &buf[off + 1..]);
        if fid == field_id {
            return Some((off + 1, size));
        }
        off += 1 + size;
    }
    None
}

/// Offset of each field within a flat `SchemaInstance` buffer: field A at 0,
/// field B right after it.
fn instance_field_offset(field_id: u8) -> usize {
    match field_id {
        FIELD_A => 0,
        FIELD_B => 8,
        _ => unreachable!("demo schema only has fields 0 and 1"),
    }
}

fn replace_field_seq(buf: &mut Vec<u8>, field_id: u8, field_bytes: &[u8]) {
    let encoded = encode_field(field_id, field_bytes);
    if let Some((off, size)) = find_field_seq(buf, field_id) {
        buf.splice(off - 1..off + size, encoded);
    } else {
        buf.extend_from_slice(&encoded);
    }
}

fn encode_field(field_id: u8, field_bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![field_id];
    match field_id {
        FIELD_A => out.extend_from_slice(field_bytes),
        FIELD_B => {
            out.extend_from_slice(&(field_bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(field_bytes);
        }
        _ => unreachable!(),
    }
    out
}

fn replace_field_instance(buf: &mut Vec<u8>, field_id: u8, field_bytes: &[u8]) {
    let off = instance_field_offset(field_id);
    match field_id {
        FIELD_A => {
            buf[off..off + 8].copy_from_slice(&field_bytes[..8]);
        }
        FIELD_B => {
            let old_size = field_size_at(FIELD_B, &buf[off..]);
            let mut encoded = Vec::with_capacity(4 + field_bytes.len());
            encoded.extend_from_slice(&(field_bytes.len() as u32).to_le_bytes());
            encoded.extend_from_slice(field_bytes);
            buf.splice(off..off + old_size, encoded);
        }
        _ => unreachable!(),
    }
}

fn read_field_bytes<'a>(buf: &'a [u8], vtype: SlotValueType, field_id: u8) -> Option<&'a [u8]> {
    match vtype {
        SlotValueType::FieldSequence => {
            find_field_seq(buf, field_id).map(|(off, size)| &buf[off..off + size])
        }
        SlotValueType::SchemaInstance => {
            let off = instance_field_offset(field_id);
            let size = field_size_at(field_id, &buf[off..]);
            Some(&buf[off..off + size])
        }
        SlotValueType::Tombstone => None,
    }
}

fn field_payload<'a>(field_id: u8, raw: &'a [u8]) -> &'a [u8] {
    match field_id {
        FIELD_A => raw,
        FIELD_B => &raw[4..],
        _ => unreachable!(),
    }
}

fn apply_increment(buf: &mut Vec<u8>, vtype: SlotValueType, delta: i64) -> Result<()> {
    let current = read_field_bytes(buf, vtype, FIELD_A)
        .map(|raw| u64::from_le_bytes(field_payload(FIELD_A, raw).try_into().unwrap()))
        .unwrap_or(0);
    let next = (current as i64).wrapping_add(delta) as u64;
    let encoded = next.to_le_bytes();
    match vtype {
        SlotValueType::FieldSequence => replace_field_seq(buf, FIELD_A, &encoded),
        SlotValueType::SchemaInstance => replace_field_instance(buf, FIELD_A, &encoded),
        SlotValueType::Tombstone => unreachable!("caller materializes a non-tombstone buffer first"),
    }
    Ok(())
}

fn apply_append(buf: &mut Vec<u8>, vtype: SlotValueType, suffix: &[u8]) -> Result<()> {
    let mut next = read_field_bytes(buf, vtype, FIELD_B)
        .map(|raw| field_payload(FIELD_B, raw).to_vec())
        .unwrap_or_default();
    next.extend_from_slice(suffix);
    match vtype {
        SlotValueType::FieldSequence => replace_field_seq(buf, FIELD_B, &next),
        SlotValueType::SchemaInstance => replace_field_instance(buf, FIELD_B, &next),
        SlotValueType::Tombstone => unreachable!("caller materializes a non-tombstone buffer first"),
    }
    Ok(())
}

fn partition_key_len_impl(pkey_bytes: &[u8]) -> usize {
    let len = u16::from_le_bytes(pkey_bytes[0..2].try_into().unwrap()) as usize;
    2 + len
}

/// Encodes a partition key for either demo schema: `[len: u16 LE][bytes]`.
pub fn encode_pkey(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + key.len());
    out.extend_from_slice(&(key.len() as u16).to_le_bytes());
    out.extend_from_slice(key);
    out
}

macro_rules! shared_schema_body {
    () => {
        fn partition_key_len(&self, pkey_bytes: &[u8]) -> usize {
            partition_key_len_impl(pkey_bytes)
        }

        fn field_storage_size(&self, field_id: u8, bytes: &[u8]) -> usize {
            field_size_at(field_id, bytes)
        }

        fn construct_default(&self) -> Vec<u8> {
            let mut out = Vec::with_capacity(12);
            out.extend_from_slice(&field_a_default());
            out.extend_from_slice(&field_b_default());
            out
        }

        fn instance_len(&self, bytes: &[u8]) -> usize {
            let a = field_size_at(FIELD_A, bytes);
            let b = field_size_at(FIELD_B, &bytes[a..]);
            a + b
        }

        fn apply_field_write(
            &self,
            vtype: SlotValueType,
            buf: &mut Vec<u8>,
            field_id: u8,
            field_bytes: &[u8],
        ) -> Result<()> {
            ensure!(field_id == FIELD_A || field_id == FIELD_B, "unknown field {field_id}");
            if field_id == FIELD_A {
                ensure!(field_bytes.len() == 8, "field A is a fixed 8-byte u64");
            }
            match vtype {
                SlotValueType::FieldSequence => replace_field_seq(buf, field_id, field_bytes),
                SlotValueType::SchemaInstance => replace_field_instance(buf, field_id, field_bytes),
                SlotValueType::Tombstone => anyhow::bail!("cannot write a field into a tombstone"),
            }
            Ok(())
        }

        fn read_field<'a>(&self, vtype: SlotValueType, buf: &'a [u8], field_id: u8) -> Option<&'a [u8]> {
            read_field_bytes(buf, vtype, field_id).map(|raw| field_payload(field_id, raw))
        }

        fn wproc_storage(&self, field_id: u8, opcode: u8) -> Result<WProcStorage> {
            match (field_id, opcode) {
                (FIELD_A, 0) => Ok(WProcStorage::Static(8)),
                (FIELD_B, 0) => Ok(WProcStorage::Dynamic),
                _ => anyhow::bail!("unknown write-procedure ({field_id}, {opcode})"),
            }
        }

        fn apply_write_procedure(
            &self,
            vtype: SlotValueType,
            buf: &mut Vec<u8>,
            field_id: u8,
            opcode: u8,
            payload: &[u8],
        ) -> Result<()> {
            match (field_id, opcode) {
                (FIELD_A, 0) => {
                    ensure!(payload.len() == 8, "increment payload is an 8-byte i64 delta");
                    apply_increment(buf, vtype, i64::from_le_bytes(payload.try_into().unwrap()))
                }
                (FIELD_B, 0) => apply_append(buf, vtype, payload),
                _ => anyhow::bail!("unknown write-procedure ({field_id}, {opcode})"),
            }
        }
    };
}

/// A schema with no sort fields: one slot per partition (spec.md scenario S1/S4).
pub struct NoSortSchema {
    id: u32,
}

impl NoSortSchema {
    pub fn new(id: u32) -> Self {
        Self { id }
    }
}

impl SchemaReflect for NoSortSchema {
    fn schema_id(&self) -> u32 {
        self.id
    }

    fn num_sort_fields(&self) -> usize {
        0
    }

    fn static_prefix_len(&self) -> usize {
        0
    }

    fn sort_field_direction(&self, _idx: usize) -> SortDirection {
        SortDirection::Ascending
    }

    fn sort_key_len(&self, _bytes: &[u8]) -> usize {
        0
    }

    shared_schema_body!();
}

/// A schema with one static ascending `u32` sort field (spec.md scenario S2).
///
/// Sort-key bytes are the field's value in big-endian order so that
/// byte-lexicographic comparison matches numeric ascending order.
pub struct U32SortSchema {
    id: u32,
}

impl U32SortSchema {
    pub fn new(id: u32) -> Self {
        Self { id }
    }

    pub fn encode_sort_key(value: u32) -> Vec<u8> {
        value.to_be_bytes().to_vec()
    }
}

impl SchemaReflect for U32SortSchema {
    fn schema_id(&self) -> u32 {
        self.id
    }

    fn num_sort_fields(&self) -> usize {
        1
    }

    fn static_prefix_len(&self) -> usize {
        4
    }

    fn sort_field_direction(&self, _idx: usize) -> SortDirection {
        SortDirection::Ascending
    }

    fn sort_key_len(&self, _bytes: &[u8]) -> usize {
        4
    }

    shared_schema_body!();
}
