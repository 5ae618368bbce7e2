//! # Schema reflection
//!
//! The storage engine never interprets schema bytes itself — every crate that
//! touches a record payload (`slotstore`, `sstable`, `engine`) goes through
//! the opaque [`SchemaReflect`] vtable defined here. This mirrors the "schema
//! is an external collaborator" boundary: the engine only needs field sizes,
//! a default-construction hook, and write-procedure entry points, never the
//! concrete Rust type behind a schema.
//!
//! [`registry`] holds the process-wide, read-mostly table of schemas,
//! initialized lazily on first lookup and never torn down before shutdown.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;

pub mod demo;

/// The three shapes a live slot payload can take on disk and in memory.
///
/// `FieldSequence` and `SchemaInstance` are distinguished because a
/// [`SchemaReflect`] implementation commits field writes differently
/// depending on which one it's holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotValueType {
    /// `{field_id, field_bytes}*` — a sparse set of field writes.
    FieldSequence = 0,
    /// The full, schema-encoded record.
    SchemaInstance = 1,
    /// No payload; shadows any older value for the same key.
    Tombstone = 2,
}

impl SlotValueType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::FieldSequence),
            1 => Some(Self::SchemaInstance),
            2 => Some(Self::Tombstone),
            _ => None,
        }
    }
}

/// How a write-procedure's output is sized and committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WProcStorage {
    /// Procedure output always fits in this many bytes.
    Static(usize),
    /// Procedure output length depends on the payload; the cache must be
    /// ready to resize the backing slot before committing.
    Dynamic,
}

/// One sort field's direction, used to build the comparator over raw
/// sort-key bytes (descending fields are pre-inverted at encode time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// The opaque per-schema vtable. Implementations own the concrete field
/// layout; the engine only ever calls through this trait.
pub trait SchemaReflect: Send + Sync + 'static {
    /// 32-bit schema code; base-62 encoded to form the `[schemaID]`
    /// directory name under a core's root.
    fn schema_id(&self) -> u32;

    /// Number of sort fields. Zero means the schema has no sort keys and
    /// every partition holds a single slot.
    fn num_sort_fields(&self) -> usize;

    fn has_sort_keys(&self) -> bool {
        self.num_sort_fields() > 0
    }

    /// Total byte length of the static sort-key prefix, or 0 if the sort key
    /// is dynamic-length (e.g. contains a variable-length field).
    fn static_prefix_len(&self) -> usize;

    /// `true` if every sort field is fixed-size (so `static_prefix_len()` is
    /// the *entire* sort key, not just a prefix of it).
    fn sort_key_is_static(&self) -> bool {
        self.static_prefix_len() > 0 || self.num_sort_fields() == 0
    }

    /// Direction of the `idx`th sort field, for the comparator.
    fn sort_field_direction(&self, idx: usize) -> SortDirection;

    /// Recovers the partition-key length from its leading bytes (used by the
    /// WAL to know how much to read for a `CreatePartition` record).
    fn partition_key_len(&self, pkey_bytes: &[u8]) -> usize;

    /// Recovers the length of one already-encoded sort-key byte string
    /// starting at `bytes` (used by the WAL to know how much to read for
    /// non-`CreatePartition` records). For static schemas this is always
    /// `static_prefix_len()`; dynamic schemas encode their own length.
    fn sort_key_len(&self, bytes: &[u8]) -> usize;

    /// Storage size of one field's value given a pointer to its bytes.
    fn field_storage_size(&self, field_id: u8, bytes: &[u8]) -> usize;

    /// Builds a fresh, default-initialized `SchemaInstance` payload.
    fn construct_default(&self) -> Vec<u8>;

    /// Recovers the length of an already-encoded `SchemaInstance` payload.
    fn instance_len(&self, bytes: &[u8]) -> usize;

    /// Applies a single field write to `buf` (which holds either a
    /// `FieldSequence` or a `SchemaInstance` payload for `vtype`). May grow
    /// `buf` in place; the caller (the cache) owns resizing the backing slot
    /// beforehand if needed.
    fn apply_field_write(
        &self,
        vtype: SlotValueType,
        buf: &mut Vec<u8>,
        field_id: u8,
        field_bytes: &[u8],
    ) -> Result<()>;

    /// Storage/commit semantics for a write-procedure identified by
    /// `(field_id, opcode)`.
    fn wproc_storage(&self, field_id: u8, opcode: u8) -> Result<WProcStorage>;

    /// Runs a write-procedure over `buf`, which holds either a
    /// `FieldSequence` or a `SchemaInstance` payload for `vtype`.
    fn apply_write_procedure(
        &self,
        vtype: SlotValueType,
        buf: &mut Vec<u8>,
        field_id: u8,
        opcode: u8,
        payload: &[u8],
    ) -> Result<()>;

    /// Reads field `field_id`'s current value bytes out of `buf` (which
    /// holds `vtype`). `None` if the field is absent — a `FieldSequence`
    /// that never had this field written — never called on a `Tombstone`.
    fn read_field<'a>(&self, vtype: SlotValueType, buf: &'a [u8], field_id: u8) -> Option<&'a [u8]>;

    /// Extracts the static comparison prefix from a full sort-key byte
    /// string (identity for schemas whose sort key is entirely static).
    fn extract_sort_prefix<'a>(&self, sort_key: &'a [u8]) -> &'a [u8] {
        if self.static_prefix_len() == 0 {
            sort_key
        } else {
            &sort_key[..self.static_prefix_len().min(sort_key.len())]
        }
    }
}

/// Process-wide, read-mostly schema table.
///
/// Initialized lazily on first [`register`]/[`get`] call. Never torn down
/// before worker shutdown — schemas are assumed to live for the process
/// lifetime once registered.
pub mod registry {
    use super::*;
    use std::sync::Arc;

    static SCHEMAS: Lazy<RwLock<HashMap<u32, Arc<dyn SchemaReflect>>>> =
        Lazy::new(|| RwLock::new(HashMap::new()));

    /// Registers a schema, replacing any previous registration under the
    /// same `schema_id`.
    pub fn register(schema: Arc<dyn SchemaReflect>) {
        let id = schema.schema_id();
        SCHEMAS.write().unwrap().insert(id, schema);
    }

    /// Looks up a previously registered schema.
    pub fn get(schema_id: u32) -> Result<Arc<dyn SchemaReflect>> {
        SCHEMAS
            .read()
            .unwrap()
            .get(&schema_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown schema code {schema_id}"))
    }

    /// All currently registered schemas. Used by startup scans that need to
    /// check for an on-disk `[schemaID]` directory per registered schema,
    /// rather than reverse-decoding directory names.
    pub fn all() -> Vec<Arc<dyn SchemaReflect>> {
        SCHEMAS.read().unwrap().values().cloned().collect()
    }

    /// Base-62 encodes a schema id into the directory name used under
    /// `vcpuK/`.
    pub fn schema_dir_name(schema_id: u32) -> String {
        base62_encode(schema_id as u64)
    }

    fn base62_encode(mut n: u64) -> String {
        const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
        if n == 0 {
            return "0".to_string();
        }
        let mut out = Vec::new();
        while n > 0 {
            out.push(ALPHABET[(n % 62) as usize]);
            n /= 62;
        }
        out.reverse();
        String::from_utf8(out).unwrap()
    }
}

/// Returns an error carrying the given message; small helper so call sites
/// in generated write-procedures read naturally.
pub(crate) fn unsupported(what: &str) -> Result<()> {
    bail!("unsupported: {what}")
}

#[cfg(test)]
mod tests;
