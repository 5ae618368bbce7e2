//! Applies a decoded WAL record to a live `SlotStore`. Shared between
//! real-time writes (`write.rs` appends the record, then applies the exact
//! same value) and startup replay (`recovery.rs` applies records read back
//! off disk) so the two paths can never drift apart.

use schema::{SchemaReflect, SlotValueType};
use slotstore::SlotStore;
use wal::WalRecord;

/// `Field` WAL payloads are `[field_id][field_bytes]` — the field id rides
/// along with the value since `WalRecord::Field` itself carries no field
/// identifier of its own.
pub fn encode_field_payload(field_id: u8, field_bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + field_bytes.len());
    out.push(field_id);
    out.extend_from_slice(field_bytes);
    out
}

/// `WProc` WAL payloads are `[field_id][opcode][args]`.
pub fn encode_wproc_payload(field_id: u8, opcode: u8, args: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + args.len());
    out.push(field_id);
    out.push(opcode);
    out.extend_from_slice(args);
    out
}

/// The partition-hash primitive: every caller (mount's wire parser, this
/// crate's own tests, replay below) derives `H` from raw partition-key
/// bytes the same way, so a `CreatePartition` record replays to the same
/// hash a live caller would have passed in.
pub fn partition_hash(pkey: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(pkey)
}

/// Applies `record` to `live`. Malformed payloads (a torn write that
/// nonetheless passed the WAL's own commit-byte check) are skipped rather
/// than panicking — replay's job is to recover as much state as it safely
/// can, not to re-validate every write.
pub fn apply_record(live: &mut SlotStore, schema: &dyn SchemaReflect, record: &WalRecord) {
    match record {
        WalRecord::CreatePartition { pkey } => {
            let h = partition_hash(pkey);
            live.get_or_create_partition(h, pkey.clone(), schema.has_sort_keys());
        }
        WalRecord::Field { partition_hash, sort_key, payload } => {
            if payload.is_empty() {
                return;
            }
            let field_id = payload[0];
            let field_bytes = &payload[1..];
            let (vtype, mut buf) = existing_or_fresh(live, *partition_hash, sort_key);
            if schema.apply_field_write(vtype, &mut buf, field_id, field_bytes).is_ok() {
                live.create_slot(*partition_hash, sort_key, vtype, &buf);
            }
        }
        WalRecord::Table { partition_hash, sort_key, payload } => {
            live.create_slot(*partition_hash, sort_key, SlotValueType::SchemaInstance, payload);
        }
        WalRecord::WProc { partition_hash, sort_key, payload } => {
            if payload.len() < 2 {
                return;
            }
            let field_id = payload[0];
            let opcode = payload[1];
            let args = &payload[2..];
            let (vtype, mut buf) = existing_or_fresh(live, *partition_hash, sort_key);
            if schema.apply_write_procedure(vtype, &mut buf, field_id, opcode, args).is_ok() {
                live.create_slot(*partition_hash, sort_key, vtype, &buf);
            }
        }
        WalRecord::Remov { partition_hash, sort_key } => {
            if live.partition(*partition_hash).is_some() {
                live.create_slot(*partition_hash, sort_key, SlotValueType::Tombstone, &[]);
            }
        }
        WalRecord::Reset { partition_hash, sort_key } => {
            if live.partition(*partition_hash).is_some() {
                let default = schema.construct_default();
                live.create_slot(*partition_hash, sort_key, SlotValueType::SchemaInstance, &default);
            }
        }
    }
}

fn existing_or_fresh(live: &SlotStore, h: u64, sort_key: &[u8]) -> (SlotValueType, Vec<u8>) {
    live.find_slot(h, sort_key)
        .map(|s| (s.vtype, s.buffer.clone()))
        .unwrap_or((SlotValueType::FieldSequence, Vec::new()))
}
