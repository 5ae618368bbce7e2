//! `write()`, `reset()`, `remove()` (spec.md §4.E). All three append a WAL
//! record and then apply that exact record to the live store via
//! `apply::apply_record`, so a restart's replay can never compute a
//! different result than the live write did.

use anyhow::Result;
use wal::WalRecord;

use crate::{apply, MemoryCache};

/// One write operation against an existing or freshly-created slot.
#[derive(Clone, Copy)]
pub enum WriteOp<'a> {
    /// Replaces field `field_id`'s value within a `FieldSequence` or
    /// `SchemaInstance` slot.
    Field { field_id: u8, bytes: &'a [u8] },
    /// Replaces the whole slot with a full schema-encoded record.
    Table { bytes: &'a [u8] },
    /// Runs write-procedure `(field_id, opcode)` with `args`.
    WProc { field_id: u8, opcode: u8, args: &'a [u8] },
}

impl MemoryCache {
    /// Writes `op` at `(h, sort_key)`, creating the partition (and logging
    /// `CreatePartition`) first if `h` is new to this live generation.
    ///
    /// A no-op (returns `Ok(())` without touching the WAL or live store) if
    /// `(h, sort_key)` is currently locked by an originator other than
    /// `origin` — spec.md §4.E/§7's "lock conflict" contract.
    pub fn write(&self, h: u64, pkey: Vec<u8>, sort_key: &[u8], op: WriteOp, origin: u64) -> Result<()> {
        if self.inner.locks.lock().is_locked_by_other(h, sort_key, origin) {
            return Ok(());
        }
        let mut state = self.inner.state.lock();
        let (_, created) = state.live.get_or_create_partition(h, pkey.clone(), self.inner.schema.has_sort_keys());
        if created && self.inner.logs_cfg.enable {
            state.wal.append(&WalRecord::CreatePartition { pkey })?;
        }

        let record = match op {
            WriteOp::Field { field_id, bytes } => WalRecord::Field {
                partition_hash: h,
                sort_key: sort_key.to_vec(),
                payload: apply::encode_field_payload(field_id, bytes),
            },
            WriteOp::Table { bytes } => {
                WalRecord::Table { partition_hash: h, sort_key: sort_key.to_vec(), payload: bytes.to_vec() }
            }
            WriteOp::WProc { field_id, opcode, args } => WalRecord::WProc {
                partition_hash: h,
                sort_key: sort_key.to_vec(),
                payload: apply::encode_wproc_payload(field_id, opcode, args),
            },
        };

        if self.inner.logs_cfg.enable {
            state.wal.append(&record)?;
        }
        apply::apply_record(&mut state.live, self.inner.schema.as_ref(), &record);

        let slot_len = state.live.find_slot(h, sort_key).map(|s| s.buffer.len()).unwrap_or(0);
        state.live.record_write_pressure(slot_len, sort_key.len());
        drop(state);
        self.maybe_flush()
    }

    /// Clears the slot at `(h, sort_key)` back to its schema default,
    /// creating the partition first if needed. No-op under the same lock
    /// contract as [`MemoryCache::write`].
    pub fn reset(&self, h: u64, pkey: Vec<u8>, sort_key: &[u8], origin: u64) -> Result<()> {
        if self.inner.locks.lock().is_locked_by_other(h, sort_key, origin) {
            return Ok(());
        }
        let mut state = self.inner.state.lock();
        let (_, created) = state.live.get_or_create_partition(h, pkey.clone(), self.inner.schema.has_sort_keys());
        if created && self.inner.logs_cfg.enable {
            state.wal.append(&WalRecord::CreatePartition { pkey })?;
        }

        let record = WalRecord::Reset { partition_hash: h, sort_key: sort_key.to_vec() };
        if self.inner.logs_cfg.enable {
            state.wal.append(&record)?;
        }
        apply::apply_record(&mut state.live, self.inner.schema.as_ref(), &record);

        let default_len = self.inner.schema.construct_default().len();
        state.live.record_reset_pressure(default_len);
        drop(state);
        self.maybe_flush()
    }

    /// Writes a tombstone at `(h, sort_key)`, shadowing any older value for
    /// it. If this cache has never seen `h`'s partition key, a placeholder
    /// entry with an empty `pkey` is created to host the tombstone — a
    /// later flush of that placeholder writes an empty partition key, which
    /// only matters if this same `h` is later re-created with a real one.
    /// No-op under the same lock contract as [`MemoryCache::write`].
    pub fn remove(&self, h: u64, sort_key: &[u8], origin: u64) -> Result<()> {
        if self.inner.locks.lock().is_locked_by_other(h, sort_key, origin) {
            return Ok(());
        }
        let mut state = self.inner.state.lock();
        let (_, created) = state.live.get_or_create_partition(h, Vec::new(), self.inner.schema.has_sort_keys());
        if created && self.inner.logs_cfg.enable {
            state.wal.append(&WalRecord::CreatePartition { pkey: Vec::new() })?;
        }

        let record = WalRecord::Remov { partition_hash: h, sort_key: sort_key.to_vec() };
        if self.inner.logs_cfg.enable {
            state.wal.append(&record)?;
        }
        apply::apply_record(&mut state.live, self.inner.schema.as_ref(), &record);
        state.live.record_remove_pressure();
        drop(state);
        self.maybe_flush()
    }
}
