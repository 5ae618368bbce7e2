//! One worker per core (spec.md §4.F/§5): owns every `MemoryCache` for
//! partitions whose hash routes to this core, and processes operand tasks
//! serially against them. A [`crate::query::ParserState`] barrier is what
//! lets callers run many operands across many cores concurrently and still
//! observe a single synchronous result.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use config::{CacheConfig, LogsConfig};
use crossbeam_channel::Receiver;
use engine::MemoryCache;
use schema::SchemaReflect;

use crate::query::ParserState;
use crate::wire::Operator;

pub struct OperandTask {
    pub operand_idx: usize,
    pub schema_id: u32,
    pub h: u64,
    pub sort_key: Vec<u8>,
    pub operators: Vec<Operator>,
    pub state: Arc<ParserState>,
}

pub enum Task {
    Operand(OperandTask),
    Shutdown,
}

pub struct Worker {
    core: usize,
    dir: PathBuf,
    cache_cfg: CacheConfig,
    logs_cfg: LogsConfig,
    caches: HashMap<u32, MemoryCache>,
}

impl Worker {
    pub fn new(core: usize, root: PathBuf, cache_cfg: CacheConfig, logs_cfg: LogsConfig) -> Self {
        Self { core, dir: root.join(format!("vcpu{core}")), cache_cfg, logs_cfg, caches: HashMap::new() }
    }

    /// Opens a `MemoryCache` for every schema whose on-disk directory already
    /// exists under this core's root, triggering WAL replay for each. Brand
    /// new schemas are opened lazily on first write instead of here, since
    /// they have no directory yet to discover.
    pub fn warm_start(&mut self) -> anyhow::Result<()> {
        for schema in schema::registry::all() {
            let schema_dir = self.dir.join(schema::registry::schema_dir_name(schema.schema_id()));
            if schema_dir.is_dir() {
                self.open_schema(schema)?;
            }
        }
        Ok(())
    }

    fn open_schema(&mut self, schema: Arc<dyn SchemaReflect>) -> anyhow::Result<&MemoryCache> {
        let schema_id = schema.schema_id();
        if !self.caches.contains_key(&schema_id) {
            let dir = self.dir.join(schema::registry::schema_dir_name(schema_id));
            let cache = MemoryCache::open(dir, schema, self.cache_cfg.clone(), self.logs_cfg.clone())?;
            self.caches.insert(schema_id, cache);
        }
        Ok(self.caches.get(&schema_id).unwrap())
    }

    fn cache_for(&mut self, schema_id: u32) -> anyhow::Result<&MemoryCache> {
        if self.caches.contains_key(&schema_id) {
            return Ok(self.caches.get(&schema_id).unwrap());
        }
        let schema = schema::registry::get(schema_id)?;
        self.open_schema(schema)
    }

    pub fn run(mut self, rx: Receiver<Task>) {
        for task in rx {
            match task {
                Task::Operand(op) => self.process(op),
                Task::Shutdown => break,
            }
        }
        for cache in self.caches.values() {
            cache.drain_flushes();
        }
    }

    fn process(&mut self, task: OperandTask) {
        let OperandTask { operand_idx, schema_id, h, sort_key, operators, state } = task;
        let cache = match self.cache_for(schema_id) {
            Ok(c) => c.clone(),
            Err(err) => {
                tracing::error!(core = self.core, schema_id, error = %err, "failed to open cache for operand");
                state.task_done();
                return;
            }
        };

        for (operator_idx, operator) in operators.iter().enumerate() {
            if let Err(err) = self.apply_operator(&cache, h, &sort_key, operator, operand_idx, operator_idx, &state) {
                tracing::warn!(core = self.core, h, operator_idx, error = %err, "operator failed");
            }
        }
        state.task_done();
    }

    fn apply_operator(
        &self,
        cache: &MemoryCache,
        h: u64,
        sort_key: &[u8],
        operator: &Operator,
        operand_idx: usize,
        operator_idx: usize,
        state: &ParserState,
    ) -> anyhow::Result<()> {
        match operator {
            Operator::Reset => cache.reset(h, synthetic_pkey(h), sort_key, QUERY_ORIGIN),
            Operator::Remove => cache.remove(h, sort_key, QUERY_ORIGIN),
            Operator::Write { field_id, bytes } => {
                cache.write(h, synthetic_pkey(h), sort_key, engine::WriteOp::Field { field_id: *field_id, bytes }, QUERY_ORIGIN)
            }
            Operator::WProc { field_id, opcode, bytes } => {
                cache.write(h, synthetic_pkey(h), sort_key, engine::WriteOp::WProc { field_id: *field_id, opcode: *opcode, args: bytes }, QUERY_ORIGIN)
            }
            Operator::Read { field_id } => {
                let mut value = None;
                cache.read(h, sort_key, engine::FieldBitmap::single(*field_id), |_, bytes| value = Some(bytes.to_vec()))?;
                state.record_read(operand_idx, operator_idx, *field_id, value);
                Ok(())
            }
        }
    }
}

/// The wire protocol addresses partitions purely by hash — it never carries
/// the original partition-key bytes a `Fetch` resolved to. `MemoryCache`
/// still needs *some* non-empty key to persist for a brand new partition
/// (used only by a later flush, never for lookups, which are keyed by hash
/// throughout), so a query-driven first write hands it the hash's own raw
/// bytes in place of a real one.
fn synthetic_pkey(h: u64) -> Vec<u8> {
    h.to_le_bytes().to_vec()
}

/// The query wire protocol has no lock/origin operator (spec.md §6), so
/// every write routed through a worker uses this fixed, unprivileged
/// origin. It can still be blocked by a lock some other originator holds
/// via a direct `MemoryCache::lock` call.
const QUERY_ORIGIN: u64 = 0;
