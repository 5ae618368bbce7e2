//! # mount — core-pool query dispatcher
//!
//! Generalizes the old single-process REPL-to-`Engine` wiring into a fixed
//! pool of workers, one per core, each owning every `engine::MemoryCache`
//! for partitions whose hash routes to it (spec.md §4.F). A query packet is
//! a concatenation of operand groups (see [`wire`]); `Mount::query_sync`
//! parses it, fans each operand out to its owning worker, and blocks until
//! all of them finish before handing back `Read` results in the packet's
//! original order.
//!
//! ## Module layout
//!
//! | Module    | Purpose                                                  |
//! |-----------|-----------------------------------------------------------|
//! | [`wire`]  | Query-packet parsing (`Fetch` + operators)                |
//! | [`query`] | `ParserState` fan-out/join barrier, `ReadResult`           |
//! | [`worker`]| Per-core worker thread owning a `HashMap<schema, MemoryCache>` |

mod query;
mod wire;
mod worker;

pub use query::ReadResult;
pub use wire::Operator;

use std::thread::JoinHandle;

use anyhow::Result;
use config::Config;
use crossbeam_channel::Sender;

use query::ParserState;
use worker::{OperandTask, Task, Worker};

/// A running core pool. Dropping a `Mount` does not shut it down cleanly —
/// call `shutdown()` for that.
pub struct Mount {
    cores: usize,
    senders: Vec<Sender<Task>>,
    handles: Vec<JoinHandle<()>>,
}

impl Mount {
    /// Starts one worker thread per `cfg.mnt.cores`. Each worker walks
    /// `root/vcpuK/` for every registered schema's directory and opens (and
    /// replays) a `MemoryCache` for each one found before the pool accepts
    /// any queries.
    pub fn open(cfg: &Config) -> Result<Self> {
        let cores = cfg.mnt.cores.max(1);
        if cfg.mnt.numa {
            tracing::debug!("NUMA pinning requested but not wired to a pinning backend; workers run unpinned");
        }

        let mut senders = Vec::with_capacity(cores);
        let mut handles = Vec::with_capacity(cores);
        for core in 0..cores {
            let mut worker = Worker::new(core, cfg.root.clone(), cfg.cache.clone(), cfg.logs.clone());
            worker.warm_start()?;

            let (tx, rx) = crossbeam_channel::unbounded();
            let handle = std::thread::Builder::new().name(format!("mount-core-{core}")).spawn(move || worker.run(rx))?;
            senders.push(tx);
            handles.push(handle);
        }

        Ok(Self { cores, senders, handles })
    }

    /// Parses `packet` and runs every operand to completion before
    /// returning, collecting `Read` results in the packet's original
    /// operand/operator order. An operand whose schema code doesn't resolve
    /// aborts parsing from that point on (see `wire` for why).
    pub fn query_sync(&self, packet: &[u8]) -> Result<Vec<ReadResult>> {
        let operands = wire::parse_packet(packet, |schema_id, rest| {
            let schema = schema::registry::get(schema_id).ok()?;
            Some(if schema.has_sort_keys() { schema.sort_key_len(rest) } else { 0 })
        });

        let state = std::sync::Arc::new(ParserState::new(operands.len()));
        for (operand_idx, operand) in operands.iter().enumerate() {
            let core = (operand.h as usize) % self.cores;
            let task = OperandTask {
                operand_idx,
                schema_id: operand.schema_id,
                h: operand.h,
                sort_key: operand.sort_key.clone(),
                operators: operand.operators.clone(),
                state: std::sync::Arc::clone(&state),
            };
            // Channel is unbounded and the worker never blocks on it, so a
            // send only fails if that worker thread has already exited.
            let _ = self.senders[core].send(Task::Operand(task));
        }

        state.wait();

        let mut results = Vec::new();
        for (operand_idx, operand) in operands.iter().enumerate() {
            for (operator_idx, op) in operand.operators.iter().enumerate() {
                if matches!(op, Operator::Read { .. }) {
                    if let Some((field_id, value)) = state.take_read(operand_idx, operator_idx) {
                        results.push(ReadResult { operand_idx, field_id, value });
                    }
                }
            }
        }
        Ok(results)
    }

    /// Signals every worker to stop, joins them, and waits for any flush
    /// they kicked off before exiting to drain.
    pub fn shutdown(self) -> Result<()> {
        for sender in &self.senders {
            let _ = sender.send(Task::Shutdown);
        }
        for handle in self.handles {
            handle.join().map_err(|_| anyhow::anyhow!("worker thread panicked"))?;
        }
        Ok(())
    }
}
