//! Fan-out/join barrier for one query packet (spec.md §6 `Execute<Sync>`).
//!
//! The wire format has no `Execute` byte of its own — it's a calling
//! convention, not an operator. `Mount::query_sync` parses a whole packet,
//! dispatches one task per operand to the worker that owns its hash, then
//! blocks on a [`ParserState`] until every worker has finished before
//! assembling `Read` results back in the packet's original operand/operator
//! order.

use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};

pub struct ParserState {
    remaining: Mutex<usize>,
    done: Condvar,
    reads: Mutex<HashMap<(usize, usize), (u8, Option<Vec<u8>>)>>,
}

impl ParserState {
    pub fn new(outstanding: usize) -> Self {
        Self { remaining: Mutex::new(outstanding), done: Condvar::new(), reads: Mutex::new(HashMap::new()) }
    }

    pub fn task_done(&self) {
        let mut remaining = self.remaining.lock();
        *remaining -= 1;
        if *remaining == 0 {
            self.done.notify_all();
        }
    }

    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.done.wait(&mut remaining);
        }
    }

    pub fn record_read(&self, operand_idx: usize, operator_idx: usize, field_id: u8, value: Option<Vec<u8>>) {
        self.reads.lock().insert((operand_idx, operator_idx), (field_id, value));
    }

    pub fn take_read(&self, operand_idx: usize, operator_idx: usize) -> Option<(u8, Option<Vec<u8>>)> {
        self.reads.lock().remove(&(operand_idx, operator_idx))
    }
}

/// One resolved `Read` operator's result, in the packet's original order.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub operand_idx: usize,
    pub field_id: u8,
    pub value: Option<Vec<u8>>,
}
