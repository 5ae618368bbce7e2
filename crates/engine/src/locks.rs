//! Advisory per-`(H, S)` lock table (spec.md §4.D/§7): a lock is held by an
//! originator token and expires on its own after a TTL, so a caller that
//! crashes while holding one doesn't wedge the slot forever.
//! `MemoryCache::write`/`reset`/`remove` each check this table first and
//! silently no-op when `(H, S)` is held by a different originator than the
//! one the caller passed in — the wire protocol has no lock operator of its
//! own (spec.md §6), so queries routed through `mount` always write with
//! origin `0`; only direct `MemoryCache::lock`/`unlock` callers can contend.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

struct LockEntry {
    origin: u64,
    expires_at: Instant,
}

pub struct LockTable {
    max_locks: usize,
    ttl: Duration,
    entries: HashMap<(u64, Vec<u8>), LockEntry>,
    order: VecDeque<(u64, Vec<u8>)>,
}

impl LockTable {
    pub fn new(max_locks: usize) -> Self {
        Self::with_ttl(max_locks, Duration::from_secs(30))
    }

    pub fn with_ttl(max_locks: usize, ttl: Duration) -> Self {
        Self { max_locks: max_locks.max(1), ttl, entries: HashMap::new(), order: VecDeque::new() }
    }

    fn expire(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
    }

    /// Acquires (or renews) the lock at `(h, sort_key)` for `origin`.
    /// Returns `false` if another originator currently holds it.
    pub fn acquire(&mut self, h: u64, sort_key: &[u8], origin: u64) -> bool {
        self.expire();
        let key = (h, sort_key.to_vec());
        if let Some(entry) = self.entries.get(&key) {
            if entry.origin != origin {
                return false;
            }
        } else {
            if self.entries.len() >= self.max_locks {
                if let Some(victim) = self.order.pop_front() {
                    self.entries.remove(&victim);
                }
            }
            self.order.push_back(key.clone());
        }
        self.entries.insert(key, LockEntry { origin, expires_at: Instant::now() + self.ttl });
        true
    }

    /// Releases the lock at `(h, sort_key)` if `origin` holds it.
    pub fn release(&mut self, h: u64, sort_key: &[u8], origin: u64) {
        let key = (h, sort_key.to_vec());
        if self.entries.get(&key).is_some_and(|e| e.origin == origin) {
            self.entries.remove(&key);
        }
    }

    /// Whether `(h, sort_key)` is currently held by an originator other
    /// than `origin`.
    pub fn is_locked_by_other(&mut self, h: u64, sort_key: &[u8], origin: u64) -> bool {
        self.expire();
        self.entries.get(&(h, sort_key.to_vec())).is_some_and(|e| e.origin != origin)
    }
}
