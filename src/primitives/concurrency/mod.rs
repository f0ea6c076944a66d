#![forbid(unsafe_code)]

//! Page latches.
//!
//! Every operation collects the latches it holds in a [`LatchSet`] and keeps
//! them until the set is dropped, normally right after its transaction
//! commits or aborts. Operations acquire in a fixed hierarchy:
//!
//! ```text
//! 1. meta page (page 0), standing in for the whole tree structure
//! 2. the leaf holding the key
//! 3. the blob index page of a large value
//! 4. blob data blocks, in the order chosen by the operation
//! ```
//!
//! A wait that exceeds the table timeout fails with
//! [`KvError::LatchTimeout`] instead of blocking forever.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{
    lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard},
    Mutex, RawRwLock, RwLock,
};
use tracing::{debug, trace};

use crate::types::{KvError, PageId, Result};

/// Strength of a page latch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LatchMode {
    /// Many holders, no writers.
    Shared,
    /// Single holder.
    Exclusive,
}

/// Counters for latch traffic.
#[derive(Default, Debug)]
pub struct LatchStats {
    acquired: AtomicU64,
    contended: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of [`LatchStats`].
#[derive(Default, Debug, Clone, Copy)]
pub struct LatchStatsSnapshot {
    /// Latches granted.
    pub acquired: u64,
    /// Grants that had to wait.
    pub contended: u64,
    /// Waits that gave up.
    pub timeouts: u64,
}

impl LatchStats {
    /// Copies the counters.
    pub fn snapshot(&self) -> LatchStatsSnapshot {
        LatchStatsSnapshot {
            acquired: self.acquired.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Reader/writer latches keyed by page id, created on demand.
pub struct LatchTable {
    entries: Mutex<HashMap<PageId, Arc<RwLock<()>>>>,
    timeout: Duration,
    stats: LatchStats,
}

impl LatchTable {
    /// Creates a table whose waits give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
            stats: LatchStats::default(),
        }
    }

    /// Starts an empty set of held latches.
    pub fn begin(&self) -> LatchSet<'_> {
        LatchSet {
            table: self,
            held: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Number of pages that currently have a latch entry.
    pub fn live_entries(&self) -> usize {
        self.entries.lock().len()
    }

    /// Latch traffic counters.
    pub fn stats(&self) -> &LatchStats {
        &self.stats
    }

    fn entry(&self, id: PageId) -> Arc<RwLock<()>> {
        let mut entries = self.entries.lock();
        Arc::clone(entries.entry(id).or_insert_with(|| Arc::new(RwLock::new(()))))
    }

    fn lock(&self, id: PageId, mode: LatchMode) -> Result<HeldGuard> {
        let entry = self.entry(id);
        let fast = match mode {
            LatchMode::Shared => entry.try_read_arc().map(HeldGuard::Shared),
            LatchMode::Exclusive => entry.try_write_arc().map(HeldGuard::Exclusive),
        };
        let guard = match fast {
            Some(guard) => guard,
            None => {
                self.stats.contended.fetch_add(1, Ordering::Relaxed);
                let slow = match mode {
                    LatchMode::Shared => entry
                        .try_read_arc_for(self.timeout)
                        .map(HeldGuard::Shared),
                    LatchMode::Exclusive => entry
                        .try_write_arc_for(self.timeout)
                        .map(HeldGuard::Exclusive),
                };
                match slow {
                    Some(guard) => guard,
                    None => {
                        drop(entry);
                        self.forget_if_unused(id);
                        self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                        debug!(page = id.0, ?mode, "latch.timeout");
                        return Err(KvError::LatchTimeout(id.0));
                    }
                }
            }
        };
        self.stats.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(guard)
    }

    fn forget_if_unused(&self, id: PageId) {
        let mut entries = self.entries.lock();
        if entries
            .get(&id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            entries.remove(&id);
        }
    }
}

enum HeldGuard {
    Shared(ArcRwLockReadGuard<RawRwLock, ()>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, ()>),
}

struct Held {
    id: PageId,
    mode: LatchMode,
    guard: HeldGuard,
}

/// Latches held by a single operation.
pub struct LatchSet<'t> {
    table: &'t LatchTable,
    held: Vec<Held>,
    history: Vec<(PageId, LatchMode)>,
}

impl<'t> LatchSet<'t> {
    /// Acquires `id` in `mode` unless it is already held at least that strongly.
    pub fn acquire(&mut self, id: PageId, mode: LatchMode) -> Result<()> {
        if let Some(current) = self.holds(id) {
            return match (current, mode) {
                (LatchMode::Shared, LatchMode::Exclusive) => {
                    Err(KvError::Invalid("latch upgrade not supported"))
                }
                _ => Ok(()),
            };
        }
        let guard = self.table.lock(id, mode)?;
        trace!(page = id.0, ?mode, "latch.acquire");
        self.held.push(Held { id, mode, guard });
        self.history.push((id, mode));
        Ok(())
    }

    /// Releases `id` early. Returns false when it was not held.
    pub fn release(&mut self, id: PageId) -> bool {
        match self.held.iter().position(|held| held.id == id) {
            Some(pos) => {
                let held = self.held.remove(pos);
                drop(held.guard);
                self.table.forget_if_unused(id);
                trace!(page = id.0, "latch.release");
                true
            }
            None => false,
        }
    }

    /// Mode `id` is held in, if any.
    pub fn holds(&self, id: PageId) -> Option<LatchMode> {
        self.held
            .iter()
            .find(|held| held.id == id)
            .map(|held| held.mode)
    }

    /// Every acquisition made through this set, in order.
    pub fn acquired(&self) -> &[(PageId, LatchMode)] {
        &self.history
    }
}

impl Drop for LatchSet<'_> {
    fn drop(&mut self) {
        while let Some(held) = self.held.pop() {
            let id = held.id;
            drop(held.guard);
            self.table.forget_if_unused(id);
        }
    }
}

/// Sink for the ordered block acquisitions issued by a modify operation.
pub trait AcquireBlocks {
    /// Acquires `id` for writing.
    fn acquire_block(&mut self, id: PageId) -> Result<()>;
}

impl AcquireBlocks for LatchSet<'_> {
    fn acquire_block(&mut self, id: PageId) -> Result<()> {
        self.acquire(id, LatchMode::Exclusive)
    }
}
