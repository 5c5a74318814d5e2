//! Shared engine state: the blackboard the three background agents and the
//! read path coordinate through.
//!
//! A single reader-writer lock guards the identities held in
//! [`EngineShared`]: which memtable is active, which are frozen, which WAL
//! is live, what tables each level holds. The internal mutable state of each
//! component (memtable shards, WAL file, bloom bits, cache) is guarded by
//! that component's own lock, so the engine lock is only ever held for
//! pointer swaps and queue edits, never across disk I/O.
//!
//! The flush agent is driven by a pending counter under its own mutex and
//! condvar. Rotation increments the counter after pushing onto the immutable
//! queue; the agent decrements before lifting work. A signal raised while
//! the agent is busy is retained by the counter, so wakeups cannot be
//! missed, and a spurious wakeup finds the counter at zero and goes back to
//! sleep.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Duration;

use crate::bloom::SharedBloom;
use crate::cache::KeyCache;
use crate::config::EngineConfig;
use crate::memtable::Memtable;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::sstable::SstMetadata;
use crate::wal::Wal;

/// Level slots allocated up front; levels 0 and 1 are in use, the rest are
/// reserved.
pub const LEVEL_SLOTS: usize = 4;

/// Expected item capacity used to size the shared bloom filter.
const BLOOM_EXPECTED_ITEMS: usize = 10_000_000;

/// Everything behind the engine's reader-writer lock. Each level vector is
/// in insertion order, oldest table first.
pub struct EngineShared {
    pub memtable: Arc<Memtable>,
    pub immutables: VecDeque<Arc<Memtable>>,
    pub active_wal: Option<Arc<Wal>>,
    pub frozen_wals: VecDeque<Arc<Wal>>,
    pub levels: Vec<Vec<Arc<SstMetadata>>>,
}

impl EngineShared {
    pub fn new() -> Self {
        Self {
            memtable: Arc::new(Memtable::new()),
            immutables: VecDeque::new(),
            active_wal: None,
            frozen_wals: VecDeque::new(),
            levels: (0..LEVEL_SLOTS).map(|_| Vec::new()).collect(),
        }
    }
}

impl Default for EngineShared {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EngineState {
    pub config: EngineConfig,
    pub shared: RwLock<EngineShared>,
    pub bloom: Arc<SharedBloom>,
    pub cache: Arc<KeyCache>,
    pub metrics: Arc<Metrics>,

    shutdown: AtomicBool,
    flush_pending: Mutex<usize>,
    flush_cv: Condvar,
    tick_lock: Mutex<()>,
    tick_cv: Condvar,
}

impl EngineState {
    pub fn new(config: EngineConfig, shared: EngineShared) -> Self {
        let bloom = Arc::new(SharedBloom::new(BLOOM_EXPECTED_ITEMS, config.bloom_fpr));
        let cache = Arc::new(KeyCache::new(config.key_cache_capacity));
        Self {
            config,
            shared: RwLock::new(shared),
            bloom,
            cache,
            metrics: Arc::new(Metrics::new()),
            shutdown: AtomicBool::new(false),
            flush_pending: Mutex::new(0),
            flush_cv: Condvar::new(),
            tick_lock: Mutex::new(()),
            tick_cv: Condvar::new(),
        }
    }

    /// Signal the flush agent that an immutable memtable is waiting.
    pub fn raise_flush(&self) {
        let mut pending = self.flush_pending.lock().unwrap();
        *pending += 1;
        self.flush_cv.notify_one();
    }

    /// Block until a flush signal arrives or shutdown begins. Consumes one
    /// signal and returns true; returns false on shutdown.
    pub fn wait_flush(&self) -> bool {
        let mut pending = self.flush_pending.lock().unwrap();
        loop {
            if *pending > 0 {
                *pending -= 1;
                return true;
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            pending = self.flush_cv.wait(pending).unwrap();
        }
    }

    /// Interruptible sleep for the compaction ticker. Returns false when the
    /// engine is shutting down, before or during the wait.
    pub fn sleep_interval(&self, interval: Duration) -> bool {
        let guard = self.tick_lock.lock().unwrap();
        if self.shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let (_guard, _timeout) = self.tick_cv.wait_timeout(guard, interval).unwrap();
        !self.shutdown.load(Ordering::SeqCst)
    }

    /// Flip the shutdown flag and wake every sleeping agent.
    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Hold each sleeper's mutex across the notify so an agent between
        // its flag check and its wait cannot miss the wakeup.
        {
            let _pending = self.flush_pending.lock().unwrap();
            self.flush_cv.notify_all();
        }
        {
            let _tick = self.tick_lock.lock().unwrap();
            self.tick_cv.notify_all();
        }
    }

    /// Cumulative counters plus the current shape of memory and disk state.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let shared = self.shared.read().unwrap();
        MetricsSnapshot {
            write_ops: self.metrics.write_ops(),
            read_ops: self.metrics.read_ops(),
            cache_hits: self.metrics.cache_hits(),
            wal_bytes: self.metrics.wal_bytes(),
            tables_flushed: self.metrics.tables_flushed(),
            compactions: self.metrics.compactions(),
            memtable_size: shared.memtable.size(),
            immutable_count: shared.immutables.len(),
            frozen_wal_count: shared.frozen_wals.len(),
            level_table_counts: shared.levels.iter().map(Vec::len).collect(),
        }
    }
}
