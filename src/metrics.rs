//! In-process operation counters.
//!
//! Plain atomics bumped on the hot paths and snapshotted on demand through
//! [`crate::engine::Engine::metrics`]. Exposition (HTTP, logs, dashboards)
//! belongs to the embedding process.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct Metrics {
    write_ops: AtomicU64,
    read_ops: AtomicU64,
    cache_hits: AtomicU64,
    wal_bytes: AtomicU64,
    tables_flushed: AtomicU64,
    compactions: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_writes(&self, count: u64) {
        self.write_ops.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_read(&self) {
        self.read_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wal_write(&self, bytes: u64) {
        self.wal_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.tables_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_ops(&self) -> u64 {
        self.write_ops.load(Ordering::Relaxed)
    }

    pub fn read_ops(&self) -> u64 {
        self.read_ops.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn wal_bytes(&self) -> u64 {
        self.wal_bytes.load(Ordering::Relaxed)
    }

    pub fn tables_flushed(&self) -> u64 {
        self.tables_flushed.load(Ordering::Relaxed)
    }

    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the engine: cumulative counters plus the current
/// shape of the in-memory and on-disk state.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub write_ops: u64,
    pub read_ops: u64,
    pub cache_hits: u64,
    pub wal_bytes: u64,
    pub tables_flushed: u64,
    pub compactions: u64,
    pub memtable_size: i64,
    pub immutable_count: usize,
    pub frozen_wal_count: usize,
    pub level_table_counts: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();

        metrics.record_writes(10);
        metrics.record_writes(5);
        metrics.record_read();
        metrics.record_cache_hit();
        metrics.record_wal_write(128);
        metrics.record_flush();
        metrics.record_compaction();

        assert_eq!(metrics.write_ops(), 15);
        assert_eq!(metrics.read_ops(), 1);
        assert_eq!(metrics.cache_hits(), 1);
        assert_eq!(metrics.wal_bytes(), 128);
        assert_eq!(metrics.tables_flushed(), 1);
        assert_eq!(metrics.compactions(), 1);
    }
}
