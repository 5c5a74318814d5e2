//! The engine: public API surface and the point-lookup read path.
//!
//! `Engine::open` recovers on-disk state, takes the directory lock, and
//! starts the background agents; the returned handle is the only way in.
//! Writes go through the sharded ingestion router and block until
//! acknowledged. Reads walk the layers newest to oldest and stop at the
//! first definitive answer:
//!
//! 1. hot-key cache
//! 2. active memtable
//! 3. immutable memtables, newest first
//! 4. per level ascending, each SSTable newest first, bloom-gated
//!
//! A tombstone or an expired entry anywhere in that walk is a definitive
//! "not found"; callers cannot distinguish missing, deleted and expired.
//!
//! `close` shuts down gracefully: intake stops, workers drain, agents join,
//! and remaining memtables are flushed so a clean shutdown leaves no WAL
//! backlog. Dropping the engine without `close` stops the agents but skips
//! the final flush; the WAL then carries the unflushed tail, exactly as
//! after a crash.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::agents::{self, compact, flush, ingest};
use crate::config::EngineConfig;
use crate::entry::{unix_now_ns, Entry};
use crate::error::Result;
use crate::flock::FileLock;
use crate::memtable::Memtable;
use crate::metrics::MetricsSnapshot;
use crate::recovery;
use crate::sstable::find_in_sst;
use crate::state::EngineState;

const LOCK_FILE: &str = "cinderdb.lock";

pub struct Engine {
    state: Arc<EngineState>,
    router: Option<ingest::IngestRouter>,
    ingest_handles: Vec<JoinHandle<()>>,
    agent_handles: Vec<JoinHandle<()>>,
    _lock: FileLock,
}

impl Engine {
    /// Open an engine over the configured data directory, recovering any
    /// state a previous process left there, and start the background
    /// agents.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let config = config.normalized();

        std::fs::create_dir_all(&config.data_dir)?;
        if let Some(parent) = config.wal_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock = FileLock::acquire(config.data_dir.join(LOCK_FILE))?;

        let state = Arc::new(recovery::recover(config)?);

        let (router, ingest_handles) = ingest::start(Arc::clone(&state))?;
        let agent_handles = vec![
            agents::spawn("cinderdb-flush", Arc::clone(&state), flush::run)?,
            agents::spawn("cinderdb-compact", Arc::clone(&state), compact::run)?,
        ];

        tracing::info!(
            data_dir = %state.config.data_dir.display(),
            durability = state.config.durability,
            "engine opened"
        );

        Ok(Self {
            state,
            router: Some(router),
            ingest_handles,
            agent_handles,
            _lock: lock,
        })
    }

    /// Write a key. `ttl_secs` of 0 means the entry never expires. Returns
    /// once the write is durable (under durability) and visible to reads.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, ttl_secs: u32) -> Result<()> {
        self.router().submit(key, value, ttl_secs, false)
    }

    /// Write many keys at once, grouped by shard and acknowledged together.
    /// The result is the first error any shard reports.
    pub fn put_batch(&self, items: Vec<(Vec<u8>, Vec<u8>, u32)>) -> Result<()> {
        self.router().submit_batch(items)
    }

    /// Delete a key by writing a tombstone.
    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        self.router().submit(key, Vec::new(), 0, true)
    }

    /// Point lookup. `Ok(None)` covers missing, deleted and expired keys
    /// alike.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.state.metrics.record_read();

        if let Some(value) = self.state.cache.get(key) {
            self.state.metrics.record_cache_hit();
            return Ok(Some(value));
        }

        let now_ns = unix_now_ns();

        // Memory layers under the shared lock; the level vectors are
        // snapshotted so disk reads run without blocking writers.
        let levels = {
            let shared = self.state.shared.read().unwrap();

            if let Some(entry) = shared.memtable.get(key) {
                return Ok(live_value(entry, now_ns));
            }

            for memtable in shared.immutables.iter().rev() {
                if let Some(entry) = memtable.get(key) {
                    let value = live_value(entry, now_ns);
                    if let Some(value) = &value {
                        self.state.cache.put(key.to_vec(), value.clone());
                    }
                    return Ok(value);
                }
            }

            shared.levels.clone()
        };

        for level in &levels {
            for table in level.iter().rev() {
                if !self.state.bloom.may_contain(table.file_id, key) {
                    continue;
                }
                if let Some(entry) = find_in_sst(table, key)? {
                    let value = live_value(entry, now_ns);
                    if let Some(value) = &value {
                        self.state.cache.put(key.to_vec(), value.clone());
                    }
                    return Ok(value);
                }
            }
        }

        Ok(None)
    }

    /// Point-in-time counters and state shape.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.state.snapshot()
    }

    /// Graceful shutdown: stop intake, drain the workers, join the agents,
    /// and flush everything still in memory so the WAL retires cleanly.
    pub fn close(mut self) -> Result<()> {
        self.shutdown(true)
    }

    fn router(&self) -> &ingest::IngestRouter {
        // Present for the whole public lifetime; only shutdown takes it.
        self.router.as_ref().expect("engine router already shut down")
    }

    fn shutdown(&mut self, final_flush: bool) -> Result<()> {
        let Some(router) = self.router.take() else {
            return Ok(());
        };

        // Closing the shard channels lets each worker drain its queue and
        // exit; joining them means no further writes can arrive.
        drop(router);
        for handle in self.ingest_handles.drain(..) {
            let _ = handle.join();
        }

        self.state.begin_shutdown();
        for handle in self.agent_handles.drain(..) {
            let _ = handle.join();
        }

        if final_flush {
            self.drain_memtables()?;
        }

        tracing::info!(final_flush, "engine closed");
        Ok(())
    }

    /// Freeze the active memtable and flush every immutable in order. Runs
    /// after the agents have stopped, so it owns the flush path alone.
    fn drain_memtables(&self) -> Result<()> {
        {
            let mut shared = self.state.shared.write().unwrap();
            if !shared.memtable.is_empty() {
                let old = std::mem::replace(&mut shared.memtable, Arc::new(Memtable::new()));
                shared.immutables.push_back(old);
                if let Some(wal) = shared.active_wal.take() {
                    shared.frozen_wals.push_back(wal);
                }
            }
        }

        let mut buffer = Vec::new();
        while flush::flush_oldest(&self.state, &mut buffer)? {}
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // No final flush here: the WAL already holds everything
        // acknowledged, and replay on the next open recovers it.
        let _ = self.shutdown(false);
    }
}

fn live_value(entry: Entry, now_ns: i64) -> Option<Vec<u8>> {
    if entry.tombstone || entry.is_expired(now_ns) {
        return None;
    }
    Some(entry.value)
}
