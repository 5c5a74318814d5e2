//! Sharded write ingestion.
//!
//! Writes are routed to a fixed set of worker threads by key hash, so all
//! updates for one key serialize through one worker while distinct keys
//! spread across all of them. Each worker coalesces queued requests into a
//! batch, appends the batch to the WAL in one call, applies it to the
//! memtable, and only then acknowledges every caller, so a successful submit
//! therefore means the write is durable (when durability is on) and visible
//! to subsequent reads.
//!
//! The shard channels are bounded, which is the engine's back-pressure:
//! callers block on a full queue rather than receiving an error. Memtable
//! rotation is triggered here, by the worker that observes the size
//! threshold; the exclusive re-check under the engine lock makes rotation
//! single-flighted when several workers observe it at once.

use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use crate::entry::{unix_now_ns, Entry};
use crate::error::{Error, Result};
use crate::hasher::fnv1a32;
use crate::memtable::Memtable;
use crate::state::EngineState;
use crate::wal::Wal;

/// Queue depth per shard; senders block beyond this.
const SHARD_QUEUE_DEPTH: usize = 10_000;

/// A worker drains queued requests until a batch reaches this many items.
const BATCH_TARGET: usize = 1000;

/// Hard item cap per batch; compound requests can push past the target.
const BATCH_CAP: usize = 2000;

pub(crate) struct WriteItem {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub ttl_secs: u32,
    pub tombstone: bool,
}

struct SingleRequest {
    item: WriteItem,
    reply: SyncSender<Result<()>>,
}

struct CompoundRequest {
    items: Vec<WriteItem>,
    reply: SyncSender<Result<()>>,
}

enum ShardRequest {
    Single(SingleRequest),
    Compound(CompoundRequest),
}

impl ShardRequest {
    fn item_count(&self) -> usize {
        match self {
            ShardRequest::Single(_) => 1,
            ShardRequest::Compound(c) => c.items.len().max(1),
        }
    }
}

/// Client half of the ingestion subsystem: routes requests to shard queues
/// and blocks callers on their acknowledgement. Dropping the router closes
/// every queue, which lets the workers drain and exit.
pub(crate) struct IngestRouter {
    shards: Vec<SyncSender<ShardRequest>>,
}

/// Spawn one worker per configured shard and return the router plus the
/// worker handles for joining at close.
pub(crate) fn start(state: Arc<EngineState>) -> Result<(IngestRouter, Vec<JoinHandle<()>>)> {
    let shard_count = state.config.ingest_shards();
    let mut senders = Vec::with_capacity(shard_count);
    let mut handles = Vec::with_capacity(shard_count);

    for shard_id in 0..shard_count {
        let (tx, rx) = mpsc::sync_channel(SHARD_QUEUE_DEPTH);
        let state = Arc::clone(&state);
        let handle = std::thread::Builder::new()
            .name(format!("cinderdb-ingest-{shard_id}"))
            .spawn(move || run_worker(shard_id, rx, state))?;
        senders.push(tx);
        handles.push(handle);
    }

    tracing::info!(shards = shard_count, "ingestion started");
    Ok((IngestRouter { shards: senders }, handles))
}

impl IngestRouter {
    /// Submit one write and block until the owning shard acknowledges it.
    pub fn submit(
        &self,
        key: Vec<u8>,
        value: Vec<u8>,
        ttl_secs: u32,
        tombstone: bool,
    ) -> Result<()> {
        check_lengths(&key, &value)?;

        let shard = self.shard_for(&key);
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let request = ShardRequest::Single(SingleRequest {
            item: WriteItem { key, value, ttl_secs, tombstone },
            reply: reply_tx,
        });

        self.shards[shard].send(request).map_err(|_| Error::Closed)?;
        reply_rx.recv().map_err(|_| Error::Closed)?
    }

    /// Submit many writes at once: items are grouped by shard, dispatched as
    /// one compound request per shard, and awaited together. The result is
    /// the first error any shard reports.
    pub fn submit_batch(&self, items: Vec<(Vec<u8>, Vec<u8>, u32)>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut groups: Vec<Vec<WriteItem>> =
            (0..self.shards.len()).map(|_| Vec::new()).collect();
        for (key, value, ttl_secs) in items {
            check_lengths(&key, &value)?;
            let shard = self.shard_for(&key);
            groups[shard].push(WriteItem { key, value, ttl_secs, tombstone: false });
        }

        let (reply_tx, reply_rx) = mpsc::sync_channel(self.shards.len());
        let mut dispatched = 0;
        for (shard, group) in groups.into_iter().enumerate() {
            if group.is_empty() {
                continue;
            }
            let request = ShardRequest::Compound(CompoundRequest {
                items: group,
                reply: reply_tx.clone(),
            });
            self.shards[shard].send(request).map_err(|_| Error::Closed)?;
            dispatched += 1;
        }
        drop(reply_tx);

        let mut first_error = None;
        for _ in 0..dispatched {
            match reply_rx.recv() {
                Ok(Err(e)) if first_error.is_none() => first_error = Some(e),
                Ok(_) => {}
                Err(_) => return Err(Error::Closed),
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn shard_for(&self, key: &[u8]) -> usize {
        fnv1a32(key) as usize % self.shards.len()
    }
}

fn check_lengths(key: &[u8], value: &[u8]) -> Result<()> {
    if key.len() > u32::MAX as usize {
        return Err(Error::InvalidData(format!("key length {} exceeds u32", key.len())));
    }
    if value.len() > u32::MAX as usize {
        return Err(Error::InvalidData(format!("value length {} exceeds u32", value.len())));
    }
    Ok(())
}

fn run_worker(shard_id: usize, queue: Receiver<ShardRequest>, state: Arc<EngineState>) {
    while let Ok(first) = queue.recv() {
        let mut batch = Vec::with_capacity(16);
        let mut pending_items = first.item_count();
        batch.push(first);

        // Opportunistically coalesce whatever else is already queued.
        while pending_items < BATCH_TARGET {
            match queue.try_recv() {
                Ok(request) => {
                    pending_items += request.item_count();
                    batch.push(request);
                    if pending_items >= BATCH_CAP {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        process_batch(shard_id, batch, &state);
    }
}

fn process_batch(shard_id: usize, batch: Vec<ShardRequest>, state: &EngineState) {
    let now_ns = unix_now_ns();
    let mut entries = Vec::new();
    let mut replies = Vec::with_capacity(batch.len());

    for request in batch {
        match request {
            ShardRequest::Single(single) => {
                entries.push(resolve_ttl(single.item, now_ns));
                replies.push(single.reply);
            }
            ShardRequest::Compound(compound) => {
                entries.extend(compound.items.into_iter().map(|i| resolve_ttl(i, now_ns)));
                replies.push(compound.reply);
            }
        }
    }

    // One consistent (wal, memtable) pair for the whole batch: rotation
    // holds the write lock, so both were active at the same instant.
    let (wal, memtable) = {
        let shared = state.shared.read().unwrap();
        (shared.active_wal.clone(), Arc::clone(&shared.memtable))
    };

    if state.config.durability {
        if let Some(wal) = wal {
            if let Err(e) = wal.write_batch(&entries) {
                tracing::error!(shard = shard_id, error = %e, "wal append failed, aborting batch");
                for reply in &replies {
                    let _ = reply.send(Err(e.clone()));
                }
                return;
            }
            let bytes: u64 = entries.iter().map(|e| e.wire_len() as u64).sum();
            state.metrics.record_wal_write(bytes);
        }
    }

    let count = entries.len() as u64;
    for entry in entries {
        let key = entry.key.clone();
        memtable.put(entry);
        state.cache.remove(&key);
    }
    state.metrics.record_writes(count);

    if memtable.size() >= state.config.max_memtable_size {
        maybe_rotate(state);
    }

    for reply in replies {
        let _ = reply.send(Ok(()));
    }
}

fn resolve_ttl(item: WriteItem, now_ns: i64) -> Entry {
    let expiry_ns = if item.ttl_secs > 0 {
        now_ns + i64::from(item.ttl_secs) * 1_000_000_000
    } else {
        0
    };
    Entry::new(item.key, item.value, expiry_ns, item.tombstone)
}

/// Rotate the active memtable (and WAL, when durable) if it is still over
/// the threshold. A second worker that lost the race finds the fresh
/// memtable under the lock and backs off.
fn maybe_rotate(state: &EngineState) {
    let rotated = {
        let mut shared = state.shared.write().unwrap();
        if shared.memtable.size() < state.config.max_memtable_size {
            false
        } else {
            let old = std::mem::replace(&mut shared.memtable, Arc::new(Memtable::new()));
            shared.immutables.push_back(old);

            if state.config.durability {
                rotate_wal(&mut shared, state);
            }
            true
        }
    };

    if rotated {
        tracing::info!("memtable rotated");
        state.raise_flush();
    }
}

/// Freeze the active WAL under a nanosecond-suffixed name and reopen the
/// base path fresh. The active log must always live at the base path, since that
/// is the one recovery replays. The frozen file takes the new name, not
/// the new file. A failure at either step keeps the old WAL active: writes
/// continue against it and the next over-threshold check retries.
fn rotate_wal(shared: &mut crate::state::EngineShared, state: &EngineState) {
    let Some(active) = shared.active_wal.clone() else {
        return;
    };

    let mut frozen_path = state.config.wal_path.as_os_str().to_owned();
    frozen_path.push(format!(".{}", unix_now_ns()));

    if let Err(e) = active.rename(&frozen_path) {
        tracing::warn!(error = %e, "wal rotation failed, continuing on current wal");
        return;
    }

    match Wal::open(&state.config.wal_path, true) {
        Ok(next) => {
            shared.frozen_wals.push_back(active);
            shared.active_wal = Some(Arc::new(next));
        }
        Err(e) => {
            tracing::warn!(error = %e, "wal rotation failed, continuing on current wal");
            // Undo the rename so the still-active log stays at the base
            // path for recovery.
            if let Err(e) = active.rename(&state.config.wal_path) {
                tracing::error!(error = %e, "failed to restore active wal path");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::state::EngineShared;

    fn open_state(config: EngineConfig) -> Arc<EngineState> {
        let config = config.normalized();
        let mut shared = EngineShared::new();
        if config.durability {
            shared.active_wal =
                Some(Arc::new(Wal::open(&config.wal_path, true).unwrap()));
        }
        Arc::new(EngineState::new(config, shared))
    }

    fn shutdown(router: IngestRouter, handles: Vec<JoinHandle<()>>) {
        drop(router);
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_submit_is_visible_in_memtable() {
        let dir = tempfile::tempdir().unwrap();
        let state = open_state(EngineConfig::new(dir.path()).max_cpu_count(2));
        let (router, handles) = start(Arc::clone(&state)).unwrap();

        router.submit(b"key".to_vec(), b"value".to_vec(), 0, false).unwrap();

        let entry = {
            let shared = state.shared.read().unwrap();
            shared.memtable.get(b"key").unwrap()
        };
        assert_eq!(entry.value, b"value");
        assert!(!entry.tombstone);
        assert_eq!(entry.expiry_ns, 0);

        shutdown(router, handles);
    }

    #[test]
    fn test_submit_resolves_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let state = open_state(EngineConfig::new(dir.path()).max_cpu_count(1));
        let (router, handles) = start(Arc::clone(&state)).unwrap();

        let before = unix_now_ns();
        router.submit(b"ttl".to_vec(), b"v".to_vec(), 60, false).unwrap();
        let after = unix_now_ns();

        let entry = state.shared.read().unwrap().memtable.get(b"ttl").unwrap();
        assert!(entry.expiry_ns >= before + 60 * 1_000_000_000);
        assert!(entry.expiry_ns <= after + 60 * 1_000_000_000);

        shutdown(router, handles);
    }

    #[test]
    fn test_submit_writes_wal_before_ack() {
        let dir = tempfile::tempdir().unwrap();
        let state = open_state(EngineConfig::new(dir.path()).max_cpu_count(1));
        let (router, handles) = start(Arc::clone(&state)).unwrap();

        router.submit(b"durable".to_vec(), b"yes".to_vec(), 0, false).unwrap();
        shutdown(router, handles);

        let wal = Wal::open(state.config.wal_path.clone(), false).unwrap();
        let mut seen = Vec::new();
        wal.replay(|e| seen.push(e)).unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].key, b"durable");
    }

    #[test]
    fn test_submit_invalidates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let state = open_state(EngineConfig::new(dir.path()).max_cpu_count(1));
        state.cache.put(b"hot".to_vec(), b"stale".to_vec());
        let (router, handles) = start(Arc::clone(&state)).unwrap();

        router.submit(b"hot".to_vec(), b"fresh".to_vec(), 0, false).unwrap();
        assert_eq!(state.cache.get(b"hot"), None);

        shutdown(router, handles);
    }

    #[test]
    fn test_rotation_freezes_memtable_and_wal() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(dir.path()).max_cpu_count(1).max_memtable_size(64);
        let state = open_state(config);
        let (router, handles) = start(Arc::clone(&state)).unwrap();

        router.submit(b"heavy".to_vec(), vec![b'x'; 100], 0, false).unwrap();

        {
            let shared = state.shared.read().unwrap();
            assert_eq!(shared.immutables.len(), 1);
            assert_eq!(shared.frozen_wals.len(), 1);
            assert!(shared.memtable.is_empty());
            // The fresh active log reoccupies the base path; the frozen one
            // carries the suffixed name and still holds the write.
            let active = shared.active_wal.as_ref().unwrap();
            assert_eq!(active.path(), state.config.wal_path);
            let frozen = shared.frozen_wals.front().unwrap();
            assert_ne!(frozen.path(), state.config.wal_path);
            let mut frozen_keys = Vec::new();
            frozen.replay(|e| frozen_keys.push(e.key)).unwrap();
            assert_eq!(frozen_keys, vec![b"heavy".to_vec()]);
        }
        // The rotation raised exactly one flush signal.
        assert!(state.wait_flush());

        shutdown(router, handles);
    }

    #[test]
    fn test_batch_round_trip_across_shards() {
        let dir = tempfile::tempdir().unwrap();
        let state = open_state(EngineConfig::new(dir.path()).max_cpu_count(4));
        let (router, handles) = start(Arc::clone(&state)).unwrap();

        let items: Vec<_> = (0..100)
            .map(|i| (format!("batch_{i}").into_bytes(), format!("v{i}").into_bytes(), 0u32))
            .collect();
        router.submit_batch(items).unwrap();

        let shared = state.shared.read().unwrap();
        assert_eq!(shared.memtable.len(), 100);
        for i in 0..100 {
            let key = format!("batch_{i}");
            assert!(shared.memtable.get(key.as_bytes()).is_some(), "missing {key}");
        }
        drop(shared);

        shutdown(router, handles);
    }

    #[test]
    fn test_concurrent_submitters() {
        let dir = tempfile::tempdir().unwrap();
        let state = open_state(EngineConfig::new(dir.path()).max_cpu_count(4));
        let (router, handles) = start(Arc::clone(&state)).unwrap();
        let router = Arc::new(router);

        let mut writers = Vec::new();
        for id in 0..10 {
            let router = Arc::clone(&router);
            writers.push(std::thread::spawn(move || {
                for j in 0..50 {
                    let key = format!("w{id}_{j}").into_bytes();
                    router.submit(key, b"x".to_vec(), 0, false).unwrap();
                }
            }));
        }
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(state.shared.read().unwrap().memtable.len(), 500);

        let router = Arc::try_unwrap(router).ok().unwrap();
        shutdown(router, handles);
    }

    #[test]
    fn test_delete_is_a_tombstone_write() {
        let dir = tempfile::tempdir().unwrap();
        let state = open_state(EngineConfig::new(dir.path()).max_cpu_count(1));
        let (router, handles) = start(Arc::clone(&state)).unwrap();

        router.submit(b"del".to_vec(), b"v".to_vec(), 0, false).unwrap();
        router.submit(b"del".to_vec(), Vec::new(), 0, true).unwrap();

        let entry = state.shared.read().unwrap().memtable.get(b"del").unwrap();
        assert!(entry.tombstone);
        assert!(entry.value.is_empty());

        shutdown(router, handles);
    }
}
