//! Flush agent: turns frozen memtables into level-0 SSTables.
//!
//! A single worker sleeps on the flush signal. Each signal corresponds to
//! one rotation, so each wakeup serializes the oldest immutable memtable to
//! a new L0 table: dump (unordered), sort, write, then commit under the
//! engine lock. Commit appends the table to level 0, pops the immutable
//! queue, and retires the frozen WAL that was paired with the flushed
//! memtable: the WAL may only disappear after its contents are safely in
//! an SSTable, which is exactly this ordering.
//!
//! A failed SST write leaves the immutable queue untouched; the signal is
//! re-raised after a short pause so the retry cannot be lost.

use std::sync::Arc;
use std::time::Duration;

use crate::entry::{unix_now_ns, Entry};
use crate::error::Result;
use crate::sstable::{sst_filename, write_sst};
use crate::state::EngineState;

/// Pause before re-raising the signal after a failed flush, so a persistent
/// disk error does not spin the worker.
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Initial capacity of the reusable dump buffer.
const DUMP_BUFFER_CAPACITY: usize = 10_000;

pub(crate) fn run(state: Arc<EngineState>) {
    let mut buffer: Vec<Entry> = Vec::with_capacity(DUMP_BUFFER_CAPACITY);

    while state.wait_flush() {
        match flush_oldest(&state, &mut buffer) {
            Ok(true) => {}
            Ok(false) => {} // spurious or already-drained signal
            Err(e) => {
                tracing::error!(error = %e, "flush failed, will retry");
                std::thread::sleep(RETRY_DELAY);
                state.raise_flush();
            }
        }
    }
}

/// Flush the oldest immutable memtable, if any. Returns whether a table was
/// flushed. `buffer` is reused across calls to avoid reallocating the dump.
pub(crate) fn flush_oldest(state: &EngineState, buffer: &mut Vec<Entry>) -> Result<bool> {
    // Peek without removing: failure must leave the queue intact.
    let Some(memtable) = state.shared.read().unwrap().immutables.front().cloned() else {
        return Ok(false);
    };

    buffer.clear();
    memtable.dump_to(buffer);
    buffer.sort_by(|a, b| a.key.cmp(&b.key));

    // An empty table writes nothing but still commits, so its paired WAL is
    // retired and the queue drains.
    let meta = if buffer.is_empty() {
        None
    } else {
        let file_id = unix_now_ns() as u64;
        let path = state.config.data_dir.join(sst_filename(0, file_id));
        let meta = write_sst(buffer, &path, 0, Some(&state.bloom))?;
        Some(meta)
    };

    let retired_wal = {
        let mut shared = state.shared.write().unwrap();
        if let Some(meta) = meta {
            tracing::info!(
                file_id = meta.file_id,
                entries = buffer.len(),
                "flushed memtable to level 0"
            );
            shared.levels[0].push(Arc::new(meta));
        }
        shared.immutables.pop_front();
        if state.config.durability {
            shared.frozen_wals.pop_front()
        } else {
            None
        }
    };

    // Unlink outside the engine lock.
    if let Some(wal) = retired_wal {
        if let Err(e) = wal.delete() {
            tracing::warn!(path = %wal.path().display(), error = %e, "failed to delete frozen wal");
        }
    }

    state.metrics.record_flush();
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::memtable::Memtable;
    use crate::sstable::{find_in_sst, SstReader};
    use crate::state::EngineShared;
    use crate::wal::Wal;

    fn state_with_immutable(
        dir: &std::path::Path,
        entries: &[Entry],
        frozen_wal: Option<Wal>,
    ) -> EngineState {
        let config = EngineConfig::new(dir).normalized();
        let mut shared = EngineShared::new();

        let memtable = Memtable::new();
        for entry in entries {
            memtable.put(entry.clone());
        }
        shared.immutables.push_back(Arc::new(memtable));
        if let Some(wal) = frozen_wal {
            shared.frozen_wals.push_back(Arc::new(wal));
        }

        EngineState::new(config, shared)
    }

    fn entry(key: &str, value: &str) -> Entry {
        Entry::new(key.as_bytes().to_vec(), value.as_bytes().to_vec(), 0, false)
    }

    #[test]
    fn test_flush_writes_sorted_level0_table() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![entry("zebra", "3"), entry("apple", "1"), entry("mango", "2")];
        let state = state_with_immutable(dir.path(), &entries, None);

        let mut buffer = Vec::new();
        assert!(flush_oldest(&state, &mut buffer).unwrap());

        let shared = state.shared.read().unwrap();
        assert!(shared.immutables.is_empty());
        assert_eq!(shared.levels[0].len(), 1);

        let meta = &shared.levels[0][0];
        assert_eq!(meta.min_key, b"apple");
        assert_eq!(meta.max_key, b"zebra");

        let mut reader = SstReader::open(&meta.path).unwrap();
        let mut keys = Vec::new();
        while let Some(e) = reader.next() {
            keys.push(e.key);
        }
        assert_eq!(keys, vec![b"apple".to_vec(), b"mango".to_vec(), b"zebra".to_vec()]);
    }

    #[test]
    fn test_flush_populates_bloom() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_immutable(dir.path(), &[entry("k1", "v"), entry("k2", "v")], None);

        let mut buffer = Vec::new();
        flush_oldest(&state, &mut buffer).unwrap();

        let shared = state.shared.read().unwrap();
        let file_id = shared.levels[0][0].file_id;
        assert!(state.bloom.may_contain(file_id, b"k1"));
        assert!(state.bloom.may_contain(file_id, b"k2"));
    }

    #[test]
    fn test_flush_retires_paired_frozen_wal() {
        let dir = tempfile::tempdir().unwrap();
        let wal_path = dir.path().join("wal.log.12345");
        let wal = Wal::open(&wal_path, false).unwrap();
        let state = state_with_immutable(dir.path(), &[entry("k", "v")], Some(wal));

        assert!(wal_path.exists());
        let mut buffer = Vec::new();
        flush_oldest(&state, &mut buffer).unwrap();

        assert!(!wal_path.exists());
        assert!(state.shared.read().unwrap().frozen_wals.is_empty());
    }

    #[test]
    fn test_flush_preserves_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let mut entries = vec![entry("live", "v")];
        entries.push(Entry::tombstone(b"dead".to_vec()));
        let state = state_with_immutable(dir.path(), &entries, None);

        let mut buffer = Vec::new();
        flush_oldest(&state, &mut buffer).unwrap();

        let shared = state.shared.read().unwrap();
        let meta = &shared.levels[0][0];
        let found = find_in_sst(meta, b"dead").unwrap().unwrap();
        assert!(found.tombstone);
    }

    #[test]
    fn test_flush_with_empty_queue_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(dir.path()).normalized();
        let state = EngineState::new(config, EngineShared::new());

        let mut buffer = Vec::new();
        assert!(!flush_oldest(&state, &mut buffer).unwrap());
        assert_eq!(state.shared.read().unwrap().levels[0].len(), 0);
    }

    #[test]
    fn test_empty_memtable_commits_without_table() {
        let dir = tempfile::tempdir().unwrap();
        let wal_path = dir.path().join("wal.log.99");
        let wal = Wal::open(&wal_path, false).unwrap();
        let state = state_with_immutable(dir.path(), &[], Some(wal));

        let mut buffer = Vec::new();
        assert!(flush_oldest(&state, &mut buffer).unwrap());

        let shared = state.shared.read().unwrap();
        assert_eq!(shared.levels[0].len(), 0);
        assert!(shared.immutables.is_empty());
        assert!(!wal_path.exists());
    }

    #[test]
    fn test_agent_drains_signal_queue() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(state_with_immutable(dir.path(), &[entry("k", "v")], None));

        let agent = {
            let state = Arc::clone(&state);
            std::thread::spawn(move || run(state))
        };

        state.raise_flush();
        // Wait for the flush to land, then stop the agent.
        for _ in 0..100 {
            if state.metrics.tables_flushed() > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        state.begin_shutdown();
        agent.join().unwrap();

        assert_eq!(state.shared.read().unwrap().levels[0].len(), 1);
    }
}
