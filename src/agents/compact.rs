//! Compaction agent: merges level-0 tables into level 1.
//!
//! Level 0 accumulates one table per flush, with overlapping key ranges and
//! duplicate keys across tables. On a periodic tick, once the table count
//! reaches the configured trigger, the agent captures the whole level,
//! k-way-merges the captured tables through a min-heap, and writes a single
//! level-1 table.
//!
//! Within the merge, equal keys collapse to one record: the level vector is
//! in flush order (oldest first), so the entry from the highest source index
//! is the newest write and wins. Tombstones are ordinary records here: a
//! deletion that is the newest version survives into level 1, because older
//! versions of the key may still exist below.
//!
//! The captured input is only destroyed after the merged table is committed.
//! On failure the captured vector is pushed back onto level 0, ahead of any
//! tables flushed meanwhile, and the input files stay on disk for the retry.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use crate::entry::{unix_now_ns, Entry};
use crate::error::{Error, Result};
use crate::sstable::{sst_filename, write_sst, SstMetadata, SstReader};
use crate::state::EngineState;

pub(crate) fn run(state: Arc<EngineState>) {
    let interval = Duration::from_secs(state.config.compaction_interval_secs as u64);

    while state.sleep_interval(interval) {
        match run_once(&state) {
            Ok(true) => {}
            Ok(false) => {} // below trigger
            Err(e) => tracing::error!(error = %e, "compaction failed, inputs restored"),
        }
    }
}

/// One compaction check: capture level 0 if it is at the trigger, merge it
/// into a new level-1 table, commit, and unlink the inputs. Returns whether
/// a compaction ran.
pub(crate) fn run_once(state: &EngineState) -> Result<bool> {
    let captured = {
        let mut shared = state.shared.write().unwrap();
        if shared.levels[0].len() < state.config.l0_compaction_trigger {
            return Ok(false);
        }
        std::mem::take(&mut shared.levels[0])
    };

    tracing::info!(tables = captured.len(), "compacting level 0");

    match merge_tables(state, &captured) {
        Ok(meta) => {
            {
                let mut shared = state.shared.write().unwrap();
                shared.levels[1].push(Arc::new(meta));
            }
            for table in &captured {
                if let Err(e) = std::fs::remove_file(&table.path) {
                    tracing::warn!(path = %table.path.display(), error = %e, "failed to delete compacted input");
                }
            }
            state.metrics.record_compaction();
            Ok(true)
        }
        Err(e) => {
            // Put the captured tables back in front of anything flushed
            // while the merge ran, so level order stays oldest-first.
            let mut shared = state.shared.write().unwrap();
            let newer = std::mem::take(&mut shared.levels[0]);
            let mut restored = captured;
            restored.extend(newer);
            shared.levels[0] = restored;
            Err(e)
        }
    }
}

struct MergeItem {
    entry: Entry,
    source: usize,
}

impl PartialEq for MergeItem {
    fn eq(&self, other: &Self) -> bool {
        self.entry.key == other.entry.key && self.source == other.source
    }
}

impl Eq for MergeItem {}

impl PartialOrd for MergeItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse the key order so the smallest
        // key pops first, and pop lower source indices first among equals
        // so the newest source lands last and wins the collapse.
        match self.entry.key.cmp(&other.entry.key) {
            Ordering::Equal => other.source.cmp(&self.source),
            ord => ord.reverse(),
        }
    }
}

/// K-way merge of the captured tables into a new level-1 table, last writer
/// wins per key.
fn merge_tables(state: &EngineState, tables: &[Arc<SstMetadata>]) -> Result<SstMetadata> {
    let mut readers = Vec::with_capacity(tables.len());
    for table in tables {
        readers.push(SstReader::open(&table.path)?);
    }

    let mut heap = BinaryHeap::new();
    for (source, reader) in readers.iter_mut().enumerate() {
        if let Some(entry) = reader.next() {
            heap.push(MergeItem { entry, source });
        }
    }

    let mut merged: Vec<Entry> = Vec::new();
    while let Some(item) = heap.pop() {
        if let Some(next) = readers[item.source].next() {
            heap.push(MergeItem { entry: next, source: item.source });
        }

        match merged.last_mut() {
            Some(last) if last.key == item.entry.key => *last = item.entry,
            _ => merged.push(item.entry),
        }
    }

    if merged.is_empty() {
        return Err(Error::InvalidData("compaction produced no records".to_string()));
    }

    let file_id = unix_now_ns() as u64;
    let path = state.config.data_dir.join(sst_filename(1, file_id));
    let meta = write_sst(&merged, &path, 1, Some(&state.bloom))?;

    tracing::info!(
        file_id = meta.file_id,
        inputs = tables.len(),
        entries = merged.len(),
        "compaction committed to level 1"
    );
    Ok(meta)
}
