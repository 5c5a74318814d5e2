//! Startup recovery: rebuild engine state from the data directory.
//!
//! There is no manifest. The directory listing is the source of truth for
//! on-disk tables: every `L{level}_{file_id}.sst` is scanned front to back
//! to rebuild its in-memory index, min/max keys and bloom bits. Levels are
//! ordered by file id ascending, which restores the oldest-first insertion
//! order the read path and compaction rely on.
//!
//! When durability is on, the active WAL is replayed into the fresh
//! memtable. Replay is prefix-tolerant: a torn tail from a crash is logged
//! and the valid prefix is kept. Rotated WAL files left behind by a crash
//! between rotation and flush are surfaced with a warning and left in
//! place. Their data also lives in the SSTable that was flushed from the
//! paired memtable in one crash window, and is the only copy in the other,
//! so neither replaying nor deleting them is safe unconditionally.

use std::fs;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::sstable::{parse_file_id, parse_level, reader::load_metadata, SstMetadata};
use crate::state::{EngineShared, EngineState, LEVEL_SLOTS};
use crate::wal::Wal;

/// Build the engine state for `config`, recovering whatever a previous
/// process left in the data directory.
pub(crate) fn recover(config: EngineConfig) -> Result<EngineState> {
    let shared = EngineShared::new();
    let state = EngineState::new(config, shared);

    let levels = scan_tables(&state)?;
    {
        let mut shared = state.shared.write().unwrap();
        shared.levels = levels;
    }

    if state.config.durability {
        recover_wal(&state)?;
        surface_orphan_wals(&state);
    }

    let snapshot = state.snapshot();
    tracing::info!(
        tables = snapshot.level_table_counts.iter().sum::<usize>(),
        memtable_bytes = snapshot.memtable_size,
        "recovery complete"
    );
    Ok(state)
}

/// List the data directory and rebuild metadata for every table file.
fn scan_tables(state: &EngineState) -> Result<Vec<Vec<Arc<SstMetadata>>>> {
    let mut levels: Vec<Vec<Arc<SstMetadata>>> =
        (0..LEVEL_SLOTS).map(|_| Vec::new()).collect();

    for dir_entry in fs::read_dir(&state.config.data_dir)? {
        let path = dir_entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sst") {
            continue;
        }

        let Some(level) = parse_level(&path) else {
            tracing::warn!(path = %path.display(), "skipping table with unparseable name");
            continue;
        };
        let file_id = parse_file_id(&path);

        let meta = load_metadata(&path, level, file_id, Some(&state.bloom))?;
        while levels.len() <= level {
            levels.push(Vec::new());
        }
        levels[level].push(Arc::new(meta));
    }

    // File ids are creation timestamps; ascending id restores oldest-first
    // insertion order within each level.
    for level in &mut levels {
        level.sort_by_key(|t| t.file_id);
    }
    Ok(levels)
}

/// Open the active WAL and replay it into the fresh memtable. Corruption
/// past a valid prefix is not fatal; the prefix is what was acknowledged
/// durably.
fn recover_wal(state: &EngineState) -> Result<()> {
    let wal = Wal::open(&state.config.wal_path, true)?;

    let mut replayed = 0u64;
    let replay_result = {
        let shared = state.shared.read().unwrap();
        let memtable = Arc::clone(&shared.memtable);
        drop(shared);
        wal.replay(|entry| {
            memtable.put(entry);
            replayed += 1;
        })
    };

    match replay_result {
        Ok(()) => {}
        Err(Error::Corruption { offset, reason }) => {
            tracing::warn!(offset, reason = %reason, "wal tail corrupt, recovered valid prefix");
        }
        Err(e) => return Err(e),
    }

    if replayed > 0 {
        tracing::info!(entries = replayed, "replayed active wal");
    }

    state.shared.write().unwrap().active_wal = Some(Arc::new(wal));
    Ok(())
}

/// Log any rotated WAL files a previous process left behind. They are
/// neither replayed nor deleted here.
fn surface_orphan_wals(state: &EngineState) {
    let wal_path = &state.config.wal_path;
    let (Some(parent), Some(base)) = (wal_path.parent(), wal_path.file_name()) else {
        return;
    };
    let Some(base) = base.to_str() else {
        return;
    };
    let prefix = format!("{base}.");

    let Ok(dir) = fs::read_dir(parent) else {
        return;
    };
    for dir_entry in dir.flatten() {
        let name = dir_entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(&prefix) {
            tracing::warn!(
                path = %dir_entry.path().display(),
                "orphan frozen wal found; not replayed, not deleted"
            );
        }
    }
}
