//! Sharded in-memory table of recent writes.
//!
//! The memtable is the mutable head of the LSM tree: every acknowledged write
//! lands here after the WAL append. It is a fixed set of 32 hash-map shards,
//! each behind its own reader-writer lock, with keys routed by fnv1a-32 so
//! concurrent writers on different shards never contend.
//!
//! Size accounting is byte-accurate for back-pressure purposes: each live
//! entry is credited `key + value + 16` bytes, and an overwrite subtracts the
//! old credit before adding the new one. The total drives memtable rotation,
//! not an exact memory figure.
//!
//! Entries are stored unordered; the flush agent sorts a dump before writing
//! an SSTable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use crate::entry::Entry;
use crate::hasher::fnv1a32;

/// Number of hash-map shards. Shard index for a key is fnv1a32(key) % 32.
pub const MEMTABLE_SHARDS: usize = 32;

/// Accounting overhead credited per live entry on top of key and value bytes.
const ENTRY_ACCOUNTING_OVERHEAD: i64 = 16;

struct Shard {
    map: RwLock<HashMap<Vec<u8>, Entry>>,
}

pub struct Memtable {
    shards: Vec<Shard>,
    total_size: AtomicI64,
}

fn entry_credit(entry: &Entry) -> i64 {
    entry.key.len() as i64 + entry.value.len() as i64 + ENTRY_ACCOUNTING_OVERHEAD
}

impl Memtable {
    pub fn new() -> Self {
        let shards = (0..MEMTABLE_SHARDS)
            .map(|_| Shard { map: RwLock::new(HashMap::new()) })
            .collect();
        Self { shards, total_size: AtomicI64::new(0) }
    }

    fn shard(&self, key: &[u8]) -> &Shard {
        &self.shards[fnv1a32(key) as usize % MEMTABLE_SHARDS]
    }

    /// Insert or overwrite the entry for its key. Overwrites keep the size
    /// accounting exact: the old credit is subtracted before the new one is
    /// added.
    pub fn put(&self, entry: Entry) {
        let shard = self.shard(&entry.key);
        let credit = entry_credit(&entry);

        let mut map = shard.map.write().unwrap();
        if let Some(old) = map.insert(entry.key.clone(), entry) {
            self.total_size.fetch_sub(entry_credit(&old), Ordering::SeqCst);
        }
        drop(map);

        self.total_size.fetch_add(credit, Ordering::SeqCst);
    }

    /// Look up the entry for a key under the shard's shared lock. Tombstones
    /// are returned as-is; the read path applies deletion and expiry policy.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        let map = self.shard(key).map.read().unwrap();
        map.get(key).cloned()
    }

    /// Append every live entry to `out`, in unspecified order. The caller
    /// owns sorting; flush reuses one buffer across dumps.
    pub fn dump_to(&self, out: &mut Vec<Entry>) {
        for shard in &self.shards {
            let map = shard.map.read().unwrap();
            out.extend(map.values().cloned());
        }
    }

    /// Sum of per-entry accounting credits.
    pub fn size(&self) -> i64 {
        self.total_size.load(Ordering::SeqCst)
    }

    /// Number of live entries across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}
