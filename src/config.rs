use std::path::PathBuf;

use serde::Deserialize;

const DEFAULT_MAX_MEMTABLE_SIZE: i64 = 64 * 1024 * 1024;
const DEFAULT_L0_COMPACTION_TRIGGER: usize = 4;
const DEFAULT_COMPACTION_INTERVAL_SECS: i64 = 5;
const DEFAULT_BLOOM_FPR: f64 = 0.01;
const DEFAULT_KEY_CACHE_CAPACITY: usize = 40_000;

/// Configuration for the storage engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base directory for SSTable files (default: ./data)
    pub data_dir: PathBuf,

    /// Path of the active write-ahead log. Rotated logs use this path plus a
    /// nanosecond suffix (default: ./data/wal.log)
    pub wal_path: PathBuf,

    /// Memtable size at which rotation triggers (default: 64MiB)
    pub max_memtable_size: i64,

    /// Whether writes are logged to the WAL, fsynced, and replayed on open
    /// (default: true)
    pub durability: bool,

    /// Level-0 table count that wakes compaction (default: 4)
    pub l0_compaction_trigger: usize,

    /// Periodic tick for the compaction agent; non-positive values use the
    /// 5-second default
    pub compaction_interval_secs: i64,

    /// Target bloom filter false-positive rate, in (0, 1) (default: 0.01)
    pub bloom_fpr: f64,

    /// Hot-key cache capacity in entries (default: 40000)
    pub key_cache_capacity: usize,

    /// Ingestion shard count; 0 means the hardware thread count (default: 0)
    pub max_cpu_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_path: PathBuf::from("./data/wal.log"),
            max_memtable_size: DEFAULT_MAX_MEMTABLE_SIZE,
            durability: true,
            l0_compaction_trigger: DEFAULT_L0_COMPACTION_TRIGGER,
            compaction_interval_secs: DEFAULT_COMPACTION_INTERVAL_SECS,
            bloom_fpr: DEFAULT_BLOOM_FPR,
            key_cache_capacity: DEFAULT_KEY_CACHE_CAPACITY,
            max_cpu_count: 0,
        }
    }
}

impl EngineConfig {
    /// Create a new config rooted at the given directory, with the WAL placed
    /// inside it.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let wal_path = dir.join("wal.log");
        Self {
            data_dir: dir,
            wal_path,
            ..Default::default()
        }
    }

    /// Set the active WAL path
    pub fn wal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.wal_path = path.into();
        self
    }

    /// Set the memtable rotation threshold
    pub fn max_memtable_size(mut self, bytes: i64) -> Self {
        self.max_memtable_size = bytes;
        self
    }

    /// Enable or disable WAL durability
    pub fn durability(mut self, enabled: bool) -> Self {
        self.durability = enabled;
        self
    }

    /// Set the level-0 compaction trigger count
    pub fn l0_compaction_trigger(mut self, count: usize) -> Self {
        self.l0_compaction_trigger = count;
        self
    }

    /// Set the compaction tick interval in seconds
    pub fn compaction_interval_secs(mut self, secs: i64) -> Self {
        self.compaction_interval_secs = secs;
        self
    }

    /// Set the bloom filter false-positive rate
    pub fn bloom_fpr(mut self, fpr: f64) -> Self {
        self.bloom_fpr = fpr;
        self
    }

    /// Set the hot-key cache capacity in entries
    pub fn key_cache_capacity(mut self, entries: usize) -> Self {
        self.key_cache_capacity = entries;
        self
    }

    /// Set the ingestion shard count (0 = hardware threads)
    pub fn max_cpu_count(mut self, count: usize) -> Self {
        self.max_cpu_count = count;
        self
    }

    /// Clamp out-of-range values to their defaults. Called once on open so
    /// the agents can rely on sane settings.
    pub(crate) fn normalized(mut self) -> Self {
        if self.compaction_interval_secs <= 0 {
            self.compaction_interval_secs = DEFAULT_COMPACTION_INTERVAL_SECS;
        }
        if self.bloom_fpr <= 0.0 || self.bloom_fpr >= 1.0 {
            self.bloom_fpr = DEFAULT_BLOOM_FPR;
        }
        if self.max_memtable_size <= 0 {
            self.max_memtable_size = DEFAULT_MAX_MEMTABLE_SIZE;
        }
        if self.l0_compaction_trigger == 0 {
            self.l0_compaction_trigger = DEFAULT_L0_COMPACTION_TRIGGER;
        }
        self
    }

    /// Number of ingestion shards: the configured cap, or the hardware
    /// thread count when unset.
    pub(crate) fn ingest_shards(&self) -> usize {
        if self.max_cpu_count > 0 {
            return self.max_cpu_count;
        }
        std::thread::available_parallelism().map_or(1, |n| n.get())
    }
}
