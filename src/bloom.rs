//! Sharded bloom filter used to skip SSTables on point lookups.
//!
//! One filter instance is shared by every SSTable in the engine. Membership
//! is keyed by `(file_id, key)`: the key is hashed together with a
//! `{file_id}:` prefix, so the same key in two tables sets unrelated bits.
//!
//! Sharding is by `file_id % 32`, not by key hash. All keys of one SSTable
//! land in one shard, so lookups against a table never contend with writers
//! populating a different table's bits.
//!
//! The filter is only ever consulted to skip: a negative answer is
//! definitive, a positive answer means the table must still be read.

use std::sync::RwLock;

use crate::hasher::bloom_hash;

/// Number of filter shards; the shard for a table is file_id % 32.
pub const BLOOM_SHARDS: usize = 32;

const MIN_BITS: u64 = 64;
const MAX_BITS: u64 = 16 * 1024 * 1024 * 1024;
const MIN_HASHES: u64 = 1;
const MAX_HASHES: u64 = 30;

struct BloomShard {
    bits: RwLock<Vec<u64>>,
}

pub struct SharedBloom {
    shards: Vec<BloomShard>,
    hashes: u64,
    shard_bits: u64,
}

impl SharedBloom {
    /// Size the filter for `expected_items` entries at false-positive rate
    /// `fpr`, using the standard m = -n ln(p) / (ln 2)^2 and
    /// k = (m/n) ln 2 formulas. Out-of-range inputs fall back to 1000 items
    /// at 1%.
    pub fn new(expected_items: usize, fpr: f64) -> Self {
        let n = if expected_items == 0 { 1000.0 } else { expected_items as f64 };
        let p = if fpr <= 0.0 || fpr >= 1.0 { 0.01 } else { fpr };

        let ln2 = std::f64::consts::LN_2;
        let m_float = -(n * p.ln()) / (ln2 * ln2);
        let k_float = (m_float / n) * ln2;

        let total_bits = (m_float.ceil() as u64).clamp(MIN_BITS, MAX_BITS);
        let hashes = (k_float.ceil() as u64).clamp(MIN_HASHES, MAX_HASHES);

        let shard_bits = total_bits.div_ceil(BLOOM_SHARDS as u64);
        let words = shard_bits.div_ceil(64) as usize;

        let shards = (0..BLOOM_SHARDS)
            .map(|_| BloomShard { bits: RwLock::new(vec![0u64; words]) })
            .collect();

        Self { shards, hashes, shard_bits }
    }

    fn shard(&self, file_id: u64) -> &BloomShard {
        &self.shards[(file_id % BLOOM_SHARDS as u64) as usize]
    }

    /// Record `key` as present in the table `file_id`.
    pub fn add(&self, file_id: u64, key: &[u8]) {
        let (h1, h2) = bloom_hash(file_id, key);
        let mut bits = self.shard(file_id).bits.write().unwrap();

        for i in 0..self.hashes {
            let idx = (h1.wrapping_add(i.wrapping_mul(h2))) % self.shard_bits;
            bits[(idx / 64) as usize] |= 1 << (idx % 64);
        }
    }

    /// Whether `key` may be present in the table `file_id`. Never false for
    /// a key that was added; true with probability ~fpr otherwise.
    pub fn may_contain(&self, file_id: u64, key: &[u8]) -> bool {
        let (h1, h2) = bloom_hash(file_id, key);
        let bits = self.shard(file_id).bits.read().unwrap();

        for i in 0..self.hashes {
            let idx = (h1.wrapping_add(i.wrapping_mul(h2))) % self.shard_bits;
            if bits[(idx / 64) as usize] & (1 << (idx % 64)) == 0 {
                return false;
            }
        }
        true
    }

    /// Number of probe positions per key.
    pub fn hash_count(&self) -> u64 {
        self.hashes
    }

    /// Bit capacity of a single shard.
    pub fn shard_bits(&self) -> u64 {
        self.shard_bits
    }
}
