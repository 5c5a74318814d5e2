//! Key hashing for shard routing and bloom filter probes.
//!
//! Two fixed functions are used across the engine:
//! - fnv1a-32 routes keys to memtable shards and ingestion workers, so a
//!   key's shard is stable across both.
//! - crc32 (IEEE polynomial) seeds the bloom filter's double hash. The key
//!   is prefixed with `{file_id}:` so the same key in different SSTables
//!   probes uncorrelated bit positions.

use crc::{Crc, CRC_32_ISO_HDLC};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// The IEEE crc32 polynomial.
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// 32-bit FNV-1a hash of `data`.
pub fn fnv1a32(data: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Double-hash seeds for the bloom filter: a single crc32 of
/// `"{file_id}:" ++ key` zero-extended to 64 bits, and its high-shifted
/// companion. Probe i lands at `(h1 + i*h2) mod m`.
pub fn bloom_hash(file_id: u64, key: &[u8]) -> (u64, u64) {
    let mut digest = CRC32.digest();
    digest.update(file_id.to_string().as_bytes());
    digest.update(b":");
    digest.update(key);
    let h1 = u64::from(digest.finalize());
    (h1, h1 >> 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a32_known_vectors() {
        // Published FNV-1a 32 test vectors.
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_fnv1a32_distributes_shards() {
        let shards = 32u32;
        let mut seen = std::collections::HashSet::new();
        for i in 0..1000 {
            let key = format!("key_{i}");
            seen.insert(fnv1a32(key.as_bytes()) % shards);
        }
        // With 1000 keys every shard should be hit.
        assert_eq!(seen.len(), shards as usize);
    }

    #[test]
    fn test_bloom_hash_matches_prefixed_crc() {
        let (h1, h2) = bloom_hash(7, b"key");
        let whole = CRC32.checksum(b"7:key");
        assert_eq!(h1, u64::from(whole));
        assert_eq!(h2, h1 >> 16);
    }

    #[test]
    fn test_bloom_hash_decorrelates_file_ids() {
        let (a, _) = bloom_hash(1, b"same-key");
        let (b, _) = bloom_hash(2, b"same-key");
        assert_ne!(a, b);
    }
}
