//! Hot-key cache in front of the read path.
//!
//! A small, capacity-bounded LRU mapping keys to raw value bytes. Reads that
//! hit here skip the memtable walk and any disk lookups entirely. The
//! ingestion path removes written keys so the cache never serves a value
//! older than an acknowledged write, and only live (non-deleted,
//! non-expired) values are ever inserted.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

pub struct KeyCache {
    inner: Mutex<LruCache<Vec<u8>, Vec<u8>>>,
}

impl KeyCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { inner: Mutex::new(LruCache::new(capacity)) }
    }

    /// Look up a key, promoting it to most-recently-used on a hit.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    /// Insert or update a value, promoting it. Beyond capacity the
    /// least-recently-used entry is evicted.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.lock().unwrap().put(key, value);
    }

    /// Drop a key, if cached.
    pub fn remove(&self, key: &[u8]) {
        self.inner.lock().unwrap().pop(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
