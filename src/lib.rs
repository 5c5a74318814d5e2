//! CinderDB: an embeddable, single-node key-value storage engine organized
//! as a log-structured merge-tree.
//!
//! Byte-string keys map to byte-string values with optional per-entry TTL
//! and tombstone deletion. Writes are made durable through a batched,
//! fsynced write-ahead log before they reach the sharded in-memory table;
//! background agents freeze full memtables, flush them to sorted on-disk
//! tables, and compact level 0 into level 1. Point lookups walk cache,
//! memtables and bloom-gated tables newest to oldest.
//!
//! ```no_run
//! use cinderdb::{Engine, EngineConfig};
//!
//! let engine = Engine::open(EngineConfig::new("./data"))?;
//! engine.put(b"key".to_vec(), b"value".to_vec(), 0)?;
//! assert_eq!(engine.get(b"key")?, Some(b"value".to_vec()));
//! engine.close()?;
//! # Ok::<(), cinderdb::Error>(())
//! ```

pub mod bloom;
pub mod cache;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod flock;
pub mod hasher;
pub mod memtable;
pub mod metrics;
pub mod sstable;
pub mod wal;

mod agents;
mod recovery;
mod state;

pub use config::EngineConfig;
pub use engine::Engine;
pub use entry::Entry;
pub use error::{Error, Result};
pub use metrics::MetricsSnapshot;
