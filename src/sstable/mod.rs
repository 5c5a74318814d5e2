//! Sorted string tables: the immutable on-disk representation.
//!
//! An SSTable is a flat stream of records in ascending key order, each
//! framed by a 17-byte header:
//!
//! ```text
//! u32le key_len | u32le value_len | i64le expiry_ns | u8 tombstone
//! | key bytes | value bytes
//! ```
//!
//! There is no block structure, file footer or embedded index; the complete
//! key -> offset index lives in memory, built at write time and rebuilt by a
//! sequential scan on startup. Files are named `L{level}_{file_id}.sst`
//! where the file id (a creation-time nanosecond timestamp) doubles as the
//! bloom filter's table identity and as the level-local ordering.

pub mod reader;
pub mod writer;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use reader::{find_in_sst, SstReader};
pub use writer::write_sst;

/// Size of the fixed record header preceding the key and value bytes.
pub const SST_HEADER_LEN: usize = 17;

/// In-memory description of one on-disk table, built by the writer or by a
/// recovery scan.
///
/// Invariant: the index is complete; every key present in the file has an
/// offset here, so an index miss proves absence without touching the disk.
#[derive(Debug, Clone)]
pub struct SstMetadata {
    pub level: usize,
    pub path: PathBuf,
    pub file_id: u64,
    pub index: HashMap<Vec<u8>, u64>,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
}

/// File name for a table: `L{level}_{file_id}.sst`.
pub fn sst_filename(level: usize, file_id: u64) -> String {
    format!("L{level}_{file_id}.sst")
}

/// Parse the numeric file id from a table path: the segment after the first
/// underscore, with the `.sst` suffix stripped. Unparseable names yield 0.
pub fn parse_file_id(path: &Path) -> u64 {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return 0;
    };
    let Some((_, id_part)) = name.split_once('_') else {
        return 0;
    };
    id_part.strip_suffix(".sst").unwrap_or(id_part).parse().unwrap_or(0)
}

/// Parse the level from a table file name of the form `L{level}_...sst`.
/// Returns None for names that do not follow the convention.
pub fn parse_level(path: &Path) -> Option<usize> {
    let name = path.file_name()?.to_str()?;
    let prefix = name.split_once('_')?.0;
    prefix.strip_prefix('L')?.parse().ok()
}
