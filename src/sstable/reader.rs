use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::bloom::SharedBloom;
use crate::entry::Entry;
use crate::error::Result;
use crate::sstable::{SstMetadata, SST_HEADER_LEN};

/// Sequential scanner over a table's records, in key order. Used by
/// compaction merges and by the recovery scan that rebuilds metadata.
pub struct SstReader {
    reader: BufReader<File>,
    header: [u8; SST_HEADER_LEN],
}

impl SstReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self { reader: BufReader::new(file), header: [0u8; SST_HEADER_LEN] })
    }

    /// The next record, or None on end-of-file or any read error. A torn
    /// tail (from a crashed writer) terminates the scan at the last whole
    /// record.
    pub fn next(&mut self) -> Option<Entry> {
        if self.reader.read_exact(&mut self.header).is_err() {
            return None;
        }

        let key_len = LittleEndian::read_u32(&self.header[0..4]) as usize;
        let value_len = LittleEndian::read_u32(&self.header[4..8]) as usize;
        let expiry_ns = LittleEndian::read_i64(&self.header[8..16]);
        let tombstone = self.header[16] == 1;

        let mut key = vec![0u8; key_len];
        if self.reader.read_exact(&mut key).is_err() {
            return None;
        }
        let mut value = vec![0u8; value_len];
        if self.reader.read_exact(&mut value).is_err() {
            return None;
        }

        Some(Entry { key, value, expiry_ns, tombstone })
    }
}

/// Point lookup against one table. The in-memory index is authoritative: a
/// missing key returns without opening the file; a present key costs one
/// open, one seek and one record decode.
pub fn find_in_sst(meta: &SstMetadata, key: &[u8]) -> Result<Option<Entry>> {
    let Some(&offset) = meta.index.get(key) else {
        return Ok(None);
    };

    let mut file = File::open(&meta.path)?;
    file.seek(SeekFrom::Start(offset))?;

    let mut header = [0u8; SST_HEADER_LEN];
    file.read_exact(&mut header)?;
    let key_len = LittleEndian::read_u32(&header[0..4]) as usize;
    let value_len = LittleEndian::read_u32(&header[4..8]) as usize;
    let expiry_ns = LittleEndian::read_i64(&header[8..16]);
    let tombstone = header[16] == 1;

    // The key bytes are already known; skip straight to the value.
    file.seek(SeekFrom::Current(key_len as i64))?;
    let mut value = vec![0u8; value_len];
    file.read_exact(&mut value)?;

    Ok(Some(Entry { key: key.to_vec(), value, expiry_ns, tombstone }))
}

/// Rebuild a table's metadata by scanning it front to back: index offsets,
/// min/max keys, and bloom registration. Used on startup, where the index
/// that was built at write time did not survive the restart.
pub fn load_metadata(
    path: &Path,
    level: usize,
    file_id: u64,
    bloom: Option<&SharedBloom>,
) -> Result<SstMetadata> {
    let mut reader = SstReader::open(path)?;
    let mut meta = SstMetadata {
        level,
        path: path.to_path_buf(),
        file_id,
        index: std::collections::HashMap::new(),
        min_key: Vec::new(),
        max_key: Vec::new(),
    };

    let mut offset: u64 = 0;
    while let Some(entry) = reader.next() {
        if meta.index.is_empty() {
            meta.min_key = entry.key.clone();
        }
        meta.max_key = entry.key.clone();
        if let Some(bloom) = bloom {
            bloom.add(file_id, &entry.key);
        }
        meta.index.insert(entry.key.clone(), offset);
        offset += entry.wire_len() as u64;
    }

    Ok(meta)
}
