use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::bloom::SharedBloom;
use crate::entry::Entry;
use crate::error::Result;
use crate::sstable::{parse_file_id, SstMetadata, SST_HEADER_LEN};

/// Write a sorted run of entries to a new table at `path`.
///
/// Callers guarantee `entries` is sorted ascending by key with no
/// duplicates; the flush and compaction agents both produce exactly that.
/// Each record's starting offset is captured into the metadata index, and
/// every key is registered with the bloom filter under this table's file id
/// when one is supplied.
///
/// A partial write surfaces as an error and may leave a truncated file
/// behind; the table does not exist for the engine until this returns Ok,
/// so the leftover is invisible until a recovery scan rebuilds it (at which
/// point its valid prefix is all that ever existed).
pub fn write_sst(
    entries: &[Entry],
    path: &Path,
    level: usize,
    bloom: Option<&SharedBloom>,
) -> Result<SstMetadata> {
    let file_id = parse_file_id(path);
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let mut index = HashMap::with_capacity(entries.len());
    let mut offset: u64 = 0;

    for entry in entries {
        writer.write_u32::<LittleEndian>(entry.key.len() as u32)?;
        writer.write_u32::<LittleEndian>(entry.value.len() as u32)?;
        writer.write_i64::<LittleEndian>(entry.expiry_ns)?;
        writer.write_u8(u8::from(entry.tombstone))?;
        writer.write_all(&entry.key)?;
        writer.write_all(&entry.value)?;

        index.insert(entry.key.clone(), offset);
        if let Some(bloom) = bloom {
            bloom.add(file_id, &entry.key);
        }
        offset += (SST_HEADER_LEN + entry.key.len() + entry.value.len()) as u64;
    }

    writer.flush()?;

    Ok(SstMetadata {
        level,
        path: path.to_path_buf(),
        file_id,
        index,
        min_key: entries.first().map(|e| e.key.clone()).unwrap_or_default(),
        max_key: entries.last().map(|e| e.key.clone()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::sst_filename;

    fn sorted_entries() -> Vec<Entry> {
        vec![
            Entry::new(b"alpha".to_vec(), b"1".to_vec(), 0, false),
            Entry::new(b"beta".to_vec(), b"22".to_vec(), 500, false),
            Entry::tombstone(b"gamma".to_vec()),
        ]
    }

    #[test]
    fn test_metadata_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(sst_filename(0, 99));

        let meta = write_sst(&sorted_entries(), &path, 0, None).unwrap();

        assert_eq!(meta.level, 0);
        assert_eq!(meta.file_id, 99);
        assert_eq!(meta.path, path);
        assert_eq!(meta.min_key, b"alpha");
        assert_eq!(meta.max_key, b"gamma");
        assert_eq!(meta.index.len(), 3);
    }

    #[test]
    fn test_index_offsets_are_record_starts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(sst_filename(0, 1));
        let entries = sorted_entries();

        let meta = write_sst(&entries, &path, 0, None).unwrap();

        let mut expected: u64 = 0;
        for entry in &entries {
            assert_eq!(meta.index[&entry.key], expected);
            expected += entry.wire_len() as u64;
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), expected);
    }

    #[test]
    fn test_bloom_population() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(sst_filename(0, 7));
        let bloom = SharedBloom::new(1000, 0.01);

        write_sst(&sorted_entries(), &path, 0, Some(&bloom)).unwrap();

        assert!(bloom.may_contain(7, b"alpha"));
        assert!(bloom.may_contain(7, b"beta"));
        assert!(bloom.may_contain(7, b"gamma"));
    }

    #[test]
    fn test_empty_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(sst_filename(1, 5));

        let meta = write_sst(&[], &path, 1, None).unwrap();
        assert!(meta.index.is_empty());
        assert!(meta.min_key.is_empty());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }
}
