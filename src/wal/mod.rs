//! Append-only write-ahead log.
//!
//! Every acknowledged write is appended here before it reaches the memtable,
//! so a crash between the two loses nothing. Records are serialized
//! back-to-back from offset 0 with no file header and no per-record
//! checksum:
//!
//! ```text
//! u32le key_len | key bytes | u32le value_len | value bytes
//! | i64le expiry_ns | u8 tombstone
//! ```
//!
//! Batches are written with a single write call from one contiguous buffer,
//! followed by an fsync when durability is enabled, so a successful
//! `write_batch` means the whole batch is on disk (or an error means none of
//! it may be trusted).
//!
//! Replay is prefix-tolerant: a crash can leave a torn record at the tail,
//! and recovery keeps every record decoded before the tear. EOF exactly on a
//! record boundary is a clean end; anything else is reported as corruption
//! at the offending record's offset, after the visitor has seen the entire
//! valid prefix.
//!
//! The active log always lives at the configured base path; rotation
//! renames it to a nanosecond-suffixed frozen name and reopens the base
//! path fresh. Recovery therefore only ever replays the base path, and it
//! is always the log every unflushed write went to.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::entry::{Entry, ENTRY_OVERHEAD};
use crate::error::{Error, Result};

/// Size of the expiry + tombstone trailer after the value bytes.
const META_LEN: usize = 9;

struct WalInner {
    file: File,
    path: PathBuf,
}

pub struct Wal {
    inner: Mutex<WalInner>,
    fsync: bool,
}

impl Wal {
    /// Open (or create) the log at `path` in append mode. When `fsync` is
    /// set, every batch is synced to disk before the write is acknowledged.
    pub fn open(path: impl AsRef<Path>, fsync: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        Ok(Self { inner: Mutex::new(WalInner { file, path }), fsync })
    }

    pub fn path(&self) -> PathBuf {
        self.inner.lock().unwrap().path.clone()
    }

    /// Append a batch of entries as one contiguous buffer and one write
    /// call. Either the whole batch lands durably or the error applies to
    /// the whole batch.
    pub fn write_batch(&self, entries: &[Entry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let total: usize = entries.iter().map(Entry::wire_len).sum();
        let mut buf = Vec::with_capacity(total);
        for entry in entries {
            encode_into(&mut buf, entry)?;
        }

        let inner = self.inner.lock().unwrap();
        (&inner.file).write_all(&buf)?;
        if self.fsync {
            inner.file.sync_data()?;
        }
        Ok(())
    }

    /// Read the log from offset 0, invoking `visit` for each wholly decoded
    /// record in file order. Returns `Error::Corruption` carrying the offset
    /// of the first torn record; every record before it has already been
    /// visited. On success the cursor is restored to end-of-file so appends
    /// continue cleanly.
    pub fn replay(&self, mut visit: impl FnMut(Entry)) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let mut handle = &inner.file;
        handle.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(handle);

        let mut offset: u64 = 0;
        let mut len_buf = [0u8; 4];
        let mut meta_buf = [0u8; META_LEN];

        loop {
            let record_start = offset;

            // EOF exactly at a record boundary is the clean end of the log.
            match fill(&mut reader, &mut len_buf)? {
                0 => break,
                n if n < len_buf.len() => {
                    return Err(corruption(record_start, "torn key length"));
                }
                _ => {}
            }
            let key_len = LittleEndian::read_u32(&len_buf) as usize;

            let mut key = vec![0u8; key_len];
            if fill(&mut reader, &mut key)? < key_len {
                return Err(corruption(record_start, "torn key"));
            }

            if fill(&mut reader, &mut len_buf)? < len_buf.len() {
                return Err(corruption(record_start, "torn value length"));
            }
            let value_len = LittleEndian::read_u32(&len_buf) as usize;

            let mut value = vec![0u8; value_len];
            if fill(&mut reader, &mut value)? < value_len {
                return Err(corruption(record_start, "torn value"));
            }

            if fill(&mut reader, &mut meta_buf)? < meta_buf.len() {
                return Err(corruption(record_start, "torn record trailer"));
            }
            let expiry_ns = LittleEndian::read_i64(&meta_buf[..8]);
            let tombstone = meta_buf[8] == 1;

            offset += (ENTRY_OVERHEAD + key_len + value_len) as u64;
            visit(Entry { key, value, expiry_ns, tombstone });
        }

        drop(reader);
        (&inner.file).seek(SeekFrom::End(0))?;
        Ok(())
    }

    /// Move the log file to a new path, keeping the open handle valid.
    /// Writers serialize on the internal lock, so no append can interleave
    /// with the rename. Used by rotation to give the frozen log its
    /// suffixed name while the base path is reopened fresh.
    pub fn rename(&self, to: impl AsRef<Path>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        fs::rename(&inner.path, to.as_ref())?;
        inner.path = to.as_ref().to_path_buf();
        Ok(())
    }

    /// Flush pending data to disk without appending.
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        inner.file.sync_data()?;
        Ok(())
    }

    /// Close the log and remove its file. The handle is held until the
    /// unlink completes so no writer can interleave.
    pub fn delete(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        fs::remove_file(&inner.path)?;
        Ok(())
    }
}

fn encode_into(buf: &mut Vec<u8>, entry: &Entry) -> Result<()> {
    buf.write_u32::<LittleEndian>(entry.key.len() as u32)?;
    buf.extend_from_slice(&entry.key);
    buf.write_u32::<LittleEndian>(entry.value.len() as u32)?;
    buf.extend_from_slice(&entry.value);
    buf.write_i64::<LittleEndian>(entry.expiry_ns)?;
    buf.push(u8::from(entry.tombstone));
    Ok(())
}

fn corruption(offset: u64, reason: &str) -> Error {
    Error::Corruption { offset, reason: reason.to_string() }
}

/// Read until `buf` is full or EOF; returns the number of bytes read.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
