//! Exclusive data-directory lock.
//!
//! A second process opening the same data directory would corrupt the WAL
//! and race the background agents, so the engine takes an advisory
//! `flock(2)` on a lock file at open and holds it for its lifetime. The file
//! carries the owning process id for debugging. The lock is released when
//! the engine is dropped; the file itself is left in place.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Create the lock file if needed and acquire an exclusive,
    /// non-blocking lock on it. Fails if another process holds the lock.
    pub fn acquire<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Self::try_lock(&file)?;

        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        // No advisory locking on this platform; single-process use is the
        // caller's responsibility.
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// The kernel releases the flock when the file handle is closed on drop; the
// lock file stays behind to avoid unlink races with a concurrent acquirer.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");

        let lock = FileLock::acquire(&path).unwrap();
        assert_eq!(lock.path(), path.as_path());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(&std::process::id().to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_double_acquire_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");

        let _first = FileLock::acquire(&path).unwrap();
        assert!(FileLock::acquire(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");

        {
            let _lock = FileLock::acquire(&path).unwrap();
        }
        let _again = FileLock::acquire(&path).unwrap();
    }
}
