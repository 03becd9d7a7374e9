//! Cross-process pool lock
//!
//! A pool is owned by exactly one process. The owner holds an exclusive
//! advisory lock on the pool file for as long as the mapping lives; a
//! second process attempting to open the pool gets `PMHEAP_POOL_IN_USE`.
//! The lock is an explicit object owned alongside the mapping rather than
//! process-wide state.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

use super::errors::{HeapError, HeapResult};

/// Exclusive advisory lock on an open pool file.
#[derive(Debug)]
pub struct PoolLock {
    file: File,
}

impl PoolLock {
    /// Take the exclusive lock on `file`, failing immediately if another
    /// owner holds it.
    pub fn acquire(file: File, path: &Path) -> HeapResult<Self> {
        FileExt::try_lock_exclusive(&file).map_err(|e| {
            HeapError::pool_in_use(path, format!("pool is locked by another owner: {}", e))
        })?;
        Ok(Self { file })
    }

    /// Returns true if nobody holds the lock on the file at `path`.
    ///
    /// Opens a fresh descriptor, so calling this on a pool the current
    /// process has open reports it as held.
    pub fn is_free(path: &Path) -> HeapResult<bool> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| HeapError::io("failed to open pool for lock check", path, e))?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// The locked file.
    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for PoolLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn scratch_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("pool");
        std::fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn test_second_lock_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = scratch_file(&dir);

        let first = PoolLock::acquire(File::open(&path).unwrap(), &path).unwrap();
        let second = PoolLock::acquire(File::open(&path).unwrap(), &path);
        assert!(second.is_err());
        assert!(!PoolLock::is_free(&path).unwrap());

        drop(first);
        assert!(PoolLock::is_free(&path).unwrap());
    }
}
