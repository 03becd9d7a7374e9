//! Memory mapping of an open pool file
//!
//! All pool bytes are read and written through this mapping. `persist` is
//! the durability barrier: when it returns `Ok`, every preceding write in
//! the range has reached the backing file.

use memmap2::{MmapMut, MmapOptions};
use std::io;
use std::path::Path;

use super::errors::{HeapError, HeapResult};
use super::lock::PoolLock;

/// A locked, writable mapping of a whole pool file.
pub struct PoolMapping {
    mmap: MmapMut,
    len: u64,
    /// Held for the life of the mapping.
    _lock: PoolLock,
}

impl PoolMapping {
    /// Map `len` bytes of the locked pool file.
    pub fn map(lock: PoolLock, len: u64, path: &Path) -> HeapResult<Self> {
        // SAFETY: the exclusive advisory lock keeps cooperating processes from
        // mutating the file while it is mapped.
        let mmap = unsafe {
            MmapOptions::new()
                .len(len as usize)
                .map_mut(lock.file())
                .map_err(|e| HeapError::io("failed to map pool", path, e))?
        };
        Ok(Self {
            mmap,
            len,
            _lock: lock,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The whole mapping.
    pub fn bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// `len` bytes starting at `offset`. Callers bounds-check first.
    pub fn range(&self, offset: u64, len: u64) -> &[u8] {
        &self.mmap[offset as usize..(offset + len) as usize]
    }

    /// Copy `data` into the mapping at `offset`. Not durable until persisted.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) {
        let start = offset as usize;
        self.mmap[start..start + data.len()].copy_from_slice(data);
    }

    /// Fill `len` bytes at `offset` with `value`.
    pub fn fill(&mut self, offset: u64, len: u64, value: u8) {
        self.mmap[offset as usize..(offset + len) as usize].fill(value);
    }

    /// Durability barrier over `[offset, offset + len)`.
    pub fn persist(&self, offset: u64, len: u64) -> io::Result<()> {
        if len == 0 {
            return Ok(());
        }
        self.mmap.flush_range(offset as usize, len as usize)
    }

    /// Durability barrier over the whole pool.
    pub fn persist_all(&self) -> io::Result<()> {
        self.mmap.flush()
    }
}
