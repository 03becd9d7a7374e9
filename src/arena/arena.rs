//! Volatile arena
//!
//! A fixed-capacity region for scratch objects that need no crash
//! consistency. Nothing here is logged, flushed or recovered; the region
//! is reclaimed when the arena is dropped or reset.

use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::path::Path;
use uuid::Uuid;

use crate::constants::{BLOCK_ALIGN, MIN_ARENA_SIZE};
use crate::observability::{log_event_with_fields, Event};
use crate::pool::codec::align_up;

use super::errors::{ArenaError, ArenaResult};
use super::free_list::FreeList;

/// Handle to an object in a `VolatileArena`.
///
/// Not interchangeable with `PersistentObject`: volatile blocks can only be
/// passed to the arena that issued them, and never to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolatileBlock {
    arena_id: Uuid,
    generation: u64,
    offset: u64,
    len: u64,
}

impl VolatileBlock {
    /// Requested size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

struct ArenaInner {
    mmap: MmapMut,
    free: FreeList,
    /// Bumped by `reset` so handles issued before it stop resolving.
    generation: u64,
}

/// Usage counters for an arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ArenaStats {
    pub capacity: u64,
    pub live_blocks: usize,
    pub free_bytes: u64,
    pub largest_free: u64,
}

pub struct VolatileArena {
    id: Uuid,
    capacity: u64,
    inner: Mutex<ArenaInner>,
}

impl VolatileArena {
    /// Anonymous arena of at least `min_size` bytes.
    pub fn create(min_size: u64) -> ArenaResult<Self> {
        let capacity = checked_capacity(min_size)?;
        let mmap = MmapOptions::new()
            .len(capacity as usize)
            .map_anon()
            .map_err(|e| ArenaError::io("anonymous mapping failed", &e))?;
        Ok(Self::from_mapping(mmap, capacity, "anonymous"))
    }

    /// Arena carved from a file in `dir`.
    ///
    /// The backing file is unlinked as soon as it is mapped, so nothing
    /// survives the process.
    pub fn create_in(dir: impl AsRef<Path>, min_size: u64) -> ArenaResult<Self> {
        let dir = dir.as_ref();
        let capacity = checked_capacity(min_size)?;
        let path = dir.join(format!("pmheap-arena-{}", Uuid::new_v4()));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| ArenaError::io("failed to create arena file", &e))?;
        let mapped = file
            .set_len(capacity)
            .and_then(|_| {
                // SAFETY: the file was just created under a fresh random name
                // and is unlinked below; no other handle can reach it.
                unsafe { MmapOptions::new().len(capacity as usize).map_mut(&file) }
            });
        let unlinked = fs::remove_file(&path);
        let mmap = mapped.map_err(|e| ArenaError::io("failed to map arena file", &e))?;
        unlinked.map_err(|e| ArenaError::io("failed to unlink arena file", &e))?;

        Ok(Self::from_mapping(mmap, capacity, &dir.display().to_string()))
    }

    fn from_mapping(mmap: MmapMut, capacity: u64, backing: &str) -> Self {
        let arena = Self {
            id: Uuid::new_v4(),
            capacity,
            inner: Mutex::new(ArenaInner {
                mmap,
                free: FreeList::new(capacity),
                generation: 0,
            }),
        };
        log_event_with_fields(
            Event::ArenaCreate,
            &[
                ("arena_id", &arena.id.to_string()),
                ("backing", backing),
                ("capacity", &capacity.to_string()),
            ],
        );
        arena
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Total bytes available for blocks.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Allocate a zero-filled block. Fails with `OutOfMemory` when no free
    /// chunk fits; the arena never grows.
    pub fn allocate(&self, size: u64) -> ArenaResult<VolatileBlock> {
        let mut inner = self.inner.lock();
        let offset = inner.free.allocate(size).ok_or_else(|| ArenaError::OutOfMemory {
            requested: size,
            available: inner.free.largest_free(),
        })?;

        let start = offset as usize;
        inner.mmap[start..start + size as usize].fill(0);
        Ok(VolatileBlock {
            arena_id: self.id,
            generation: inner.generation,
            offset,
            len: size,
        })
    }

    /// Release a block. A second free of the same handle fails with
    /// `UnknownHandle`.
    pub fn free(&self, block: &VolatileBlock) -> ArenaResult<()> {
        let mut inner = self.inner.lock();
        self.check_handle(&inner, block)?;
        inner
            .free
            .release(block.offset)
            .map(|_| ())
            .ok_or(ArenaError::UnknownHandle(block.offset))
    }

    pub fn read(&self, block: &VolatileBlock, offset: u64, len: u64) -> ArenaResult<Vec<u8>> {
        let inner = self.inner.lock();
        let start = self.resolve(&inner, block, offset, len)?;
        Ok(inner.mmap[start..start + len as usize].to_vec())
    }

    pub fn write(&self, block: &VolatileBlock, offset: u64, bytes: &[u8]) -> ArenaResult<()> {
        let mut inner = self.inner.lock();
        let start = self.resolve(&inner, block, offset, bytes.len() as u64)?;
        inner.mmap[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Reclaim every block at once. Handles issued earlier become unknown.
    pub fn reset(&self) -> usize {
        let mut inner = self.inner.lock();
        let released = inner.free.reset();
        inner.generation += 1;
        drop(inner);

        log_event_with_fields(
            Event::ArenaReset,
            &[
                ("arena_id", &self.id.to_string()),
                ("released_blocks", &released.to_string()),
            ],
        );
        released
    }

    pub fn stats(&self) -> ArenaStats {
        let inner = self.inner.lock();
        ArenaStats {
            capacity: self.capacity,
            live_blocks: inner.free.live_count(),
            free_bytes: inner.free.free_bytes(),
            largest_free: inner.free.largest_free(),
        }
    }

    fn check_handle(&self, inner: &ArenaInner, block: &VolatileBlock) -> ArenaResult<()> {
        if block.arena_id != self.id
            || block.generation != inner.generation
            || !inner.free.is_live(block.offset)
        {
            return Err(ArenaError::UnknownHandle(block.offset));
        }
        Ok(())
    }

    fn resolve(
        &self,
        inner: &ArenaInner,
        block: &VolatileBlock,
        offset: u64,
        len: u64,
    ) -> ArenaResult<usize> {
        self.check_handle(inner, block)?;
        match offset.checked_add(len) {
            Some(end) if end <= block.len => Ok((block.offset + offset) as usize),
            _ => Err(ArenaError::OutOfBounds {
                offset,
                len,
                limit: block.len,
            }),
        }
    }
}

impl std::fmt::Debug for VolatileArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolatileArena")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .finish()
    }
}

fn checked_capacity(min_size: u64) -> ArenaResult<u64> {
    if min_size < MIN_ARENA_SIZE {
        return Err(ArenaError::SizeTooSmall {
            requested: min_size,
            minimum: MIN_ARENA_SIZE,
        });
    }
    let capacity = min_size
        .checked_add(BLOCK_ALIGN)
        .map(|_| align_up(min_size, BLOCK_ALIGN))
        .filter(|c| usize::try_from(*c).is_ok())
        .ok_or(ArenaError::OutOfMemory {
            requested: min_size,
            available: 0,
        })?;
    Ok(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_below_minimum_is_rejected() {
        let err = VolatileArena::create(MIN_ARENA_SIZE - 1).unwrap_err();
        assert_eq!(
            err,
            ArenaError::SizeTooSmall {
                requested: MIN_ARENA_SIZE - 1,
                minimum: MIN_ARENA_SIZE,
            }
        );
    }

    #[test]
    fn test_allocate_write_read() {
        let arena = VolatileArena::create(MIN_ARENA_SIZE).unwrap();
        let block = arena.allocate(10).unwrap();
        assert_eq!(arena.read(&block, 0, 10).unwrap(), vec![0u8; 10]);

        arena.write(&block, 2, b"abc").unwrap();
        assert_eq!(arena.read(&block, 2, 3).unwrap(), b"abc");
    }

    #[test]
    fn test_bounds_are_checked() {
        let arena = VolatileArena::create(MIN_ARENA_SIZE).unwrap();
        let block = arena.allocate(8).unwrap();
        assert!(matches!(
            arena.write(&block, 4, b"12345"),
            Err(ArenaError::OutOfBounds { .. })
        ));
        assert!(matches!(
            arena.read(&block, u64::MAX, 2),
            Err(ArenaError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_exhaustion_then_free_recovers() {
        let arena = VolatileArena::create(MIN_ARENA_SIZE).unwrap();
        let whole = arena.allocate(MIN_ARENA_SIZE).unwrap();
        assert!(matches!(
            arena.allocate(1),
            Err(ArenaError::OutOfMemory { .. })
        ));
        arena.free(&whole).unwrap();
        assert!(arena.allocate(1).is_ok());
    }

    #[test]
    fn test_double_free_and_foreign_handles() {
        let a = VolatileArena::create(MIN_ARENA_SIZE).unwrap();
        let b = VolatileArena::create(MIN_ARENA_SIZE).unwrap();
        let block = a.allocate(32).unwrap();

        assert_eq!(b.free(&block), Err(ArenaError::UnknownHandle(block.offset())));
        a.free(&block).unwrap();
        assert_eq!(a.free(&block), Err(ArenaError::UnknownHandle(block.offset())));
    }

    #[test]
    fn test_reset_invalidates_old_handles() {
        let arena = VolatileArena::create(MIN_ARENA_SIZE).unwrap();
        let old = arena.allocate(64).unwrap();
        arena.allocate(64).unwrap();
        assert_eq!(arena.reset(), 2);

        let fresh = arena.allocate(64).unwrap();
        assert_eq!(fresh.offset(), old.offset());
        assert!(arena.read(&old, 0, 1).is_err());
        assert!(arena.read(&fresh, 0, 1).is_ok());
        assert_eq!(arena.stats().live_blocks, 1);
    }

    #[test]
    fn test_create_in_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let arena = VolatileArena::create_in(dir.path(), MIN_ARENA_SIZE).unwrap();
        let block = arena.allocate(4096).unwrap();
        arena.write(&block, 0, &[7u8; 4096]).unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(arena.read(&block, 4095, 1).unwrap(), vec![7]);
    }
}
