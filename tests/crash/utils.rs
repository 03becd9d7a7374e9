//! Crash testing utilities
//!
//! Seeds a pool the parent can hand to a child, and reopens it afterwards.

use pmheap::constants::{DEFAULT_POOL_MODE, MIN_POOL_SIZE};
use pmheap::{PersistentHeap, PersistentObject, PoolStore};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Byte the seeded root object is filled with
pub const SEED_BYTE: u8 = 0xaa;

/// Byte child workloads write
pub const CHILD_BYTE: u8 = 0xbb;

/// Size of the seeded root object
pub const ROOT_SIZE: u64 = 256;

pub fn pool_path(data_dir: &Path) -> PathBuf {
    data_dir.join("crash.pool")
}

/// Create a temporary data directory for crash testing
pub fn create_temp_data_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

/// Create a pool whose root is a `ROOT_SIZE` object filled with
/// `SEED_BYTE`, then close it so a child can take the lock.
pub fn seed_pool(data_dir: &Path) -> PersistentObject {
    let heap = PoolStore::new()
        .create(pool_path(data_dir), MIN_POOL_SIZE, DEFAULT_POOL_MODE)
        .expect("Failed to create pool");
    let root = heap
        .allocate_with(ROOT_SIZE, 1, |tx, obj| {
            tx.write(obj, 0, &[SEED_BYTE; ROOT_SIZE as usize])?;
            tx.set_root(Some(obj))
        })
        .expect("Failed to seed pool");
    heap.close().expect("Failed to close seeded pool");
    root
}

/// Open the pool and return its root.
pub fn open_root(data_dir: &Path) -> (PersistentHeap, PersistentObject) {
    let heap = PoolStore::new()
        .open(pool_path(data_dir))
        .expect("Failed to open pool");
    let root = heap
        .root()
        .expect("Failed to read root")
        .expect("Pool has no root");
    (heap, root)
}

/// Assert the root still holds exactly the seeded bytes.
pub fn assert_root_filled(heap: &PersistentHeap, root: &PersistentObject, byte: u8) {
    let bytes = heap.read(root, 0, ROOT_SIZE).expect("Failed to read root");
    assert_eq!(bytes, vec![byte; ROOT_SIZE as usize]);
}
