//! Allocation directory integrity tests
//!
//! Covers:
//! - Double free is rejected and changes nothing
//! - Exhaustion is recoverable by freeing
//! - Freeing the root clears it
//! - Durable heaps write in place

use pmheap::constants::{DEFAULT_POOL_MODE, MIN_POOL_SIZE};
use pmheap::{HeapErrorCode, HeapKind, PersistentHeap, PoolOptions, PoolStore};
use std::path::Path;
use tempfile::TempDir;

fn create_heap(dir: &Path, kind: HeapKind) -> PersistentHeap {
    PoolStore::new()
        .create_with(
            dir.join("alloc.pool"),
            MIN_POOL_SIZE,
            PoolOptions::default().with_kind(kind),
        )
        .unwrap()
}

#[test]
fn test_double_free_is_rejected_without_change() {
    let temp = TempDir::new().unwrap();
    let heap = create_heap(temp.path(), HeapKind::Transactional);
    let a = heap.allocate(40, 1).unwrap();
    let b = heap.allocate(40, 2).unwrap();
    heap.free(&a).unwrap();

    let before = heap.directory().unwrap();
    let err = heap.free(&a).unwrap_err();
    assert_eq!(err.code(), HeapErrorCode::UnknownHandle);
    assert_eq!(err.offset(), Some(a.offset()));
    assert_eq!(heap.directory().unwrap(), before);
    assert_eq!(heap.live_objects().unwrap(), vec![b]);
}

#[test]
fn test_stale_handle_after_reuse_is_unknown() {
    let temp = TempDir::new().unwrap();
    let heap = create_heap(temp.path(), HeapKind::Transactional);
    let old = heap.allocate(64, 1).unwrap();
    heap.free(&old).unwrap();
    let new = heap.allocate(32, 2).unwrap();
    assert_eq!(new.offset(), old.offset());

    assert_eq!(
        heap.read(&old, 0, 1).unwrap_err().code(),
        HeapErrorCode::UnknownHandle
    );
    assert_eq!(
        heap.free(&old).unwrap_err().code(),
        HeapErrorCode::UnknownHandle
    );
    assert!(heap.read(&new, 0, 1).is_ok());
}

#[test]
fn test_exhaustion_then_free_recovers() {
    let temp = TempDir::new().unwrap();
    let heap = create_heap(temp.path(), HeapKind::Transactional);
    let largest = heap.check().unwrap().largest_free;

    let err = heap.allocate(largest + 1, 0).unwrap_err();
    assert_eq!(err.code(), HeapErrorCode::OutOfSpace);

    let whole = heap.allocate(largest, 0).unwrap();
    assert_eq!(heap.check().unwrap().free_bytes, 0);
    assert_eq!(
        heap.allocate(1, 0).unwrap_err().code(),
        HeapErrorCode::OutOfSpace
    );

    heap.free(&whole).unwrap();
    assert_eq!(heap.check().unwrap().largest_free, largest);
    assert!(heap.allocate(1, 0).is_ok());
}

#[test]
fn test_oversized_request_is_out_of_space() {
    let temp = TempDir::new().unwrap();
    let heap = create_heap(temp.path(), HeapKind::Transactional);
    let err = heap.allocate(u64::MAX, 0).unwrap_err();
    assert_eq!(err.code(), HeapErrorCode::OutOfSpace);
    heap.check().unwrap();
}

#[test]
fn test_free_coalesces_neighbours() {
    let temp = TempDir::new().unwrap();
    let heap = create_heap(temp.path(), HeapKind::Transactional);
    let blocks_before = heap.directory().unwrap().len();

    let objects: Vec<_> = (0..4).map(|i| heap.allocate(100, i).unwrap()).collect();
    for obj in [&objects[1], &objects[3], &objects[0], &objects[2]] {
        heap.free(obj).unwrap();
    }

    assert_eq!(heap.directory().unwrap().len(), blocks_before);
    let stats = heap.check().unwrap();
    assert_eq!(stats.live_objects, 0);
    assert_eq!(stats.blocks, 1);
}

#[test]
fn test_free_of_root_clears_root() {
    let temp = TempDir::new().unwrap();
    let heap = create_heap(temp.path(), HeapKind::Transactional);
    let obj = heap.allocate(16, 0).unwrap();
    heap.set_root(Some(&obj)).unwrap();

    heap.free(&obj).unwrap();
    assert!(heap.root().unwrap().is_none());
}

#[test]
fn test_zero_size_allocation() {
    let temp = TempDir::new().unwrap();
    let heap = create_heap(temp.path(), HeapKind::Transactional);
    let obj = heap.allocate(0, 0).unwrap();
    assert_eq!(obj.size(), 0);
    assert!(heap.read(&obj, 0, 0).unwrap().is_empty());
    assert_eq!(
        heap.read(&obj, 0, 1).unwrap_err().code(),
        HeapErrorCode::OutOfBounds
    );
    heap.free(&obj).unwrap();
}

#[test]
fn test_stats_account_for_live_bytes() {
    let temp = TempDir::new().unwrap();
    let heap = create_heap(temp.path(), HeapKind::Transactional);
    heap.allocate(10, 0).unwrap();
    heap.allocate(20, 0).unwrap();

    let stats = heap.check().unwrap();
    assert_eq!(stats.live_objects, 2);
    assert_eq!(stats.live_bytes, 30);
    let json = serde_json::to_value(stats).unwrap();
    assert_eq!(json["live_objects"], 2);
}

#[test]
fn test_durable_heap_writes_in_place() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("alloc.pool");
    {
        let heap = create_heap(temp.path(), HeapKind::Durable);
        let obj = heap.allocate(32, 5).unwrap();
        heap.set_root(Some(&obj)).unwrap();

        let committed = heap.metrics().tx_committed;
        heap.write(&obj, 0, b"durable").unwrap();
        heap.write_u32(&obj, 28, 99).unwrap();
        assert_eq!(heap.metrics().tx_committed, committed);
        heap.flush(&obj, 0, 32).unwrap();
        heap.close().unwrap();
    }

    let heap = PoolStore::new().open(&path).unwrap();
    let obj = heap.root().unwrap().unwrap();
    assert_eq!(heap.read(&obj, 0, 7).unwrap(), b"durable");
    assert_eq!(heap.read_u32(&obj, 28).unwrap(), 99);
}

#[test]
fn test_durable_copy_between_objects() {
    let temp = TempDir::new().unwrap();
    let heap = create_heap(temp.path(), HeapKind::Durable);
    let src = heap.allocate(16, 0).unwrap();
    let dst = heap.allocate(16, 0).unwrap();
    heap.write(&src, 0, b"0123456789abcdef").unwrap();

    heap.copy(&src, 4, &dst, 8, 8).unwrap();
    assert_eq!(heap.read(&dst, 8, 8).unwrap(), b"456789ab");
    assert_eq!(
        heap.copy(&src, 10, &dst, 0, 8).unwrap_err().code(),
        HeapErrorCode::OutOfBounds
    );
}

#[test]
fn test_flush_is_bounds_checked() {
    let temp = TempDir::new().unwrap();
    let heap = create_heap(temp.path(), HeapKind::Transactional);
    let obj = heap.allocate(16, 0).unwrap();
    heap.flush(&obj, 0, 16).unwrap();
    assert_eq!(
        heap.flush(&obj, 8, 9).unwrap_err().code(),
        HeapErrorCode::OutOfBounds
    );
}
