//! Volatile arena tests
//!
//! Covers:
//! - Minimum size is enforced and the failure text fits the fixed buffer
//! - Arenas are independent of pools and of each other
//! - Reset reclaims everything at once

use pmheap::constants::{ERROR_MESSAGE_SIZE, MIN_ARENA_SIZE, MIN_POOL_SIZE};
use pmheap::{ArenaError, VolatileArena};
use tempfile::TempDir;

#[test]
fn test_arena_below_minimum_fails_with_full_message() {
    let err = VolatileArena::create(MIN_ARENA_SIZE - 1).unwrap_err();
    assert!(matches!(err, ArenaError::SizeTooSmall { .. }));

    let mut buf = [0u8; ERROR_MESSAGE_SIZE];
    let n = err.message_into(&mut buf);
    let text = std::str::from_utf8(&buf[..n]).unwrap();
    assert_eq!(text, err.to_string());
    assert!(text.contains(&MIN_ARENA_SIZE.to_string()));
    assert_eq!(buf[n], 0);
}

#[test]
fn test_pool_minimum_is_not_enough_for_an_arena() {
    assert!(VolatileArena::create(MIN_POOL_SIZE).is_err());
    assert!(VolatileArena::create(MIN_ARENA_SIZE).is_ok());
}

#[test]
fn test_capacity_is_rounded_to_alignment() {
    let arena = VolatileArena::create(MIN_ARENA_SIZE + 1).unwrap();
    assert_eq!(arena.capacity(), MIN_ARENA_SIZE + 16);
}

#[test]
fn test_allocation_until_exhausted() {
    let arena = VolatileArena::create(MIN_ARENA_SIZE).unwrap();
    let chunk = 64 * 1024;
    let blocks: Vec<_> = (0..MIN_ARENA_SIZE / chunk)
        .map(|_| arena.allocate(chunk).unwrap())
        .collect();

    let err = arena.allocate(1).unwrap_err();
    assert_eq!(
        err,
        ArenaError::OutOfMemory {
            requested: 1,
            available: 0
        }
    );

    arena.free(&blocks[3]).unwrap();
    let again = arena.allocate(chunk).unwrap();
    assert_eq!(again.offset(), blocks[3].offset());
}

#[test]
fn test_blocks_do_not_overlap() {
    let arena = VolatileArena::create(MIN_ARENA_SIZE).unwrap();
    let blocks: Vec<_> = (1..=32u8)
        .map(|i| {
            let block = arena.allocate(i as u64 * 3).unwrap();
            arena.write(&block, 0, &vec![i; block.len() as usize]).unwrap();
            block
        })
        .collect();

    for (i, block) in blocks.iter().enumerate() {
        let expected = vec![i as u8 + 1; block.len() as usize];
        assert_eq!(arena.read(block, 0, block.len()).unwrap(), expected);
    }
}

#[test]
fn test_reset_reclaims_everything() {
    let arena = VolatileArena::create(MIN_ARENA_SIZE).unwrap();
    for _ in 0..10 {
        arena.allocate(1000).unwrap();
    }
    assert_eq!(arena.stats().live_blocks, 10);

    assert_eq!(arena.reset(), 10);
    let stats = arena.stats();
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(stats.free_bytes, arena.capacity());
    assert_eq!(stats.largest_free, arena.capacity());
}

#[test]
fn test_file_backed_arena_is_not_persistent() {
    let dir = TempDir::new().unwrap();
    {
        let arena = VolatileArena::create_in(dir.path(), MIN_ARENA_SIZE).unwrap();
        let block = arena.allocate(128).unwrap();
        arena.write(&block, 0, &[9u8; 128]).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_create_in_missing_directory_fails_with_bounded_message() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("no").join("such").join("dir");
    let err = VolatileArena::create_in(&missing, MIN_ARENA_SIZE).unwrap_err();
    assert!(matches!(err, ArenaError::Io(_)));
    assert!(err.to_string().len() < ERROR_MESSAGE_SIZE);
}
