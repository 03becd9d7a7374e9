//! In-memory allocation directory
//!
//! Mirrors the block headers of the heap region, keyed by block offset.
//! The directory is never persisted on its own; it is rebuilt from the
//! block headers on open and kept in step with every header write.

use serde::Serialize;
use std::collections::BTreeMap;

use super::entry::{DirectoryEntry, BLOCK_HEADER_SIZE};

/// Summary of heap occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub blocks: u64,
    pub live_objects: u64,
    /// Sum of requested object sizes.
    pub live_bytes: u64,
    /// Sum of free block capacities.
    pub free_bytes: u64,
    pub largest_free: u64,
}

/// Live and free blocks of one heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationDirectory {
    heap_start: u64,
    heap_end: u64,
    entries: BTreeMap<u64, DirectoryEntry>,
}

impl AllocationDirectory {
    pub fn new(heap_start: u64, heap_end: u64) -> Self {
        Self {
            heap_start,
            heap_end,
            entries: BTreeMap::new(),
        }
    }

    pub fn heap_start(&self) -> u64 {
        self.heap_start
    }

    pub fn heap_end(&self) -> u64 {
        self.heap_end
    }

    /// Insert or replace the entry for `entry.block`.
    pub fn insert(&mut self, entry: DirectoryEntry) {
        self.entries.insert(entry.block, entry);
    }

    pub fn remove(&mut self, block: u64) -> Option<DirectoryEntry> {
        self.entries.remove(&block)
    }

    pub fn get(&self, block: u64) -> Option<&DirectoryEntry> {
        self.entries.get(&block)
    }

    /// Live entry whose payload starts at `payload`.
    pub fn live_at(&self, payload: u64) -> Option<&DirectoryEntry> {
        let block = payload.checked_sub(BLOCK_HEADER_SIZE)?;
        self.entries.get(&block).filter(|e| e.live)
    }

    /// Entry immediately after `block`.
    pub fn next_of(&self, block: u64) -> Option<&DirectoryEntry> {
        self.entries.range(block + 1..).next().map(|(_, e)| e)
    }

    /// Entry immediately before `block`.
    pub fn prev_of(&self, block: u64) -> Option<&DirectoryEntry> {
        self.entries.range(..block).next_back().map(|(_, e)| e)
    }

    /// Lowest-addressed free block with at least `capacity` payload bytes.
    pub fn first_fit(&self, capacity: u64) -> Option<DirectoryEntry> {
        self.entries
            .values()
            .find(|e| !e.live && e.capacity >= capacity)
            .copied()
    }

    /// All entries in address order.
    pub fn iter(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.values()
    }

    pub fn live_entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.values().filter(|e| e.live)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats::default();
        for entry in self.entries.values() {
            stats.blocks += 1;
            if entry.live {
                stats.live_objects += 1;
                stats.live_bytes += entry.length;
            } else {
                stats.free_bytes += entry.capacity;
                stats.largest_free = stats.largest_free.max(entry.capacity);
            }
        }
        stats
    }
}
