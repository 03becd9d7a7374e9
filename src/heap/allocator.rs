//! First-fit block allocator
//!
//! Allocation takes the lowest-addressed free block that fits, splitting
//! off the tail as a new free block when the remainder can hold a header
//! and one aligned payload unit. Release marks the block free and merges
//! it with free neighbours on both sides, so two adjacent free blocks
//! never survive a release.
//!
//! Every header change goes through `LoggedWrite`, which captures the
//! pre-image before bytes change. The directory is updated only after all
//! writes for the operation succeeded.

use crate::constants::BLOCK_ALIGN;
use crate::crash_point::{maybe_crash, points};
use crate::directory::{AllocationDirectory, DirectoryEntry, BLOCK_HEADER_SIZE};
use crate::pool::codec::align_up;
use crate::pool::errors::{HeapError, HeapResult};

/// Writes pool bytes after capturing their pre-image.
pub(crate) trait LoggedWrite {
    fn write(&mut self, offset: u64, bytes: &[u8]) -> HeapResult<()>;
}

/// Payload capacity reserved for an object of `size` bytes.
pub(crate) fn capacity_for(size: u64) -> u64 {
    align_up(size.max(1), BLOCK_ALIGN)
}

pub(crate) struct FirstFit;

impl FirstFit {
    /// Carve a live block for `size` bytes.
    pub(crate) fn allocate<W: LoggedWrite>(
        directory: &mut AllocationDirectory,
        writer: &mut W,
        size: u64,
        type_tag: u64,
    ) -> HeapResult<DirectoryEntry> {
        let capacity = size
            .checked_add(BLOCK_ALIGN)
            .map(|_| capacity_for(size))
            .ok_or_else(|| HeapError::out_of_space(size, "requested size overflows"))?;
        let free = directory.first_fit(capacity).ok_or_else(|| {
            HeapError::out_of_space(size, format!("no free block of {} bytes", capacity))
        })?;

        let spare = free.capacity - capacity;
        let remainder = if spare >= BLOCK_HEADER_SIZE + BLOCK_ALIGN {
            let remainder = DirectoryEntry {
                block: free.block + BLOCK_HEADER_SIZE + capacity,
                capacity: spare - BLOCK_HEADER_SIZE,
                length: 0,
                type_tag: 0,
                live: false,
            };
            writer.write(remainder.block, &remainder.header().encode())?;
            maybe_crash(points::ALLOC_AFTER_SPLIT);
            Some(remainder)
        } else {
            None
        };

        let live = DirectoryEntry {
            block: free.block,
            capacity: if remainder.is_some() { capacity } else { free.capacity },
            length: size,
            type_tag,
            live: true,
        };
        writer.write(live.block, &live.header().encode())?;

        if let Some(remainder) = remainder {
            directory.insert(remainder);
        }
        directory.insert(live);
        Ok(live)
    }

    /// Return the live block at `block` to the free space.
    pub(crate) fn release<W: LoggedWrite>(
        directory: &mut AllocationDirectory,
        writer: &mut W,
        block: u64,
    ) -> HeapResult<DirectoryEntry> {
        let entry = directory
            .get(block)
            .filter(|e| e.live)
            .copied()
            .ok_or_else(|| HeapError::unknown_handle(block + BLOCK_HEADER_SIZE))?;

        let mut merged = DirectoryEntry {
            length: 0,
            type_tag: 0,
            live: false,
            ..entry
        };
        let mut absorbed = Vec::with_capacity(2);

        if let Some(next) = directory.next_of(block).filter(|e| !e.live).copied() {
            merged.capacity += BLOCK_HEADER_SIZE + next.capacity;
            absorbed.push(next.block);
        }
        if let Some(prev) = directory.prev_of(block).filter(|e| !e.live).copied() {
            merged.capacity += BLOCK_HEADER_SIZE + prev.capacity;
            merged.block = prev.block;
            absorbed.push(block);
        }

        writer.write(merged.block, &merged.header().encode())?;

        for gone in absorbed {
            directory.remove(gone);
        }
        directory.insert(merged);
        Ok(merged)
    }
}
