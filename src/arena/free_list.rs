//! Address-ordered free list with coalescing
//!
//! Chunk metadata lives outside the arena: the arena bytes are all payload.

use std::collections::BTreeMap;

use crate::constants::BLOCK_ALIGN;
use crate::pool::codec::align_up;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FreeList {
    capacity: u64,
    /// offset -> length of each free chunk
    free: BTreeMap<u64, u64>,
    /// offset -> reserved length of each live chunk
    live: BTreeMap<u64, u64>,
}

impl FreeList {
    pub(crate) fn new(capacity: u64) -> Self {
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(0, capacity);
        }
        Self {
            capacity,
            free,
            live: BTreeMap::new(),
        }
    }

    /// Reserve a chunk for `size` bytes; lowest address first.
    pub(crate) fn allocate(&mut self, size: u64) -> Option<u64> {
        let need = size
            .checked_add(BLOCK_ALIGN)
            .map(|_| align_up(size.max(1), BLOCK_ALIGN))?;
        let (&offset, &len) = self.free.iter().find(|(_, len)| **len >= need)?;

        self.free.remove(&offset);
        if len > need {
            self.free.insert(offset + need, len - need);
        }
        self.live.insert(offset, need);
        Some(offset)
    }

    /// Return a live chunk. `None` if `offset` is not live.
    pub(crate) fn release(&mut self, offset: u64) -> Option<u64> {
        let len = self.live.remove(&offset)?;
        let mut start = offset;
        let mut end = offset + len;

        if let Some(next_len) = self.free.remove(&end) {
            end += next_len;
        }
        let prev = self
            .free
            .range(..start)
            .next_back()
            .map(|(&o, &l)| (o, l));
        if let Some((prev_off, prev_len)) = prev {
            if prev_off + prev_len == start {
                self.free.remove(&prev_off);
                start = prev_off;
            }
        }
        self.free.insert(start, end - start);
        Some(len)
    }

    pub(crate) fn is_live(&self, offset: u64) -> bool {
        self.live.contains_key(&offset)
    }

    /// Drop every live chunk.
    pub(crate) fn reset(&mut self) -> usize {
        let released = self.live.len();
        *self = FreeList::new(self.capacity);
        released
    }

    pub(crate) fn free_bytes(&self) -> u64 {
        self.free.values().sum()
    }

    pub(crate) fn largest_free(&self) -> u64 {
        self.free.values().copied().max().unwrap_or(0)
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live.len()
    }

    #[cfg(test)]
    fn free_chunks(&self) -> usize {
        self.free.len()
    }
}
