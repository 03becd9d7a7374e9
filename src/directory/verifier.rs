//! Directory rebuild and consistency verification
//!
//! Walks the heap region block by block from `heap_start`. Every header
//! must decode, every block must end inside the heap, and the walk must
//! land exactly on `heap_end`. Any violation is corruption; nothing is
//! repaired.

use crate::pool::errors::{HeapError, HeapResult};

use super::directory::{AllocationDirectory, HeapStats};
use super::entry::{BlockHeader, DirectoryEntry, BLOCK_HEADER_SIZE};

/// Source of heap blocks in address order.
pub trait BlockScan {
    /// Next block, `None` at the end of the heap, `Err` on corruption.
    fn scan_next(&mut self) -> HeapResult<Option<DirectoryEntry>>;
}

/// Scans block headers directly from pool bytes.
pub struct BlockScanner<'a> {
    pool: &'a [u8],
    cursor: u64,
    heap_end: u64,
}

impl<'a> BlockScanner<'a> {
    pub fn new(pool: &'a [u8], heap_start: u64, heap_end: u64) -> Self {
        Self {
            pool,
            cursor: heap_start,
            heap_end,
        }
    }
}

impl BlockScan for BlockScanner<'_> {
    fn scan_next(&mut self) -> HeapResult<Option<DirectoryEntry>> {
        if self.cursor == self.heap_end {
            return Ok(None);
        }
        let block = self.cursor;
        let header_end = block + BLOCK_HEADER_SIZE;
        if header_end > self.heap_end || header_end > self.pool.len() as u64 {
            return Err(HeapError::corrupt_at_offset(
                block,
                "block header extends past heap end",
            ));
        }
        let header = BlockHeader::decode(&self.pool[block as usize..header_end as usize])
            .map_err(|reason| HeapError::corrupt_at_offset(block, reason))?;

        let entry = DirectoryEntry::from_header(block, &header);
        let end = entry
            .checked_end()
            .filter(|end| *end <= self.heap_end)
            .ok_or_else(|| {
                HeapError::corrupt_at_offset(
                    block,
                    format!(
                        "block of capacity {} extends past heap end {}",
                        entry.capacity, self.heap_end
                    ),
                )
            })?;
        self.cursor = end;
        Ok(Some(entry))
    }
}

/// Rebuilds and checks allocation directories.
pub struct DirectoryVerifier;

impl DirectoryVerifier {
    /// Rebuild a directory from a block scan.
    pub fn rebuild<S: BlockScan>(
        scan: &mut S,
        heap_start: u64,
        heap_end: u64,
    ) -> HeapResult<AllocationDirectory> {
        let mut directory = AllocationDirectory::new(heap_start, heap_end);
        while let Some(entry) = scan.scan_next()? {
            directory.insert(entry);
        }
        Ok(directory)
    }

    /// Verify that every range lies inside the heap, live ranges never
    /// overlap, and the blocks tile the heap with no gap.
    pub fn verify(directory: &AllocationDirectory) -> HeapResult<HeapStats> {
        let mut expected = directory.heap_start();
        for entry in directory.iter() {
            let end = entry
                .checked_end()
                .filter(|end| entry.block >= directory.heap_start() && *end <= directory.heap_end())
                .ok_or_else(|| {
                    HeapError::corrupt_at_offset(entry.block, "block range outside heap bounds")
                })?;
            if entry.block < expected {
                return Err(HeapError::corrupt_at_offset(
                    entry.block,
                    "block overlaps its predecessor",
                ));
            }
            if entry.block > expected {
                return Err(HeapError::corrupt_at_offset(
                    expected,
                    "gap between blocks",
                ));
            }
            expected = end;
        }
        if expected != directory.heap_end() {
            return Err(HeapError::corrupt_at_offset(
                expected,
                "blocks do not reach heap end",
            ));
        }
        Ok(directory.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::errors::HeapErrorCode;

    const START: u64 = 64;

    fn pool_with(blocks: &[BlockHeader]) -> (Vec<u8>, u64) {
        let end = START
            + blocks
                .iter()
                .map(|b| BLOCK_HEADER_SIZE + b.capacity)
                .sum::<u64>();
        let mut pool = vec![0u8; end as usize];
        let mut cursor = START;
        for b in blocks {
            pool[cursor as usize..(cursor + BLOCK_HEADER_SIZE) as usize]
                .copy_from_slice(&b.encode());
            cursor += BLOCK_HEADER_SIZE + b.capacity;
        }
        (pool, end)
    }

    #[test]
    fn test_rebuild_and_verify() {
        let (pool, end) = pool_with(&[
            BlockHeader::live(32, 30, 9),
            BlockHeader::free(64),
            BlockHeader::live(16, 16, 2),
        ]);
        let dir = DirectoryVerifier::rebuild(&mut BlockScanner::new(&pool, START, end), START, end)
            .unwrap();
        let stats = DirectoryVerifier::verify(&dir).unwrap();
        assert_eq!(stats.blocks, 3);
        assert_eq!(stats.live_objects, 2);
        assert_eq!(stats.live_bytes, 46);
    }

    #[test]
    fn test_corrupt_header_reports_offset() {
        let (mut pool, end) = pool_with(&[BlockHeader::live(32, 30, 9), BlockHeader::free(64)]);
        let second = START + BLOCK_HEADER_SIZE + 32;
        pool[second as usize + 8] ^= 0x40;

        let err = DirectoryVerifier::rebuild(&mut BlockScanner::new(&pool, START, end), START, end)
            .unwrap_err();
        assert_eq!(err.code(), HeapErrorCode::CorruptPool);
        assert_eq!(err.offset(), Some(second));
    }

    #[test]
    fn test_block_past_heap_end() {
        let (pool, end) = pool_with(&[BlockHeader::free(64)]);
        let result =
            DirectoryVerifier::rebuild(&mut BlockScanner::new(&pool, START, end - 16), START, end - 16);
        assert!(result.is_err());
    }

    #[test]
    fn test_overflowing_capacity_is_corrupt() {
        let (mut pool, end) = pool_with(&[BlockHeader::free(64)]);
        let forged = BlockHeader::free(u64::MAX & !15).encode();
        pool[START as usize..(START + BLOCK_HEADER_SIZE) as usize].copy_from_slice(&forged);

        let err = DirectoryVerifier::rebuild(&mut BlockScanner::new(&pool, START, end), START, end)
            .unwrap_err();
        assert_eq!(err.code(), HeapErrorCode::CorruptPool);
        assert_eq!(err.offset(), Some(START));
    }

    #[test]
    fn test_verify_detects_overlap() {
        let mut dir = AllocationDirectory::new(START, START + 2 * BLOCK_HEADER_SIZE + 64);
        dir.insert(DirectoryEntry::from_header(START, &BlockHeader::live(48, 8, 0)));
        dir.insert(DirectoryEntry::from_header(
            START + BLOCK_HEADER_SIZE + 16,
            &BlockHeader::live(16, 8, 0),
        ));
        assert!(DirectoryVerifier::verify(&dir).is_err());
    }

    #[test]
    fn test_verify_detects_short_tiling() {
        let mut dir = AllocationDirectory::new(START, START + 4096);
        dir.insert(DirectoryEntry::from_header(START, &BlockHeader::free(64)));
        let err = DirectoryVerifier::verify(&dir).unwrap_err();
        assert!(err.message().contains("heap end"));
    }
}
