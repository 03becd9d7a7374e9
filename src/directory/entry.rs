//! On-media block header codec
//!
//! The heap region is tiled by blocks. Each block starts with a 48-byte
//! header followed by `capacity` payload bytes:
//!
//! ```text
//! 0   magic     u32
//! 4   flags     u32   bit 0 = live
//! 8   capacity  u64   payload bytes, multiple of BLOCK_ALIGN
//! 16  length    u64   requested object size (0 for free blocks)
//! 24  type_tag  u64
//! 32  reserved  u64
//! 40  crc32     u32   over bytes [0, 40)
//! 44  pad       u32
//! ```

use crate::constants::BLOCK_ALIGN;
use crate::pool::checksum::compute_checksum;
use crate::pool::codec::{get_u32, get_u64, put_u32, put_u64};

/// Magic number at the start of every block header ("BLK1").
pub const BLOCK_MAGIC: u32 = 0x314B_4C42;

/// Encoded block header size in bytes.
pub const BLOCK_HEADER_SIZE: u64 = 48;

const FLAG_LIVE: u32 = 0x1;
const OFF_CRC: usize = 40;

/// Decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub live: bool,
    pub capacity: u64,
    pub length: u64,
    pub type_tag: u64,
}

impl BlockHeader {
    pub fn free(capacity: u64) -> Self {
        Self {
            live: false,
            capacity,
            length: 0,
            type_tag: 0,
        }
    }

    pub fn live(capacity: u64, length: u64, type_tag: u64) -> Self {
        Self {
            live: true,
            capacity,
            length,
            type_tag,
        }
    }

    pub fn encode(&self) -> [u8; BLOCK_HEADER_SIZE as usize] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
        put_u32(&mut buf, 0, BLOCK_MAGIC);
        put_u32(&mut buf, 4, if self.live { FLAG_LIVE } else { 0 });
        put_u64(&mut buf, 8, self.capacity);
        put_u64(&mut buf, 16, self.length);
        put_u64(&mut buf, 24, self.type_tag);
        let crc = compute_checksum(&buf[..OFF_CRC]);
        put_u32(&mut buf, OFF_CRC, crc);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        if buf.len() < BLOCK_HEADER_SIZE as usize {
            return Err("truncated block header".to_string());
        }
        if get_u32(buf, 0) != BLOCK_MAGIC {
            return Err("invalid block magic".to_string());
        }
        if compute_checksum(&buf[..OFF_CRC]) != get_u32(buf, OFF_CRC) {
            return Err("block header checksum mismatch".to_string());
        }
        let flags = get_u32(buf, 4);
        if flags & !FLAG_LIVE != 0 {
            return Err(format!("unknown block flags {:#x}", flags));
        }
        let header = Self {
            live: flags & FLAG_LIVE != 0,
            capacity: get_u64(buf, 8),
            length: get_u64(buf, 16),
            type_tag: get_u64(buf, 24),
        };
        if header.capacity == 0 || header.capacity % BLOCK_ALIGN != 0 {
            return Err(format!("invalid block capacity {}", header.capacity));
        }
        if header.length > header.capacity {
            return Err(format!(
                "block length {} exceeds capacity {}",
                header.length, header.capacity
            ));
        }
        Ok(header)
    }
}

/// One block of the heap region, as tracked by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Offset of the block header.
    pub block: u64,
    pub capacity: u64,
    pub length: u64,
    pub type_tag: u64,
    pub live: bool,
}

impl DirectoryEntry {
    pub fn from_header(block: u64, header: &BlockHeader) -> Self {
        Self {
            block,
            capacity: header.capacity,
            length: header.length,
            type_tag: header.type_tag,
            live: header.live,
        }
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            live: self.live,
            capacity: self.capacity,
            length: self.length,
            type_tag: self.type_tag,
        }
    }

    /// First payload byte.
    pub fn payload(&self) -> u64 {
        self.block + BLOCK_HEADER_SIZE
    }

    /// One past the last byte of the block.
    pub fn end(&self) -> u64 {
        self.payload() + self.capacity
    }

    /// `end`, or `None` when a decoded capacity overflows the address space.
    pub fn checked_end(&self) -> Option<u64> {
        self.block
            .checked_add(BLOCK_HEADER_SIZE)?
            .checked_add(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_header_roundtrip() {
        let header = BlockHeader::live(64, 50, 7);
        assert_eq!(BlockHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn test_rejects_torn_header() {
        let mut buf = BlockHeader::free(4096).encode();
        buf[9] ^= 0xFF;
        assert!(BlockHeader::decode(&buf).unwrap_err().contains("checksum"));
    }

    #[test]
    fn test_rejects_zeroed_bytes() {
        assert!(BlockHeader::decode(&[0u8; 48]).unwrap_err().contains("magic"));
    }

    #[test]
    fn test_entry_geometry() {
        let entry = DirectoryEntry::from_header(1024, &BlockHeader::live(32, 20, 1));
        assert_eq!(entry.payload(), 1072);
        assert_eq!(entry.end(), 1104);
        assert_eq!(entry.checked_end(), Some(1104));

        let huge = DirectoryEntry::from_header(1024, &BlockHeader::free(u64::MAX & !15));
        assert_eq!(huge.checked_end(), None);
    }
}
