//! Pool header
//!
//! Stored at offset 0 of every pool file; the first `HEADER_SIZE` bytes
//! are reserved for it. Root updates rewrite the encoded header through
//! the undo log, so the checksum always matches a complete header.
//!
//! `heap_start` also ends the undo log region. It is written once at
//! creation and never rewritten, so recovery can read it before replay
//! repairs a torn root update.

use uuid::Uuid;

use super::checksum::compute_checksum;
use super::codec::{get_u32, get_u64, put_u32, put_u64};
use super::config::HeapKind;
use crate::constants::{
    BLOCK_ALIGN, LOG_REGION_ALIGN, MIN_HEAP_SPAN, MIN_HEAP_START, MIN_POOL_SIZE,
};

/// Magic bytes identifying a pool file.
pub const POOL_MAGIC: [u8; 8] = *b"PMHEAP01";

/// Current on-media format version.
pub const POOL_VERSION: u32 = 1;

/// Encoded header length in bytes.
pub const ENCODED_HEADER_LEN: usize = 88;

const OFF_VERSION: usize = 8;
const OFF_KIND: usize = 12;
const OFF_POOL_ID: usize = 16;
const OFF_POOL_SIZE: usize = 32;
const OFF_HEAP_START: usize = 40;
const OFF_HEAP_END: usize = 48;
const OFF_ROOT_OFFSET: usize = 56;
const OFF_ROOT_SIZE: usize = 64;
const OFF_CREATED_AT: usize = 72;
const OFF_CRC: usize = 80;

/// Decoded pool header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHeader {
    pub version: u32,
    pub kind: HeapKind,
    /// Identity of the pool; carried by every object handle.
    pub pool_id: Uuid,
    pub pool_size: u64,
    pub heap_start: u64,
    pub heap_end: u64,
    /// Payload offset of the root object, 0 when unset.
    pub root_offset: u64,
    pub root_size: u64,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

impl PoolHeader {
    /// Header for a freshly created pool of `pool_size` bytes whose heap
    /// begins at `heap_start`.
    pub fn new(kind: HeapKind, pool_size: u64, heap_start: u64) -> Self {
        Self {
            version: POOL_VERSION,
            kind,
            pool_id: Uuid::new_v4(),
            pool_size,
            heap_start,
            heap_end: pool_size & !(BLOCK_ALIGN - 1),
            root_offset: 0,
            root_size: 0,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Encode with a trailing checksum.
    pub fn encode(&self) -> [u8; ENCODED_HEADER_LEN] {
        let mut buf = [0u8; ENCODED_HEADER_LEN];
        buf[..8].copy_from_slice(&POOL_MAGIC);
        put_u32(&mut buf, OFF_VERSION, self.version);
        put_u32(&mut buf, OFF_KIND, self.kind.to_raw());
        buf[OFF_POOL_ID..OFF_POOL_ID + 16].copy_from_slice(self.pool_id.as_bytes());
        put_u64(&mut buf, OFF_POOL_SIZE, self.pool_size);
        put_u64(&mut buf, OFF_HEAP_START, self.heap_start);
        put_u64(&mut buf, OFF_HEAP_END, self.heap_end);
        put_u64(&mut buf, OFF_ROOT_OFFSET, self.root_offset);
        put_u64(&mut buf, OFF_ROOT_SIZE, self.root_size);
        buf[OFF_CREATED_AT..OFF_CREATED_AT + 8].copy_from_slice(&self.created_at.to_le_bytes());
        let crc = compute_checksum(&buf[..OFF_CRC]);
        put_u32(&mut buf, OFF_CRC, crc);
        buf
    }

    /// Decode and validate a header read from the start of a pool file.
    ///
    /// `file_len` is the actual length of the file; the recorded pool size
    /// must match it.
    pub fn decode(buf: &[u8], file_len: u64) -> Result<Self, String> {
        if buf.len() < ENCODED_HEADER_LEN {
            return Err("file too short for a pool header".to_string());
        }
        if buf[..8] != POOL_MAGIC {
            return Err("invalid magic".to_string());
        }
        let stored_crc = get_u32(buf, OFF_CRC);
        if compute_checksum(&buf[..OFF_CRC]) != stored_crc {
            return Err("header checksum mismatch".to_string());
        }

        let version = get_u32(buf, OFF_VERSION);
        if version != POOL_VERSION {
            return Err(format!("incompatible pool version {}", version));
        }
        let kind = HeapKind::from_raw(get_u32(buf, OFF_KIND))
            .ok_or_else(|| format!("unknown heap kind {}", get_u32(buf, OFF_KIND)))?;

        let mut id = [0u8; 16];
        id.copy_from_slice(&buf[OFF_POOL_ID..OFF_POOL_ID + 16]);
        let mut created = [0u8; 8];
        created.copy_from_slice(&buf[OFF_CREATED_AT..OFF_CREATED_AT + 8]);

        let header = Self {
            version,
            kind,
            pool_id: Uuid::from_bytes(id),
            pool_size: get_u64(buf, OFF_POOL_SIZE),
            heap_start: get_u64(buf, OFF_HEAP_START),
            heap_end: get_u64(buf, OFF_HEAP_END),
            root_offset: get_u64(buf, OFF_ROOT_OFFSET),
            root_size: get_u64(buf, OFF_ROOT_SIZE),
            created_at: i64::from_le_bytes(created),
        };
        header.validate(file_len)?;
        Ok(header)
    }

    /// End of the undo log region, read without checking the header
    /// checksum.
    pub fn log_end(buf: &[u8], file_len: u64) -> Result<u64, String> {
        if buf.len() < ENCODED_HEADER_LEN || buf[..8] != POOL_MAGIC {
            return Err("invalid magic".to_string());
        }
        let heap_start = get_u64(buf, OFF_HEAP_START);
        check_heap_start(heap_start, file_len)?;
        Ok(heap_start)
    }

    fn validate(&self, file_len: u64) -> Result<(), String> {
        if self.pool_size != file_len {
            return Err(format!(
                "recorded pool size {} does not match file length {}",
                self.pool_size, file_len
            ));
        }
        if self.pool_size < MIN_POOL_SIZE {
            return Err(format!("pool size {} below minimum", self.pool_size));
        }
        check_heap_start(self.heap_start, self.pool_size)?;
        if self.heap_end > self.pool_size
            || self.heap_end <= self.heap_start
            || self.heap_end % BLOCK_ALIGN != 0
        {
            return Err(format!("invalid heap end {}", self.heap_end));
        }
        if self.root_offset != 0
            && (self.root_offset < self.heap_start
                || self.root_offset.saturating_add(self.root_size) > self.heap_end)
        {
            return Err(format!("root offset {} outside heap", self.root_offset));
        }
        Ok(())
    }

    /// Bytes available to the heap region.
    pub fn heap_span(&self) -> u64 {
        self.heap_end - self.heap_start
    }
}

fn check_heap_start(heap_start: u64, pool_size: u64) -> Result<(), String> {
    if heap_start < MIN_HEAP_START
        || heap_start % LOG_REGION_ALIGN != 0
        || pool_size.saturating_sub(heap_start) < MIN_HEAP_SPAN
    {
        return Err(format!("invalid heap start {}", heap_start));
    }
    Ok(())
}
