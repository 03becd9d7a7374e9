//! Undo log
//!
//! Occupies `[HEADER_SIZE, heap_start)` of the pool file. The region's
//! size is fixed per pool at creation and bounds the pre-image volume of
//! one transaction.
//!
//! Log header (64 bytes):
//!
//! ```text
//! 0   magic     u32
//! 4   reserved  u32
//! 8   state     u64   0 Idle, 1 Active, 2 Committed
//! 16  tx_id     u64
//! 24  count     u64   number of valid records
//! ```
//!
//! Records follow contiguously: target offset `u64`, length `u64`, CRC32
//! `u32` over (offset, length, pre-image), pad `u32`, then the pre-image
//! padded to 8 bytes.
//!
//! # Append protocol
//!
//! 1. Write the record after the last counted record and persist it
//! 2. Bump the count and persist it
//!
//! A crash between the two steps leaves an uncounted record, which replay
//! never reads. The count is therefore always a valid prefix.

use std::io;

use crate::constants::HEADER_SIZE;
use crate::crash_point::{maybe_crash, points};
use crate::pool::checksum::compute_checksum_parts;
use crate::pool::codec::{align_up, get_u32, get_u64, put_u32, put_u64};
use crate::pool::errors::{HeapError, HeapResult};
use crate::pool::PoolMapping;

/// Magic number of the undo log header ("UNDO").
pub const LOG_MAGIC: u32 = 0x4F44_4E55;

/// Size of the log header.
pub const LOG_HEADER_SIZE: u64 = 64;

const RECORD_HEADER_SIZE: u64 = 24;

const OFF_STATE: u64 = 8;
const OFF_TX_ID: u64 = 16;
const OFF_COUNT: u64 = 24;

/// Persistent state word of the undo log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogState {
    /// No transaction in flight
    Idle,
    /// Records may be staged; replay on recovery
    Active,
    /// Commit point reached; records are discarded on recovery
    Committed,
}

impl LogState {
    fn to_raw(self) -> u64 {
        match self {
            LogState::Idle => 0,
            LogState::Active => 1,
            LogState::Committed => 2,
        }
    }

    fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(LogState::Idle),
            1 => Some(LogState::Active),
            2 => Some(LogState::Committed),
            _ => None,
        }
    }
}

/// One captured pre-image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoRecord {
    pub offset: u64,
    pub pre_image: Vec<u8>,
}

impl UndoRecord {
    pub fn len(&self) -> u64 {
        self.pre_image.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.pre_image.is_empty()
    }
}

/// Cursor over the undo log region of one pool.
#[derive(Debug)]
pub struct UndoLog {
    /// First byte past the log region.
    end: u64,
    state: LogState,
    tx_id: u64,
    count: u64,
    used: u64,
}

impl UndoLog {
    /// Write an empty Idle log into a fresh pool whose log region ends at `end`.
    pub fn format(map: &mut PoolMapping, end: u64) -> io::Result<Self> {
        let log = Self {
            end,
            state: LogState::Idle,
            tx_id: 0,
            count: 0,
            used: 0,
        };
        log.write_header(map)?;
        Ok(log)
    }

    /// Read the log header from pool bytes; the region ends at `end`.
    pub fn load(pool: &[u8], end: u64) -> HeapResult<Self> {
        if end < HEADER_SIZE + LOG_HEADER_SIZE || (pool.len() as u64) < end {
            return Err(HeapError::corrupt_at_offset(
                HEADER_SIZE,
                "pool too short for undo log",
            ));
        }
        let header = &pool[HEADER_SIZE as usize..(HEADER_SIZE + LOG_HEADER_SIZE) as usize];
        if get_u32(header, 0) != LOG_MAGIC {
            return Err(HeapError::corrupt_at_offset(
                HEADER_SIZE,
                "invalid undo log magic",
            ));
        }
        let raw_state = get_u64(header, OFF_STATE as usize);
        let state = LogState::from_raw(raw_state).ok_or_else(|| {
            HeapError::corrupt_at_offset(
                HEADER_SIZE + OFF_STATE,
                format!("invalid undo log state {}", raw_state),
            )
        })?;
        Ok(Self {
            end,
            state,
            tx_id: get_u64(header, OFF_TX_ID as usize),
            count: get_u64(header, OFF_COUNT as usize),
            used: 0,
        })
    }

    pub fn state(&self) -> LogState {
        self.state
    }

    pub fn tx_id(&self) -> u64 {
        self.tx_id
    }

    pub fn record_count(&self) -> u64 {
        self.count
    }

    /// Bytes available for records.
    pub fn capacity(&self) -> u64 {
        self.end - self.records_start()
    }

    /// Open the log for transaction `tx_id`.
    pub fn begin(&mut self, map: &mut PoolMapping, tx_id: u64) -> HeapResult<()> {
        self.state = LogState::Active;
        self.tx_id = tx_id;
        self.count = 0;
        self.used = 0;
        self.write_header(map)
            .map_err(|e| HeapError::device("failed to open undo log", e))
    }

    /// Capture the current bytes of `[target, target + len)` as a record.
    pub fn append(&mut self, map: &mut PoolMapping, target: u64, len: u64) -> HeapResult<()> {
        let record_len = RECORD_HEADER_SIZE + align_up(len, 8);
        let available = self.capacity() - self.used;
        if record_len > available {
            return Err(HeapError::out_of_space(len, "undo log is full"));
        }

        let mut record = vec![0u8; record_len as usize];
        put_u64(&mut record, 0, target);
        put_u64(&mut record, 8, len);
        record[RECORD_HEADER_SIZE as usize..(RECORD_HEADER_SIZE + len) as usize]
            .copy_from_slice(map.range(target, len));
        let crc = compute_checksum_parts(&[
            &record[..16],
            &record[RECORD_HEADER_SIZE as usize..(RECORD_HEADER_SIZE + len) as usize],
        ]);
        put_u32(&mut record, 16, crc);

        let at = self.records_start() + self.used;
        map.write_at(at, &record);
        map.persist(at, record_len)
            .map_err(|e| HeapError::device("failed to persist undo record", e))?;

        maybe_crash(points::TX_AFTER_UNDO_APPEND);

        let mut count = [0u8; 8];
        put_u64(&mut count, 0, self.count + 1);
        map.write_at(HEADER_SIZE + OFF_COUNT, &count);
        map.persist(HEADER_SIZE + OFF_COUNT, 8)
            .map_err(|e| HeapError::device("failed to persist undo record count", e))?;

        self.count += 1;
        self.used += record_len;
        Ok(())
    }

    /// Decode the counted records, oldest first.
    ///
    /// `pool` is the whole pool; every record must checksum and target a
    /// range outside the log region.
    pub fn records(&self, pool: &[u8]) -> HeapResult<Vec<UndoRecord>> {
        let pool_len = pool.len() as u64;
        let log_end = self.end;
        let mut records = Vec::with_capacity(self.count.min(1024) as usize);
        let mut at = self.records_start();

        for _ in 0..self.count {
            if at + RECORD_HEADER_SIZE > log_end {
                return Err(HeapError::corrupt_at_offset(at, "undo record past log end"));
            }
            let head = &pool[at as usize..(at + RECORD_HEADER_SIZE) as usize];
            let target = get_u64(head, 0);
            let len = get_u64(head, 8);
            let stored_crc = get_u32(head, 16);

            if len > self.capacity() {
                return Err(HeapError::corrupt_at_offset(at, "undo record length out of range"));
            }
            let data_start = at + RECORD_HEADER_SIZE;
            let next = data_start
                .checked_add(align_up(len, 8))
                .filter(|next| *next <= log_end)
                .ok_or_else(|| HeapError::corrupt_at_offset(at, "undo record past log end"))?;
            let data = &pool[data_start as usize..(data_start + len) as usize];

            if compute_checksum_parts(&[&head[..16], data]) != stored_crc {
                return Err(HeapError::corrupt_at_offset(at, "undo record checksum mismatch"));
            }
            let target_end = target
                .checked_add(len)
                .filter(|end| *end <= pool_len)
                .ok_or_else(|| HeapError::corrupt_at_offset(at, "undo record targets past pool end"))?;
            if target < self.end && target_end > HEADER_SIZE {
                return Err(HeapError::corrupt_at_offset(at, "undo record targets the log region"));
            }

            records.push(UndoRecord {
                offset: target,
                pre_image: data.to_vec(),
            });
            at = next;
        }
        Ok(records)
    }

    /// Flip the state word to Committed. This is the commit point.
    pub fn mark_committed(&mut self, map: &mut PoolMapping) -> io::Result<()> {
        self.state = LogState::Committed;
        let mut word = [0u8; 8];
        put_u64(&mut word, 0, LogState::Committed.to_raw());
        map.write_at(HEADER_SIZE + OFF_STATE, &word);
        map.persist(HEADER_SIZE + OFF_STATE, 8)
    }

    /// Discard all records and return to Idle.
    pub fn clear(&mut self, map: &mut PoolMapping) -> io::Result<()> {
        self.state = LogState::Idle;
        self.count = 0;
        self.used = 0;
        self.write_header(map)
    }

    fn records_start(&self) -> u64 {
        HEADER_SIZE + LOG_HEADER_SIZE
    }

    fn write_header(&self, map: &mut PoolMapping) -> io::Result<()> {
        let mut header = [0u8; LOG_HEADER_SIZE as usize];
        put_u32(&mut header, 0, LOG_MAGIC);
        put_u64(&mut header, OFF_STATE as usize, self.state.to_raw());
        put_u64(&mut header, OFF_TX_ID as usize, self.tx_id);
        put_u64(&mut header, OFF_COUNT as usize, self.count);
        map.write_at(HEADER_SIZE, &header);
        map.persist(HEADER_SIZE, LOG_HEADER_SIZE)
    }
}
