//! Undo replay
//!
//! Restores pre-images strictly last record first, then issues one
//! durability barrier per restored range. Replay is idempotent: running it
//! twice over the same records yields the same bytes, so a crash during
//! replay is handled by replaying again on the next open.

use std::io;

use crate::pool::PoolMapping;
use crate::txn::UndoRecord;

/// Destination of restored pre-images.
pub trait RestoreTarget {
    /// Copy `bytes` back to `offset`.
    fn restore(&mut self, offset: u64, bytes: &[u8]);

    /// Durability barrier over a restored range.
    fn barrier(&mut self, offset: u64, len: u64) -> io::Result<()>;
}

impl RestoreTarget for PoolMapping {
    fn restore(&mut self, offset: u64, bytes: &[u8]) {
        self.write_at(offset, bytes);
    }

    fn barrier(&mut self, offset: u64, len: u64) -> io::Result<()> {
        self.persist(offset, len)
    }
}

/// Statistics from undo replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Number of records replayed
    pub records_replayed: u64,
    /// Total pre-image bytes written back
    pub bytes_restored: u64,
}

/// Replays undo records against a restore target.
pub struct UndoReplayer;

impl UndoReplayer {
    /// Replay `records` (oldest first as stored) in reverse order.
    pub fn replay<T: RestoreTarget>(records: &[UndoRecord], target: &mut T) -> io::Result<ReplayStats> {
        let mut stats = ReplayStats::default();

        for record in records.iter().rev() {
            target.restore(record.offset, &record.pre_image);
            stats.records_replayed += 1;
            stats.bytes_restored += record.len();
        }

        for record in records {
            target.barrier(record.offset, record.len())?;
        }

        Ok(stats)
    }
}
