//! Open-time recovery sequence
//!
//! # Sequence (strict order)
//!
//! 1. Check the pool magic and locate the undo log region
//! 2. Load the undo log header
//! 3. Active log: validate every record, replay in reverse, clear
//! 4. Committed log: clear
//! 5. Decode and validate the pool header
//! 6. Rebuild the directory by scanning block headers
//! 7. Verify bounds, overlap and tiling
//! 8. Verify the root names a live object
//!
//! The header is decoded only after replay because a root update may have
//! been interrupted mid-write; its pre-image is in the log.

use std::path::Path;

use crate::constants::MIN_POOL_SIZE;
use crate::crash_point::{maybe_crash, points};
use crate::directory::{AllocationDirectory, BlockScanner, DirectoryVerifier, HeapStats};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::pool::errors::{HeapError, HeapResult};
use crate::pool::header::{PoolHeader, ENCODED_HEADER_LEN, POOL_MAGIC};
use crate::pool::PoolMapping;
use crate::txn::{LogState, UndoLog};

use super::replay::{ReplayStats, UndoReplayer};

/// Pool state after successful recovery
#[derive(Debug)]
pub struct RecoveredPool {
    pub header: PoolHeader,
    pub directory: AllocationDirectory,
    pub log: UndoLog,
    /// Undo replay statistics
    pub replay_stats: ReplayStats,
    /// Verification statistics
    pub stats: HeapStats,
    /// Whether an interrupted transaction was rolled back
    pub rolled_back: bool,
}

/// Runs recovery against a freshly mapped pool.
pub struct RecoveryManager;

impl RecoveryManager {
    /// Execute the full recovery sequence.
    ///
    /// Returns a FATAL error on any corruption; the pool is left as found
    /// apart from completed replay.
    pub fn recover(
        map: &mut PoolMapping,
        path: &Path,
        metrics: &MetricsRegistry,
    ) -> HeapResult<RecoveredPool> {
        let path_str = path.display().to_string();
        log_event_with_fields(Event::RecoveryBegin, &[("path", &path_str)]);

        match Self::run(map, path, metrics) {
            Ok(recovered) => {
                metrics.increment_recoveries();
                log_event_with_fields(
                    Event::RecoveryComplete,
                    &[
                        ("live_objects", &recovered.stats.live_objects.to_string()),
                        ("path", &path_str),
                        ("rolled_back", &recovered.rolled_back.to_string()),
                    ],
                );
                Ok(recovered)
            }
            Err(err) => {
                log_event_with_fields(
                    Event::RecoveryFailed,
                    &[("error", &err.to_string()), ("path", &path_str)],
                );
                Err(err)
            }
        }
    }

    fn run(
        map: &mut PoolMapping,
        path: &Path,
        metrics: &MetricsRegistry,
    ) -> HeapResult<RecoveredPool> {
        // Step 1: magic
        if map.len() < MIN_POOL_SIZE {
            return Err(HeapError::corrupt(
                path,
                format!("file length {} below minimum pool size", map.len()),
            ));
        }
        if map.range(0, POOL_MAGIC.len() as u64) != &POOL_MAGIC[..] {
            return Err(HeapError::corrupt(path, "not a pool file (invalid magic)"));
        }
        let log_end = PoolHeader::log_end(map.range(0, ENCODED_HEADER_LEN as u64), map.len())
            .map_err(|reason| HeapError::corrupt(path, reason))?;

        // Step 2: undo log
        let mut log = UndoLog::load(map.bytes(), log_end)?;

        // Steps 3-4: resolve any interrupted transaction
        let mut replay_stats = ReplayStats::default();
        let rolled_back = log.state() == LogState::Active;
        match log.state() {
            LogState::Active => {
                let records = log.records(map.bytes())?;
                replay_stats = UndoReplayer::replay(&records, map)
                    .map_err(|e| HeapError::fatal_io("undo replay barrier failed", e))?;
                metrics.add_undo_replayed(replay_stats.records_replayed);

                maybe_crash(points::RECOVERY_AFTER_REPLAY);

                log.clear(map)
                    .map_err(|e| HeapError::fatal_io("failed to clear undo log", e))?;
                log_event_with_fields(
                    Event::UndoReplayComplete,
                    &[
                        ("records", &replay_stats.records_replayed.to_string()),
                        ("tx_id", &log.tx_id().to_string()),
                    ],
                );
            }
            LogState::Committed => {
                log.clear(map)
                    .map_err(|e| HeapError::fatal_io("failed to clear undo log", e))?;
            }
            LogState::Idle => {}
        }

        // Step 5: header
        let header = PoolHeader::decode(map.range(0, ENCODED_HEADER_LEN as u64), map.len())
            .map_err(|reason| HeapError::corrupt(path, reason))?;

        // Steps 6-7: directory
        let mut scanner = BlockScanner::new(map.bytes(), header.heap_start, header.heap_end);
        let directory = DirectoryVerifier::rebuild(&mut scanner, header.heap_start, header.heap_end)?;
        let stats = DirectoryVerifier::verify(&directory)?;
        log_event_with_fields(
            Event::DirectoryRebuildComplete,
            &[
                ("blocks", &stats.blocks.to_string()),
                ("live_objects", &stats.live_objects.to_string()),
            ],
        );

        // Step 8: root
        if header.root_offset != 0 {
            match directory.live_at(header.root_offset) {
                Some(entry) if entry.length == header.root_size => {}
                _ => {
                    return Err(HeapError::corrupt_at_offset(
                        header.root_offset,
                        "root does not name a live object",
                    ))
                }
            }
        }

        Ok(RecoveredPool {
            header,
            directory,
            log,
            replay_stats,
            stats,
            rolled_back,
        })
    }
}
