//! Observable lifecycle events
//!
//! Only lifecycle transitions are events. Allocation, reads and writes are
//! hot paths and are counted in `MetricsRegistry` instead.

use std::fmt;

/// Observable events in the heap engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Pool lifecycle
    /// Pool file created and initialized
    PoolCreate,
    /// Pool opened and usable
    PoolOpen,
    /// Pool closed, mapping released
    PoolClose,
    /// Pool file removed
    PoolRemove,

    // Recovery
    /// Recovery scan started
    RecoveryBegin,
    /// Staged undo log replayed
    UndoReplayComplete,
    /// Allocation directory rebuilt from the heap region
    DirectoryRebuildComplete,
    /// Recovery finished, pool consistent
    RecoveryComplete,
    /// Recovery failed (FATAL)
    RecoveryFailed,

    // Transactions
    /// Durability barrier failed during commit; transaction rolled back
    TxCommitFailed,
    /// Device failure while rolling back (FATAL)
    TxFatalIo,

    // Volatile arenas
    /// Arena mapped
    ArenaCreate,
    /// Arena reclaimed as a unit
    ArenaReset,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::PoolCreate => "POOL_CREATE",
            Event::PoolOpen => "POOL_OPEN",
            Event::PoolClose => "POOL_CLOSE",
            Event::PoolRemove => "POOL_REMOVE",

            Event::RecoveryBegin => "RECOVERY_BEGIN",
            Event::UndoReplayComplete => "UNDO_REPLAY_COMPLETE",
            Event::DirectoryRebuildComplete => "DIRECTORY_REBUILD_COMPLETE",
            Event::RecoveryComplete => "RECOVERY_COMPLETE",
            Event::RecoveryFailed => "RECOVERY_FAILED",

            Event::TxCommitFailed => "TX_COMMIT_FAILED",
            Event::TxFatalIo => "TX_FATAL_IO",

            Event::ArenaCreate => "ARENA_CREATE",
            Event::ArenaReset => "ARENA_RESET",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::RecoveryFailed | Event::TxFatalIo)
    }

    /// Returns true if this event reports a failure
    pub fn is_failure(&self) -> bool {
        self.is_fatal() || matches!(self, Event::TxCommitFailed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
