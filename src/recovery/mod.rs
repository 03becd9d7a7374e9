//! Recovery subsystem
//!
//! Runs on every open before a heap handle is returned. Recovery is
//! undo-only: an interrupted transaction is rolled back by replaying its
//! pre-images last record first, then the directory is rebuilt from the
//! block headers and verified.
//!
//! # Invariants
//!
//! - Replay is strictly LIFO
//! - Replay is idempotent
//! - Corruption is surfaced, never repaired

mod replay;
mod startup;

pub use replay::{ReplayStats, RestoreTarget, UndoReplayer};
pub use startup::{RecoveredPool, RecoveryManager};
