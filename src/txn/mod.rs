//! TransactionManager subsystem
//!
//! State machine: `Active -> {Committing -> Committed | Aborting -> Aborted}`.
//! Mutations are accepted only while Active. Every mutation appends an
//! undo record before live bytes change; commit discards the log after a
//! durability barrier, abort replays it in reverse.
//!
//! # Invariants
//!
//! - At most one Active transaction per heap
//! - Undo records are persisted before the bytes they protect change
//! - The state word flip to Committed is the single commit point

mod params;
mod transaction;
mod undo_log;

pub use params::TxParams;
pub use transaction::{Transaction, TxState};
pub use undo_log::{LogState, UndoLog, UndoRecord, LOG_HEADER_SIZE, LOG_MAGIC};
