//! Per-heap operational counters
//!
//! Counters only, monotonic, reset when the pool is opened. Relaxed
//! atomics: the values are exact once the heap is quiescent.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one open heap.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    allocations: AtomicU64,
    frees: AtomicU64,
    bytes_allocated: AtomicU64,
    tx_begun: AtomicU64,
    tx_committed: AtomicU64,
    tx_aborted: AtomicU64,
    commit_failures: AtomicU64,
    undo_records_written: AtomicU64,
    undo_records_replayed: AtomicU64,
    recoveries: AtomicU64,
}

impl MetricsRegistry {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful allocation of `bytes` payload bytes
    pub fn record_allocation(&self, bytes: u64) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a free
    pub fn increment_frees(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_tx_begun(&self) {
        self.tx_begun.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_tx_committed(&self) {
        self.tx_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_tx_aborted(&self) {
        self.tx_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commit_failures(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_undo_records(&self) {
        self.undo_records_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_undo_replayed(&self, records: u64) {
        self.undo_records_replayed.fetch_add(records, Ordering::Relaxed);
    }

    pub fn increment_recoveries(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations: self.allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            bytes_allocated: self.bytes_allocated.load(Ordering::Relaxed),
            tx_begun: self.tx_begun.load(Ordering::Relaxed),
            tx_committed: self.tx_committed.load(Ordering::Relaxed),
            tx_aborted: self.tx_aborted.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            undo_records_written: self.undo_records_written.load(Ordering::Relaxed),
            undo_records_replayed: self.undo_records_replayed.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
        }
    }

    /// Snapshot rendered as a single JSON object
    pub fn to_json(&self) -> String {
        // A struct of plain integers cannot fail to serialize.
        serde_json::to_string(&self.snapshot()).unwrap_or_default()
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub allocations: u64,
    pub frees: u64,
    pub bytes_allocated: u64,
    pub tx_begun: u64,
    pub tx_committed: u64,
    pub tx_aborted: u64,
    pub commit_failures: u64,
    pub undo_records_written: u64,
    pub undo_records_replayed: u64,
    pub recoveries: u64,
}
