//! State shared by every handle to one open pool
//!
//! # Locking
//!
//! - `gate` serializes transactions: at most one thread owns it, and it
//!   records the byte ranges the owner has written so far
//! - `state` guards the mapping, header, directory and undo log
//!
//! Lock order is always gate before state. A reader whose range overlaps
//! the owner's write set waits on `gate_cv` until the owner finishes;
//! other readers proceed under the shared state lock.

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::thread::{self, ThreadId};
use uuid::Uuid;

use crate::directory::{AllocationDirectory, BlockScanner, DirectoryEntry, DirectoryVerifier};
use crate::observability::MetricsRegistry;
use crate::pool::errors::{HeapError, HeapResult};
use crate::pool::header::{PoolHeader, ENCODED_HEADER_LEN};
use crate::pool::{HeapKind, PoolMapping};
use crate::recovery::{RecoveredPool, UndoReplayer};
use crate::txn::UndoLog;

use super::object::PersistentObject;

/// Owner and write set of the active transaction, if any.
#[derive(Debug, Default)]
pub(crate) struct TxGate {
    owner: Option<ThreadId>,
    write_set: Vec<(u64, u64)>,
}

impl TxGate {
    fn blocks_read(&self, me: ThreadId, start: u64, end: u64) -> bool {
        match self.owner {
            Some(owner) if owner != me => self
                .write_set
                .iter()
                .any(|(s, e)| *s < end && start < *e),
            _ => false,
        }
    }
}

pub(crate) struct HeapState {
    /// `None` once the last handle closed.
    pub(crate) map: Option<PoolMapping>,
    pub(crate) header: PoolHeader,
    pub(crate) directory: AllocationDirectory,
    pub(crate) log: UndoLog,
    /// Set after a failed rollback; cleared only by reopening.
    pub(crate) poisoned: bool,
    pub(crate) next_tx_id: u64,
}

impl HeapState {
    pub(crate) fn check_usable(&self) -> HeapResult<()> {
        if self.poisoned {
            return Err(HeapError::poisoned());
        }
        if self.map.is_none() {
            return Err(HeapError::pool_closed());
        }
        Ok(())
    }

    pub(crate) fn mapping(&self) -> HeapResult<&PoolMapping> {
        self.map.as_ref().ok_or_else(HeapError::pool_closed)
    }

    /// Directory entry behind a handle, if the handle is live.
    pub(crate) fn resolve_object(
        &self,
        pool_id: Uuid,
        object: &PersistentObject,
    ) -> HeapResult<DirectoryEntry> {
        if object.pool_id() != pool_id {
            return Err(HeapError::unknown_handle(object.offset()));
        }
        match self.directory.live_at(object.offset()) {
            Some(entry) if entry.length == object.size() && entry.type_tag == object.type_tag() => {
                Ok(*entry)
            }
            _ => Err(HeapError::unknown_handle(object.offset())),
        }
    }

    /// Handle for the live object whose payload starts at `offset`.
    pub(crate) fn object_at(&self, pool_id: Uuid, offset: u64) -> HeapResult<PersistentObject> {
        match self.directory.live_at(offset) {
            Some(entry) => Ok(PersistentObject::new(
                pool_id,
                offset,
                entry.length,
                entry.type_tag,
            )),
            None => Err(HeapError::unknown_handle(offset)),
        }
    }

    /// Stored form of a reference; 0 names no object.
    pub(crate) fn reference_value(
        &self,
        pool_id: Uuid,
        target: Option<&PersistentObject>,
    ) -> HeapResult<u64> {
        match target {
            Some(target) => {
                self.resolve_object(pool_id, target)?;
                Ok(target.offset())
            }
            None => Ok(0),
        }
    }

    /// Absolute offset of `[offset, offset + len)` inside a live object.
    pub(crate) fn resolve_range(
        &self,
        pool_id: Uuid,
        object: &PersistentObject,
        offset: u64,
        len: u64,
    ) -> HeapResult<u64> {
        self.resolve_object(pool_id, object)?;
        match offset.checked_add(len) {
            Some(end) if end <= object.size() => Ok(object.offset() + offset),
            _ => Err(HeapError::out_of_bounds(offset, len, object.size())),
        }
    }

    /// Rescan block headers from media.
    pub(crate) fn scan_directory(&self) -> HeapResult<AllocationDirectory> {
        let map = self.mapping()?;
        let mut scanner =
            BlockScanner::new(map.bytes(), self.header.heap_start, self.header.heap_end);
        DirectoryVerifier::rebuild(&mut scanner, self.header.heap_start, self.header.heap_end)
    }

    /// Replay the active undo log, clear it, and re-derive the header and
    /// directory from the restored bytes. Returns the number of records
    /// replayed.
    pub(crate) fn roll_back(&mut self, metrics: &MetricsRegistry) -> HeapResult<u64> {
        let map = self.map.as_mut().ok_or_else(HeapError::pool_closed)?;
        let records = self.log.records(map.bytes())?;
        let stats = UndoReplayer::replay(&records, map)
            .map_err(|e| HeapError::fatal_io("undo replay barrier failed", e))?;
        self.log
            .clear(map)
            .map_err(|e| HeapError::fatal_io("failed to clear undo log", e))?;
        metrics.add_undo_replayed(stats.records_replayed);

        self.header = PoolHeader::decode(map.range(0, ENCODED_HEADER_LEN as u64), map.len())
            .map_err(|reason| {
                HeapError::fatal_io(
                    "pool header invalid after rollback",
                    io::Error::new(io::ErrorKind::InvalidData, reason),
                )
            })?;
        self.directory = self.scan_directory()?;
        Ok(stats.records_replayed)
    }
}

pub(crate) struct HeapShared {
    pub(crate) path: PathBuf,
    pub(crate) pool_id: Uuid,
    pub(crate) kind: HeapKind,
    pub(crate) pool_size: u64,
    pub(crate) state: RwLock<HeapState>,
    pub(crate) metrics: MetricsRegistry,
    /// Handles that have not been closed or dropped.
    pub(crate) open_handles: AtomicUsize,
    gate: Mutex<TxGate>,
    gate_cv: Condvar,
}

impl HeapShared {
    pub(crate) fn new(
        path: PathBuf,
        map: PoolMapping,
        recovered: RecoveredPool,
        metrics: MetricsRegistry,
    ) -> Self {
        let header = recovered.header;
        Self {
            path,
            pool_id: header.pool_id,
            kind: header.kind,
            pool_size: header.pool_size,
            state: RwLock::new(HeapState {
                map: Some(map),
                header,
                directory: recovered.directory,
                next_tx_id: recovered.log.tx_id() + 1,
                log: recovered.log,
                poisoned: false,
            }),
            metrics,
            open_handles: AtomicUsize::new(0),
            gate: Mutex::new(TxGate::default()),
            gate_cv: Condvar::new(),
        }
    }

    /// Become the transaction owner, waiting for any other owner to finish.
    pub(crate) fn acquire_gate(&self) -> HeapResult<()> {
        let me = thread::current().id();
        let mut gate = self.gate.lock();
        if gate.owner == Some(me) {
            return Err(HeapError::tx_active());
        }
        while gate.owner.is_some() {
            self.gate_cv.wait(&mut gate);
        }
        gate.owner = Some(me);
        gate.write_set.clear();
        Ok(())
    }

    pub(crate) fn release_gate(&self) {
        let mut gate = self.gate.lock();
        gate.owner = None;
        gate.write_set.clear();
        drop(gate);
        self.gate_cv.notify_all();
    }

    /// Whether any thread owns a transaction.
    pub(crate) fn gate_busy(&self) -> bool {
        self.gate.lock().owner.is_some()
    }

    /// Record a range the owner is about to write.
    pub(crate) fn note_write(&self, start: u64, len: u64) {
        self.gate
            .lock()
            .write_set
            .push((start, start.saturating_add(len)));
    }

    /// Wait until `[start, start + len)` is not being written by another
    /// thread's transaction. Hold the returned guard until the state read
    /// lock is taken.
    pub(crate) fn wait_readable(&self, start: u64, len: u64) -> MutexGuard<'_, TxGate> {
        let me = thread::current().id();
        let end = start.saturating_add(len);
        let mut gate = self.gate.lock();
        while gate.blocks_read(me, start, end) {
            self.gate_cv.wait(&mut gate);
        }
        gate
    }

    pub(crate) fn is_mapped(&self) -> bool {
        self.state.read().map.is_some()
    }

    /// Flush and unmap. Releases the pool lock.
    pub(crate) fn release_mapping(&self, flush: bool) -> HeapResult<()> {
        let map = self.state.write().map.take();
        if let Some(map) = map {
            if flush {
                map.persist_all()
                    .map_err(|e| HeapError::io("failed to flush pool on close", &self.path, e))?;
            }
        }
        Ok(())
    }
}
