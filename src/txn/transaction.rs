//! Transactions over a persistent heap
//!
//! # Commit protocol (strict order)
//!
//! 1. Apply deferred frees (header changes are undo-logged)
//! 2. Durability barrier over every range the transaction touched
//! 3. Flip the log state word to Committed (the commit point)
//! 4. Clear the log
//!
//! A failure in steps 1-3 rolls the transaction back before returning;
//! the caller sees Aborted, never an in-doubt transaction. A failed
//! rollback poisons the heap.

use std::fmt;
use std::io;
use std::marker::PhantomData;

use crate::crash_point::{maybe_crash, maybe_fail, points};
use crate::directory::BLOCK_HEADER_SIZE;
use crate::heap::allocator::{FirstFit, LoggedWrite};
use crate::heap::{HeapState, HeapShared, PersistentHeap, PersistentObject};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::pool::errors::{HeapError, HeapResult};
use crate::pool::PoolMapping;

use super::params::TxParams;
use super::undo_log::UndoLog;

/// Transaction lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl TxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::Active => "active",
            TxState::Committing => "committing",
            TxState::Committed => "committed",
            TxState::Aborting => "aborting",
            TxState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ranges a transaction has captured, created, written and freed.
#[derive(Debug, Default)]
pub(crate) struct TxContext {
    /// Ranges whose pre-image is already in the log.
    logged: Vec<(u64, u64)>,
    /// Payloads allocated by this transaction; nothing to restore there.
    fresh: Vec<(u64, u64)>,
    /// Everything written, for the commit barrier.
    touched: Vec<(u64, u64)>,
    /// Block offsets released at commit.
    deferred_frees: Vec<u64>,
}

impl TxContext {
    /// Sub-ranges of `[start, end)` with no pre-image in the log yet.
    fn uncovered(&self, start: u64, end: u64) -> Vec<(u64, u64)> {
        let mut covering: Vec<(u64, u64)> = self
            .logged
            .iter()
            .chain(self.fresh.iter())
            .filter(|(s, e)| *s < end && start < *e)
            .copied()
            .collect();
        covering.sort_unstable();

        let mut gaps = Vec::new();
        let mut cursor = start;
        for (s, e) in covering {
            if s > cursor {
                gaps.push((cursor, s));
            }
            cursor = cursor.max(e);
            if cursor >= end {
                break;
            }
        }
        if cursor < end {
            gaps.push((cursor, end));
        }
        gaps
    }

    fn is_freed(&self, payload: u64) -> bool {
        self.deferred_frees
            .iter()
            .any(|block| block + BLOCK_HEADER_SIZE == payload)
    }
}

/// `LoggedWrite` that stages undo records in the pool's log.
struct TxWriter<'a> {
    map: &'a mut PoolMapping,
    log: &'a mut UndoLog,
    ctx: &'a mut TxContext,
    metrics: &'a MetricsRegistry,
}

impl TxWriter<'_> {
    /// Zero a payload this transaction just allocated.
    fn zero_fresh(&mut self, offset: u64, len: u64) {
        self.map.fill(offset, len, 0);
        self.ctx.fresh.push((offset, offset + len));
        self.ctx.touched.push((offset, len));
    }
}

impl LoggedWrite for TxWriter<'_> {
    fn write(&mut self, offset: u64, bytes: &[u8]) -> HeapResult<()> {
        let len = bytes.len() as u64;
        let end = offset + len;
        for (gap_start, gap_end) in self.ctx.uncovered(offset, end) {
            self.log.append(self.map, gap_start, gap_end - gap_start)?;
            self.metrics.increment_undo_records();
            self.ctx.logged.push((gap_start, gap_end));
        }
        self.map.write_at(offset, bytes);
        self.ctx.touched.push((offset, len));
        Ok(())
    }
}

/// An atomic group of mutations against one heap.
///
/// Owned by the thread that began it. Dropping an Active transaction
/// aborts it.
pub struct Transaction<'h> {
    heap: &'h PersistentHeap,
    id: u64,
    params: TxParams,
    state: TxState,
    ctx: TxContext,
    _not_send: PhantomData<*const ()>,
}

impl<'h> Transaction<'h> {
    pub(crate) fn begin(heap: &'h PersistentHeap, params: TxParams) -> HeapResult<Self> {
        heap.ensure_open()?;
        let shared = heap.shared();
        shared.acquire_gate()?;

        let id = match Self::open_log(shared) {
            Ok(id) => id,
            Err(err) => {
                shared.release_gate();
                return Err(err);
            }
        };
        shared.metrics.increment_tx_begun();

        Ok(Self {
            heap,
            id,
            params,
            state: TxState::Active,
            ctx: TxContext::default(),
            _not_send: PhantomData,
        })
    }

    fn open_log(shared: &HeapShared) -> HeapResult<u64> {
        let mut guard = shared.state.write();
        guard.check_usable()?;
        let st = &mut *guard;
        let map = st.map.as_mut().ok_or_else(HeapError::pool_closed)?;
        let id = st.next_tx_id;
        st.log.begin(map, id)?;
        st.next_tx_id += 1;
        Ok(id)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn params(&self) -> TxParams {
        self.params
    }

    fn ensure_active(&self) -> HeapResult<()> {
        if self.state != TxState::Active {
            return Err(HeapError::tx_state(format!(
                "transaction {} is {}",
                self.id, self.state
            )));
        }
        Ok(())
    }

    fn ensure_mutable(&self) -> HeapResult<()> {
        self.ensure_active()?;
        if self.params.is_read_only() {
            return Err(HeapError::tx_state(format!(
                "transaction {} is read-only",
                self.id
            )));
        }
        Ok(())
    }

    fn ensure_not_freed(&self, object: &PersistentObject) -> HeapResult<()> {
        if self.ctx.is_freed(object.offset()) {
            return Err(HeapError::unknown_handle(object.offset()));
        }
        Ok(())
    }

    /// Read `len` bytes at `offset` inside `object`.
    pub fn read(&self, object: &PersistentObject, offset: u64, len: u64) -> HeapResult<Vec<u8>> {
        self.ensure_active()?;
        self.ensure_not_freed(object)?;
        self.heap.read(object, offset, len)
    }

    pub fn read_u64(&self, object: &PersistentObject, offset: u64) -> HeapResult<u64> {
        let bytes = self.read(object, offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_u32(&self, object: &PersistentObject, offset: u64) -> HeapResult<u32> {
        let bytes = self.read(object, offset, 4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes);
        Ok(u32::from_le_bytes(raw))
    }

    /// Write `bytes` at `offset` inside `object`, capturing the pre-image first.
    pub fn write(&mut self, object: &PersistentObject, offset: u64, bytes: &[u8]) -> HeapResult<()> {
        self.ensure_mutable()?;
        self.ensure_not_freed(object)?;
        let shared = self.heap.shared();
        let len = bytes.len() as u64;
        shared.note_write(object.offset().saturating_add(offset), len);

        let mut guard = shared.state.write();
        guard.check_usable()?;
        let target = guard.resolve_range(shared.pool_id, object, offset, len)?;
        let HeapState { map, log, .. } = &mut *guard;
        let map = map.as_mut().ok_or_else(HeapError::pool_closed)?;
        TxWriter {
            map,
            log,
            ctx: &mut self.ctx,
            metrics: &shared.metrics,
        }
        .write(target, bytes)
    }

    pub fn write_u64(&mut self, object: &PersistentObject, offset: u64, value: u64) -> HeapResult<()> {
        self.write(object, offset, &value.to_le_bytes())
    }

    pub fn write_u32(&mut self, object: &PersistentObject, offset: u64, value: u32) -> HeapResult<()> {
        self.write(object, offset, &value.to_le_bytes())
    }

    /// Store a reference to `target` in the 8 bytes at `offset`; `None` stores 0.
    pub fn write_reference(
        &mut self,
        object: &PersistentObject,
        offset: u64,
        target: Option<&PersistentObject>,
    ) -> HeapResult<()> {
        self.ensure_mutable()?;
        let value = match target {
            Some(target) => {
                self.ensure_not_freed(target)?;
                let shared = self.heap.shared();
                let st = shared.state.read();
                st.check_usable()?;
                st.reference_value(shared.pool_id, Some(target))?
            }
            None => 0,
        };
        self.write_u64(object, offset, value)
    }

    /// Follow the reference stored at `offset`.
    pub fn read_reference(
        &self,
        object: &PersistentObject,
        offset: u64,
    ) -> HeapResult<Option<PersistentObject>> {
        match self.read_u64(object, offset)? {
            0 => Ok(None),
            target => self.object_at(target).map(Some),
        }
    }

    /// Handle for the live object at `offset`, excluding objects this
    /// transaction has freed.
    pub fn object_at(&self, offset: u64) -> HeapResult<PersistentObject> {
        self.ensure_active()?;
        if self.ctx.is_freed(offset) {
            return Err(HeapError::unknown_handle(offset));
        }
        self.heap.object_at(offset)
    }

    /// Copy `len` bytes from `src` to `dst`; only the destination is logged.
    pub fn copy(
        &mut self,
        src: &PersistentObject,
        src_offset: u64,
        dst: &PersistentObject,
        dst_offset: u64,
        len: u64,
    ) -> HeapResult<()> {
        let bytes = self.read(src, src_offset, len)?;
        self.write(dst, dst_offset, &bytes)
    }

    /// Allocate a zero-filled object of `size` bytes.
    pub fn allocate(&mut self, size: u64, type_tag: u64) -> HeapResult<PersistentObject> {
        self.ensure_mutable()?;
        let shared = self.heap.shared();

        let mut guard = shared.state.write();
        guard.check_usable()?;
        let HeapState {
            map,
            log,
            directory,
            ..
        } = &mut *guard;
        let map = map.as_mut().ok_or_else(HeapError::pool_closed)?;
        let mut writer = TxWriter {
            map,
            log,
            ctx: &mut self.ctx,
            metrics: &shared.metrics,
        };
        let entry = FirstFit::allocate(directory, &mut writer, size, type_tag)?;
        writer.zero_fresh(entry.payload(), entry.capacity);

        shared.metrics.record_allocation(size);
        Ok(PersistentObject::new(
            shared.pool_id,
            entry.payload(),
            size,
            type_tag,
        ))
    }

    /// Free `object` when the transaction commits.
    ///
    /// The object is unusable inside this transaction from now on. Freeing
    /// the root object also clears the root.
    pub fn free(&mut self, object: &PersistentObject) -> HeapResult<()> {
        self.ensure_mutable()?;
        self.ensure_not_freed(object)?;
        let shared = self.heap.shared();

        let mut guard = shared.state.write();
        guard.check_usable()?;
        let entry = guard.resolve_object(shared.pool_id, object)?;

        if guard.header.root_offset == object.offset() {
            let mut header = guard.header;
            header.root_offset = 0;
            header.root_size = 0;
            let HeapState { map, log, .. } = &mut *guard;
            let map = map.as_mut().ok_or_else(HeapError::pool_closed)?;
            TxWriter {
                map,
                log,
                ctx: &mut self.ctx,
                metrics: &shared.metrics,
            }
            .write(0, &header.encode())?;
            guard.header = header;
        }

        self.ctx.deferred_frees.push(entry.block);
        Ok(())
    }

    /// Name `object` as the pool's root, or clear the root with `None`.
    pub fn set_root(&mut self, object: Option<&PersistentObject>) -> HeapResult<()> {
        self.ensure_mutable()?;
        let shared = self.heap.shared();

        let mut guard = shared.state.write();
        guard.check_usable()?;
        let mut header = guard.header;
        match object {
            Some(object) => {
                self.ensure_not_freed(object)?;
                guard.resolve_object(shared.pool_id, object)?;
                header.root_offset = object.offset();
                header.root_size = object.size();
            }
            None => {
                header.root_offset = 0;
                header.root_size = 0;
            }
        }

        let HeapState { map, log, .. } = &mut *guard;
        let map = map.as_mut().ok_or_else(HeapError::pool_closed)?;
        TxWriter {
            map,
            log,
            ctx: &mut self.ctx,
            metrics: &shared.metrics,
        }
        .write(0, &header.encode())?;
        guard.header = header;
        Ok(())
    }

    /// Make every mutation durable and discard the undo log.
    pub fn commit(mut self) -> HeapResult<()> {
        self.ensure_active()?;
        self.state = TxState::Committing;
        let shared = self.heap.shared();
        let result = {
            let mut guard = shared.state.write();
            self.run_commit(&mut guard, shared)
        };
        shared.release_gate();
        result
    }

    fn run_commit(&mut self, st: &mut HeapState, shared: &HeapShared) -> HeapResult<()> {
        if let Err(err) = st.check_usable() {
            self.state = TxState::Aborted;
            return Err(err);
        }

        // Step 1: deferred frees
        let freed = match self.apply_deferred_frees(st, &shared.metrics) {
            Ok(freed) => freed,
            Err(err) => {
                self.roll_back_locked(st, shared)?;
                return Err(err);
            }
        };

        // Steps 2-3: barrier, then the commit point
        if let Err(e) = self.reach_commit_point(st) {
            self.roll_back_locked(st, shared)?;
            shared.metrics.increment_commit_failures();
            log_event_with_fields(
                Event::TxCommitFailed,
                &[("error", &e.to_string()), ("tx_id", &self.id.to_string())],
            );
            return Err(HeapError::commit_failed(e));
        }

        maybe_crash(points::TX_AFTER_COMMIT_FLAG);

        // Step 4: discard the log
        self.state = TxState::Committed;
        shared.metrics.increment_tx_committed();
        for _ in 0..freed {
            shared.metrics.increment_frees();
        }
        let HeapState { map, log, .. } = &mut *st;
        if let Some(map) = map.as_mut() {
            if let Err(e) = log.clear(map) {
                // Committed on media; the next open clears the log.
                st.poisoned = true;
                log_event_with_fields(
                    Event::TxFatalIo,
                    &[("error", &e.to_string()), ("tx_id", &self.id.to_string())],
                );
            }
        }
        Ok(())
    }

    fn apply_deferred_frees(&mut self, st: &mut HeapState, metrics: &MetricsRegistry) -> HeapResult<u64> {
        let frees = std::mem::take(&mut self.ctx.deferred_frees);
        let HeapState {
            map,
            log,
            directory,
            ..
        } = st;
        let map = map.as_mut().ok_or_else(HeapError::pool_closed)?;
        let mut writer = TxWriter {
            map,
            log,
            ctx: &mut self.ctx,
            metrics,
        };
        for block in &frees {
            FirstFit::release(directory, &mut writer, *block)?;
        }
        Ok(frees.len() as u64)
    }

    fn reach_commit_point(&self, st: &mut HeapState) -> io::Result<()> {
        let HeapState { map, log, .. } = st;
        let map = map
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "pool mapping released"))?;

        maybe_fail(points::TX_COMMIT_BARRIER)?;
        for (offset, len) in &self.ctx.touched {
            map.persist(*offset, *len)?;
        }

        maybe_crash(points::TX_BEFORE_COMMIT_FLAG);
        log.mark_committed(map)
    }

    /// Roll back while holding the state lock. On failure the heap is
    /// poisoned and a fatal error returned.
    fn roll_back_locked(&mut self, st: &mut HeapState, shared: &HeapShared) -> HeapResult<()> {
        self.state = TxState::Aborting;
        let result = st.roll_back(&shared.metrics);
        self.state = TxState::Aborted;
        self.ctx = TxContext::default();
        shared.metrics.increment_tx_aborted();

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                st.poisoned = true;
                log_event_with_fields(
                    Event::TxFatalIo,
                    &[("error", &err.to_string()), ("tx_id", &self.id.to_string())],
                );
                Err(err)
            }
        }
    }

    /// Restore every touched range to its pre-transaction bytes.
    pub fn abort(mut self) -> HeapResult<()> {
        self.ensure_active()?;
        self.abort_in_place()
    }

    fn abort_in_place(&mut self) -> HeapResult<()> {
        let shared = self.heap.shared();
        let result = {
            let mut guard = shared.state.write();
            self.roll_back_locked(&mut guard, shared)
        };
        shared.release_gate();
        result
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            let _ = self.abort_in_place();
        }
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncovered_skips_logged_and_fresh_ranges() {
        let ctx = TxContext {
            logged: vec![(100, 200), (300, 350)],
            fresh: vec![(180, 260)],
            ..TxContext::default()
        };
        let none: Vec<(u64, u64)> = Vec::new();
        assert_eq!(ctx.uncovered(120, 190), none);
        assert_eq!(ctx.uncovered(50, 400), vec![(50, 100), (260, 300), (350, 400)]);
        assert_eq!(ctx.uncovered(400, 420), vec![(400, 420)]);
        assert_eq!(ctx.uncovered(150, 150), none);
    }
}
