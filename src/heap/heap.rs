//! Persistent heap handle
//!
//! Standalone mutations on a Transactional heap each run in an implicit
//! transaction. On a Durable heap a standalone `write` or `copy` is applied
//! in place and followed by a durability barrier; it is not atomic and may
//! be torn by a crash. Allocation, free and root updates are always
//! transactional.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::directory::{AllocationDirectory, DirectoryVerifier, HeapStats};
use crate::observability::{log_event_with_fields, Event, MetricsSnapshot};
use crate::pool::errors::{HeapError, HeapResult};
use crate::pool::HeapKind;
use crate::txn::{Transaction, TxParams};

use super::object::PersistentObject;
use super::shared::HeapShared;

/// Handle to an open durable pool.
///
/// Handles opened for the same path by one `PoolStore` share the mapping.
/// Each handle closes independently; the mapping is released when the last
/// one closes.
pub struct PersistentHeap {
    shared: Arc<HeapShared>,
    closed: AtomicBool,
}

impl PersistentHeap {
    pub(crate) fn from_shared(shared: Arc<HeapShared>) -> Self {
        shared.open_handles.fetch_add(1, Ordering::SeqCst);
        Self {
            shared,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn shared(&self) -> &HeapShared {
        &self.shared
    }

    pub(crate) fn ensure_open(&self) -> HeapResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HeapError::pool_closed());
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn pool_id(&self) -> Uuid {
        self.shared.pool_id
    }

    pub fn kind(&self) -> HeapKind {
        self.shared.kind
    }

    /// Total pool size in bytes.
    pub fn size(&self) -> u64 {
        self.shared.pool_size
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Begin an explicit transaction. Blocks while another thread has one
    /// active on this heap.
    pub fn begin(&self, params: TxParams) -> HeapResult<Transaction<'_>> {
        Transaction::begin(self, params)
    }

    /// Run `body` in a transaction: commit on `Ok`, abort on `Err`.
    pub fn transaction<T, E, F>(&self, params: TxParams, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<HeapError>,
    {
        let mut tx = self.begin(params)?;
        match body(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.abort()?;
                Err(err)
            }
        }
    }

    /// Allocate a zero-filled object.
    pub fn allocate(&self, size: u64, type_tag: u64) -> HeapResult<PersistentObject> {
        self.transaction(TxParams::NONE, |tx| tx.allocate(size, type_tag))
    }

    /// Allocate and run `init` on the new object in the same transaction.
    pub fn allocate_with<F>(&self, size: u64, type_tag: u64, init: F) -> HeapResult<PersistentObject>
    where
        F: FnOnce(&mut Transaction<'_>, &PersistentObject) -> HeapResult<()>,
    {
        self.transaction(TxParams::NONE, |tx| {
            let object = tx.allocate(size, type_tag)?;
            init(tx, &object)?;
            Ok(object)
        })
    }

    /// Free an object. A second free of the same handle fails with
    /// `PMHEAP_UNKNOWN_HANDLE` and changes nothing.
    pub fn free(&self, object: &PersistentObject) -> HeapResult<()> {
        self.transaction(TxParams::NONE, |tx| tx.free(object))
    }

    pub fn read(&self, object: &PersistentObject, offset: u64, len: u64) -> HeapResult<Vec<u8>> {
        self.ensure_open()?;
        let gate = self
            .shared
            .wait_readable(object.offset().saturating_add(offset), len);
        let st = self.shared.state.read();
        drop(gate);

        st.check_usable()?;
        let target = st.resolve_range(self.shared.pool_id, object, offset, len)?;
        Ok(st.mapping()?.range(target, len).to_vec())
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

    pub fn write(&self, object: &PersistentObject, offset: u64, bytes: &[u8]) -> HeapResult<()> {
        match self.shared.kind {
            HeapKind::Transactional => {
                self.transaction(TxParams::NONE, |tx| tx.write(object, offset, bytes))
            }
            HeapKind::Durable => self.write_in_place(object, offset, bytes),
        }
    }

    pub fn write_u64(&self, object: &PersistentObject, offset: u64, value: u64) -> HeapResult<()> {
        self.write(object, offset, &value.to_le_bytes())
    }

    pub fn write_u32(&self, object: &PersistentObject, offset: u64, value: u32) -> HeapResult<()> {
        self.write(object, offset, &value.to_le_bytes())
    }

    /// Store a reference to `target` in the 8 bytes at `offset`.
    ///
    /// References hold the target's payload offset, so they stay valid
    /// across reopen. `None` stores 0.
    pub fn write_reference(
        &self,
        object: &PersistentObject,
        offset: u64,
        target: Option<&PersistentObject>,
    ) -> HeapResult<()> {
        match self.shared.kind {
            HeapKind::Transactional => self.transaction(TxParams::NONE, |tx| {
                tx.write_reference(object, offset, target)
            }),
            HeapKind::Durable => {
                self.ensure_open()?;
                let value = {
                    let st = self.shared.state.read();
                    st.check_usable()?;
                    st.reference_value(self.shared.pool_id, target)?
                };
                self.write_in_place(object, offset, &value.to_le_bytes())
            }
        }
    }

    /// Follow the reference stored at `offset`.
    ///
    /// A stored offset that names no live object yields `UnknownHandle`.
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

    /// Handle for the live object whose payload starts at `offset`.
    pub fn object_at(&self, offset: u64) -> HeapResult<PersistentObject> {
        self.ensure_open()?;
        let st = self.shared.state.read();
        st.check_usable()?;
        st.object_at(self.shared.pool_id, offset)
    }

    /// Copy `len` bytes from `src` to `dst`.
    pub fn copy(
        &self,
        src: &PersistentObject,
        src_offset: u64,
        dst: &PersistentObject,
        dst_offset: u64,
        len: u64,
    ) -> HeapResult<()> {
        match self.shared.kind {
            HeapKind::Transactional => self.transaction(TxParams::NONE, |tx| {
                tx.copy(src, src_offset, dst, dst_offset, len)
            }),
            HeapKind::Durable => {
                let bytes = self.read(src, src_offset, len)?;
                self.write_in_place(dst, dst_offset, &bytes)
            }
        }
    }

    fn write_in_place(&self, object: &PersistentObject, offset: u64, bytes: &[u8]) -> HeapResult<()> {
        self.ensure_open()?;
        let shared = &self.shared;
        shared.acquire_gate()?;

        let len = bytes.len() as u64;
        shared.note_write(object.offset().saturating_add(offset), len);
        let result = (|| -> HeapResult<()> {
            let mut st = shared.state.write();
            st.check_usable()?;
            let target = st.resolve_range(shared.pool_id, object, offset, len)?;
            let map = st.map.as_mut().ok_or_else(HeapError::pool_closed)?;
            map.write_at(target, bytes);
            map.persist(target, len)
                .map_err(|e| HeapError::device("durability barrier failed", e))
        })();

        shared.release_gate();
        result
    }

    /// Durability barrier over `[offset, offset + len)` of `object`.
    pub fn flush(&self, object: &PersistentObject, offset: u64, len: u64) -> HeapResult<()> {
        self.ensure_open()?;
        let st = self.shared.state.read();
        st.check_usable()?;
        let target = st.resolve_range(self.shared.pool_id, object, offset, len)?;
        st.mapping()?
            .persist(target, len)
            .map_err(|e| HeapError::device("durability barrier failed", e))
    }

    /// Name `object` as the root, or clear it with `None`.
    pub fn set_root(&self, object: Option<&PersistentObject>) -> HeapResult<()> {
        self.transaction(TxParams::NONE, |tx| tx.set_root(object))
    }

    /// The root object, if one is set.
    pub fn root(&self) -> HeapResult<Option<PersistentObject>> {
        self.ensure_open()?;
        let st = self.shared.state.read();
        st.check_usable()?;
        if st.header.root_offset == 0 {
            return Ok(None);
        }
        st.object_at(self.shared.pool_id, st.header.root_offset)
            .map(Some)
            .map_err(|_| HeapError::corrupt_at_offset(st.header.root_offset, "root is not live"))
    }

    /// Rescan block headers, compare them with the in-memory directory and
    /// verify bounds, overlap and tiling.
    pub fn check(&self) -> HeapResult<HeapStats> {
        self.ensure_open()?;
        let st = self.shared.state.read();
        st.check_usable()?;
        let scanned = st.scan_directory()?;
        if scanned != st.directory {
            return Err(HeapError::corrupt(
                &self.shared.path,
                "allocation directory does not match block headers",
            ));
        }
        DirectoryVerifier::verify(&scanned)
    }

    /// Handles for every live object, in address order.
    pub fn live_objects(&self) -> HeapResult<Vec<PersistentObject>> {
        self.ensure_open()?;
        let st = self.shared.state.read();
        st.check_usable()?;
        Ok(st
            .directory
            .live_entries()
            .map(|e| PersistentObject::new(self.shared.pool_id, e.payload(), e.length, e.type_tag))
            .collect())
    }

    /// Copy of the current allocation directory.
    pub fn directory(&self) -> HeapResult<AllocationDirectory> {
        self.ensure_open()?;
        let st = self.shared.state.read();
        st.check_usable()?;
        Ok(st.directory.clone())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Flush and close this handle. Idempotent.
    ///
    /// Fails with `PMHEAP_POOL_IN_USE` while a transaction is active.
    pub fn close(&self) -> HeapResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.shared.gate_busy() {
            return Err(HeapError::pool_in_use(
                &self.shared.path,
                "a transaction is active on this pool",
            ));
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let last = self.shared.open_handles.fetch_sub(1, Ordering::SeqCst) == 1;
        if last {
            self.shared.release_mapping(true)?;
        }
        log_event_with_fields(
            Event::PoolClose,
            &[
                ("last_handle", &last.to_string()),
                ("path", &self.shared.path.display().to_string()),
            ],
        );
        Ok(())
    }
}

impl Drop for PersistentHeap {
    fn drop(&mut self) {
        // Never touches the undo log: an abandoned transaction is rolled
        // back by recovery on the next open.
        if !self.closed.swap(true, Ordering::SeqCst)
            && self.shared.open_handles.fetch_sub(1, Ordering::SeqCst) == 1
        {
            let _ = self.shared.release_mapping(false);
        }
    }
}

impl std::fmt::Debug for PersistentHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentHeap")
            .field("path", &self.shared.path)
            .field("pool_id", &self.shared.pool_id)
            .field("kind", &self.shared.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}
