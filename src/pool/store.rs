//! PoolStore: path to open pool
//!
//! # Create sequence
//!
//! 1. Validate size and options (no file is touched on failure)
//! 2. Create the file exclusively, or open it for overwrite
//! 3. Take the exclusive pool lock
//! 4. Size, map and format: header, empty undo log, one free block
//! 5. Persist the whole pool
//!
//! # Open sequence
//!
//! 1. Reuse a live mapping from this store if one exists
//! 2. Otherwise lock, map and run recovery before returning a handle

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

use crate::constants::{HEADER_SIZE, MIN_POOL_SIZE};
use crate::directory::{BlockHeader, BlockScanner, DirectoryVerifier, BLOCK_HEADER_SIZE};
use crate::heap::{HeapShared, PersistentHeap};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::recovery::{RecoveredPool, RecoveryManager};
use crate::txn::{LogState, UndoLog};

use super::config::{HeapKind, PoolOptions};
use super::errors::{HeapError, HeapResult};
use super::header::{PoolHeader, ENCODED_HEADER_LEN};
use super::lock::PoolLock;
use super::mapping::PoolMapping;

/// Creates, opens and removes pools.
///
/// Opening a path this store already has open returns another handle to
/// the same mapping. Two stores in one process do not share mappings; the
/// second open is rejected by the pool lock.
#[derive(Default)]
pub struct PoolStore {
    open_pools: Mutex<HashMap<PathBuf, Weak<HeapShared>>>,
}

impl PoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a Transactional pool with the given access mode.
    pub fn create(&self, path: impl AsRef<Path>, size: u64, mode: u32) -> HeapResult<PersistentHeap> {
        self.create_with(path, size, PoolOptions::default().with_mode(mode))
    }

    pub fn create_with(
        &self,
        path: impl AsRef<Path>,
        size: u64,
        options: PoolOptions,
    ) -> HeapResult<PersistentHeap> {
        let path = path.as_ref();
        if size < MIN_POOL_SIZE {
            return Err(HeapError::size_too_small(size, MIN_POOL_SIZE));
        }
        options.validate().map_err(HeapError::invalid_options)?;
        let heap_start = options
            .heap_start_for(size)
            .map_err(HeapError::invalid_options)?;

        let key = registry_key(path);
        let mut open_pools = self.open_pools.lock();
        if live_entry(&open_pools, &key).is_some() {
            return Err(HeapError::pool_in_use(path, "pool is open"));
        }

        let (file, created) = create_file(path, &options)?;
        let header = PoolHeader::new(options.kind, size, heap_start);
        let metrics = MetricsRegistry::new();
        let (map, recovered) = match initialize_pool(path, file, &header, options.mode, &metrics) {
            Ok(ready) => ready,
            Err(err) => {
                if created {
                    let _ = fs::remove_file(path);
                }
                return Err(err);
            }
        };
        let shared = Arc::new(HeapShared::new(path.to_path_buf(), map, recovered, metrics));
        open_pools.insert(registry_key(path), Arc::downgrade(&shared));

        log_event_with_fields(
            Event::PoolCreate,
            &[
                ("kind", header.kind.as_str()),
                ("mode", &format!("{:o}", options.mode)),
                ("path", &path.display().to_string()),
                ("size", &size.to_string()),
                ("undo_log_bytes", &(heap_start - HEADER_SIZE).to_string()),
            ],
        );
        Ok(PersistentHeap::from_shared(shared))
    }

    /// Open an existing pool of either kind.
    pub fn open(&self, path: impl AsRef<Path>) -> HeapResult<PersistentHeap> {
        self.open_inner(path.as_ref(), None)
    }

    /// Open an existing pool, failing with `PMHEAP_WRONG_KIND` if its
    /// recorded kind differs from `kind`.
    pub fn open_as(&self, path: impl AsRef<Path>, kind: HeapKind) -> HeapResult<PersistentHeap> {
        self.open_inner(path.as_ref(), Some(kind))
    }

    fn open_inner(&self, path: &Path, expected: Option<HeapKind>) -> HeapResult<PersistentHeap> {
        if !path.exists() {
            return Err(HeapError::not_found(path));
        }
        let key = registry_key(path);
        let mut open_pools = self.open_pools.lock();

        if let Some(shared) = live_entry(&open_pools, &key) {
            check_kind(path, expected, shared.kind)?;
            return Ok(PersistentHeap::from_shared(shared));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| open_error(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| HeapError::io("failed to stat pool", path, e))?
            .len();
        if len < MIN_POOL_SIZE {
            return Err(HeapError::corrupt(
                path,
                format!("file length {} below minimum pool size", len),
            ));
        }
        let lock = PoolLock::acquire(file, path)?;
        let mut map = PoolMapping::map(lock, len, path)?;

        let metrics = MetricsRegistry::new();
        let recovered = RecoveryManager::recover(&mut map, path, &metrics)?;
        check_kind(path, expected, recovered.header.kind)?;

        let rolled_back = recovered.rolled_back;
        let live_objects = recovered.stats.live_objects;
        let shared = Arc::new(HeapShared::new(path.to_path_buf(), map, recovered, metrics));
        open_pools.insert(key, Arc::downgrade(&shared));

        log_event_with_fields(
            Event::PoolOpen,
            &[
                ("kind", shared.kind.as_str()),
                ("live_objects", &live_objects.to_string()),
                ("path", &path.display().to_string()),
                ("rolled_back", &rolled_back.to_string()),
            ],
        );
        Ok(PersistentHeap::from_shared(shared))
    }

    /// Close a handle. Same as `PersistentHeap::close`.
    pub fn close(&self, heap: &PersistentHeap) -> HeapResult<()> {
        heap.close()
    }

    /// Whether this store holds a live mapping for `path`.
    pub fn is_open(&self, path: impl AsRef<Path>) -> bool {
        let key = registry_key(path.as_ref());
        live_entry(&self.open_pools.lock(), &key).is_some()
    }

    /// Delete the pool file.
    ///
    /// Without `force`, fails with `PMHEAP_POOL_IN_USE` if the pool is open
    /// in this or another process, a transaction is outstanding, or the
    /// pool fails its consistency checks. With `force` the file is unlinked
    /// unconditionally; open handles keep their (now anonymous) mapping.
    pub fn remove(&self, path: impl AsRef<Path>, force: bool) -> HeapResult<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(HeapError::not_found(path));
        }
        let key = registry_key(path);
        let mut open_pools = self.open_pools.lock();

        if !force {
            if let Some(shared) = live_entry(&open_pools, &key) {
                let reason = if shared.gate_busy() {
                    "a transaction is outstanding"
                } else {
                    "pool is open"
                };
                return Err(HeapError::pool_in_use(path, reason));
            }
            if !PoolLock::is_free(path)? {
                return Err(HeapError::pool_in_use(path, "pool is locked by another owner"));
            }
            check_closed_pool(path)?;
        }

        fs::remove_file(path).map_err(|e| open_error(path, e))?;
        open_pools.remove(&key);

        log_event_with_fields(
            Event::PoolRemove,
            &[
                ("force", &force.to_string()),
                ("path", &path.display().to_string()),
            ],
        );
        Ok(())
    }
}

/// Registry key: the canonical path, or the canonical parent joined with
/// the file name when the file does not exist yet.
fn registry_key(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

fn live_entry(
    open_pools: &HashMap<PathBuf, Weak<HeapShared>>,
    key: &Path,
) -> Option<Arc<HeapShared>> {
    open_pools
        .get(key)
        .and_then(Weak::upgrade)
        .filter(|shared| shared.is_mapped())
}

fn check_kind(path: &Path, expected: Option<HeapKind>, found: HeapKind) -> HeapResult<()> {
    match expected {
        Some(kind) if kind != found => Err(HeapError::wrong_kind(path, kind.as_str(), found.as_str())),
        _ => Ok(()),
    }
}

fn open_error(path: &Path, e: io::Error) -> HeapError {
    if e.kind() == io::ErrorKind::NotFound {
        HeapError::not_found(path)
    } else {
        HeapError::io("failed to open pool", path, e)
    }
}

/// Open the pool file for creation. The flag is true when this call
/// created the file.
fn create_file(path: &Path, options: &PoolOptions) -> HeapResult<(File, bool)> {
    let mut create = OpenOptions::new();
    create.read(true).write(true).create_new(true);
    #[cfg(unix)]
    create.mode(options.mode);

    match create.open(path) {
        Ok(file) => Ok((file, true)),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && options.overwrite => {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|e| open_error(path, e))?;
            Ok((file, false))
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(HeapError::path_exists(path)),
        Err(e) => Err(HeapError::io("failed to create pool file", path, e)),
    }
}

/// Lock, size, format and recover a pool file. Nothing touches an
/// existing file before its lock is held.
fn initialize_pool(
    path: &Path,
    file: File,
    header: &PoolHeader,
    mode: u32,
    metrics: &MetricsRegistry,
) -> HeapResult<(PoolMapping, RecoveredPool)> {
    let lock = PoolLock::acquire(file, path)?;

    // The mode passed at open is filtered by the umask and ignored for an
    // existing file.
    #[cfg(unix)]
    lock.file()
        .set_permissions(fs::Permissions::from_mode(mode))
        .map_err(|e| HeapError::io("failed to set pool permissions", path, e))?;
    #[cfg(not(unix))]
    let _ = mode;

    lock.file()
        .set_len(0)
        .and_then(|_| lock.file().set_len(header.pool_size))
        .map_err(|e| HeapError::io("failed to size pool file", path, e))?;

    let mut map = PoolMapping::map(lock, header.pool_size, path)?;
    format_pool(&mut map, header).map_err(|e| HeapError::io("failed to format pool", path, e))?;
    let recovered = RecoveryManager::recover(&mut map, path, metrics)?;
    Ok((map, recovered))
}

fn format_pool(map: &mut PoolMapping, header: &PoolHeader) -> io::Result<()> {
    map.write_at(0, &header.encode());
    UndoLog::format(map, header.heap_start)?;
    let free = BlockHeader::free(header.heap_span() - BLOCK_HEADER_SIZE);
    map.write_at(header.heap_start, &free.encode());
    map.persist_all()
}

/// Consistency checks for `remove` without force on a pool nobody has open.
fn check_closed_pool(path: &Path) -> HeapResult<()> {
    let file = File::open(path).map_err(|e| open_error(path, e))?;
    let len = file
        .metadata()
        .map_err(|e| HeapError::io("failed to stat pool", path, e))?
        .len();
    if len < MIN_POOL_SIZE {
        return Err(HeapError::pool_in_use(path, "consistency check failed: file too short"));
    }
    // SAFETY: read-only mapping of a file no cooperating process holds the lock on.
    let bytes = unsafe { memmap2::Mmap::map(&file) }
        .map_err(|e| HeapError::io("failed to map pool for checking", path, e))?;

    let header = PoolHeader::decode(&bytes[..ENCODED_HEADER_LEN], len)
        .map_err(|reason| HeapError::pool_in_use(path, format!("consistency check failed: {}", reason)))?;
    let log = UndoLog::load(&bytes, header.heap_start).map_err(|e| {
        HeapError::pool_in_use(path, format!("consistency check failed: {}", e.message()))
    })?;
    if log.state() != LogState::Idle {
        return Err(HeapError::pool_in_use(
            path,
            "undo log holds an unresolved transaction",
        ));
    }

    let mut scanner = BlockScanner::new(&bytes, header.heap_start, header.heap_end);
    DirectoryVerifier::rebuild(&mut scanner, header.heap_start, header.heap_end)
        .and_then(|directory| DirectoryVerifier::verify(&directory))
        .map_err(|e| HeapError::pool_in_use(path, format!("consistency check failed: {}", e.message())))?;
    Ok(())
}
