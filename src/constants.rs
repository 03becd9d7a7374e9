//! Engine constants surfaced to binding layers
//!
//! Five values are part of the external contract and must be passed
//! through unchanged by any binding:
//!
//! - `MIN_POOL_SIZE`: smallest durable pool that fits mandatory bookkeeping
//! - `REMOVE_FORCE`: the forced-removal flag (bypass consistency checks)
//! - `TX_PARAM_NONE`: the default/minimal transaction parameter value
//! - `MIN_ARENA_SIZE`: smallest volatile arena
//! - `ERROR_MESSAGE_SIZE`: buffer length that always holds an arena failure description
//!
//! The remaining constants describe the on-media layout the minimums are
//! derived from.

/// Reserved span for the pool header.
pub const HEADER_SIZE: u64 = 4096;

/// Lowest first byte of the heap region.
///
/// The undo log occupies `[HEADER_SIZE, heap_start)`; each pool records
/// its own `heap_start` in the header, never below this value.
pub const MIN_HEAP_START: u64 = 1024 * 1024;

/// Smallest undo log region.
pub const MIN_UNDO_LOG_SIZE: u64 = MIN_HEAP_START - HEADER_SIZE;

/// By default the undo log region is this fraction (1/N) of the pool.
pub const UNDO_LOG_DIVISOR: u64 = 4;

/// Alignment of the heap start, and so of the undo log region's end.
pub const LOG_REGION_ALIGN: u64 = 4096;

/// Smallest heap region a pool may carry.
pub const MIN_HEAP_SPAN: u64 = 1024 * 1024;

/// Smallest durable pool size in bytes.
///
/// Creation below this size fails before any file is touched.
pub const MIN_POOL_SIZE: u64 = MIN_HEAP_START + MIN_HEAP_SPAN;

/// Forced-removal flag: when passed to `PoolStore::remove`, consistency
/// and in-use checks are bypassed.
pub const REMOVE_FORCE: bool = true;

/// Default transaction parameter value (no special flags).
pub const TX_PARAM_NONE: u32 = 0;

/// Default access mode for pool files: owner read/write only.
pub const DEFAULT_POOL_MODE: u32 = 0o600;

/// Payload alignment for every heap block.
pub const BLOCK_ALIGN: u64 = 16;

/// Smallest volatile arena size in bytes.
///
/// Larger than `MIN_POOL_SIZE`: the arena keeps its own free-list metadata
/// per chunk and never shares the durable pool's reserved regions.
pub const MIN_ARENA_SIZE: u64 = 4 * 1024 * 1024;

/// Maximum length, including the terminating NUL, of an arena failure description.
pub const ERROR_MESSAGE_SIZE: usize = 128;
