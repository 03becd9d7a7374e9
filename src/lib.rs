//! pmheap - A crash-consistent persistent heap
//!
//! Objects live either in a durable pool file, mutated through undo-log
//! transactions, or in a volatile arena with no durability at all.
//!
//! ```ignore
//! use pmheap::{PoolStore, TxParams};
//!
//! let store = PoolStore::new();
//! let heap = store.create("/mnt/pmem/pool", 64 << 20, 0o600)?;
//! let obj = heap.allocate(64, 1)?;
//! heap.transaction(TxParams::NONE, |tx| {
//!     tx.write_u64(&obj, 0, 42)?;
//!     tx.set_root(Some(&obj))
//! })?;
//! heap.close()?;
//! ```

pub mod arena;
pub mod constants;
pub mod crash_point;
pub mod directory;
pub mod heap;
pub mod observability;
pub mod pool;
pub mod recovery;
pub mod txn;

pub use arena::{ArenaError, ArenaResult, VolatileArena, VolatileBlock};
pub use heap::{PersistentHeap, PersistentObject};
pub use pool::{HeapError, HeapErrorCode, HeapKind, HeapResult, PoolOptions, PoolStore};
pub use txn::{Transaction, TxParams, TxState};
