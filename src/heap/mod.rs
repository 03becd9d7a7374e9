//! PersistentHeap subsystem
//!
//! Allocation, free, reads and writes of objects inside an open pool.
//! Object handles carry the pool identity and payload offset, so they stay
//! valid across restarts.
//!
//! # Invariants
//!
//! - Every allocation is zero-filled
//! - Allocation and free are serialized per pool
//! - A handle is accepted only while its directory entry is live

pub(crate) mod allocator;
#[allow(clippy::module_inception)]
mod heap;
mod object;
mod shared;

pub use heap::PersistentHeap;
pub use object::PersistentObject;

pub(crate) use shared::{HeapShared, HeapState};
