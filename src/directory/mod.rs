//! AllocationDirectory subsystem
//!
//! The heap region is self-describing: a linear walk over block headers
//! from the heap start visits every block exactly once. The in-memory
//! directory is derived from that walk on open and after every abort.
//!
//! # Invariants
//!
//! - Live ranges are pairwise disjoint
//! - Every block lies inside `[heap_start, heap_end)`
//! - Blocks tile the heap region exactly

#[allow(clippy::module_inception)]
mod directory;
mod entry;
mod verifier;

pub use directory::{AllocationDirectory, HeapStats};
pub use entry::{BlockHeader, DirectoryEntry, BLOCK_HEADER_SIZE, BLOCK_MAGIC};
pub use verifier::{BlockScan, BlockScanner, DirectoryVerifier};
