//! VolatileArena subsystem
//!
//! Capacity-bounded scratch allocation with no durability. Arenas never
//! touch a pool, the undo log or the allocation directory.

#[allow(clippy::module_inception)]
mod arena;
mod errors;
mod free_list;

pub use arena::{ArenaStats, VolatileArena, VolatileBlock};
pub use errors::{ArenaError, ArenaResult};
