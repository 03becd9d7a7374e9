//! Pool lifecycle
//!
//! A pool is one file holding a fixed header, the undo log region and the
//! heap. `PoolStore` owns creation, opening and removal; everything that
//! touches the mapped bytes goes through `PoolMapping`.

pub(crate) mod checksum;
pub(crate) mod codec;
pub mod config;
pub mod errors;
pub mod header;
pub(crate) mod lock;
mod mapping;
mod store;

pub use config::{HeapKind, PoolOptions};
pub use errors::{HeapError, HeapErrorCode, HeapResult, Severity};
pub use header::PoolHeader;
pub use store::PoolStore;

pub(crate) use mapping::PoolMapping;
