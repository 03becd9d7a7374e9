//! Persistent object handles

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Handle to an object in a persistent heap.
///
/// Stays valid across process restarts: it names the pool by identity and
/// the object by payload offset. A handle is only accepted by the heap
/// whose pool id it carries; volatile blocks are a different type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersistentObject {
    pool_id: Uuid,
    offset: u64,
    size: u64,
    type_tag: u64,
}

impl PersistentObject {
    pub(crate) fn new(pool_id: Uuid, offset: u64, size: u64, type_tag: u64) -> Self {
        Self {
            pool_id,
            offset,
            size,
            type_tag,
        }
    }

    pub fn pool_id(&self) -> Uuid {
        self.pool_id
    }

    /// Absolute pool offset of the first payload byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn type_tag(&self) -> u64 {
        self.type_tag
    }
}
