//! Pool creation options
//!
//! Options are built programmatically; nothing is read from files or the
//! environment.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{
    DEFAULT_POOL_MODE, HEADER_SIZE, LOG_REGION_ALIGN, MIN_HEAP_SPAN, MIN_UNDO_LOG_SIZE,
    UNDO_LOG_DIVISOR,
};

/// Write-consistency policy recorded in the pool header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeapKind {
    /// Standalone writes are applied in place and followed by a barrier.
    /// Data survives a clean exit; an interrupted write may be torn.
    Durable,
    /// Every standalone mutation runs in an implicit transaction.
    /// Data survives any interruption.
    Transactional,
}

impl HeapKind {
    /// Value stored in the pool header
    pub fn to_raw(self) -> u32 {
        match self {
            HeapKind::Durable => 1,
            HeapKind::Transactional => 2,
        }
    }

    /// Decode a header value
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(HeapKind::Durable),
            2 => Some(HeapKind::Transactional),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HeapKind::Durable => "durable",
            HeapKind::Transactional => "transactional",
        }
    }
}

impl fmt::Display for HeapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options for `PoolStore::create_with`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Consistency policy for standalone writes
    pub kind: HeapKind,
    /// Permission bits for the pool file
    pub mode: u32,
    /// Replace an existing pool at the path instead of failing
    pub overwrite: bool,
    /// Undo log capacity in bytes; `None` reserves a quarter of the pool.
    /// Bounds the pre-image volume of a single transaction.
    #[serde(default)]
    pub undo_log_size: Option<u64>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            kind: HeapKind::Transactional,
            mode: DEFAULT_POOL_MODE,
            overwrite: false,
            undo_log_size: None,
        }
    }
}

impl PoolOptions {
    pub fn with_kind(mut self, kind: HeapKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_undo_log_size(mut self, bytes: u64) -> Self {
        self.undo_log_size = Some(bytes);
        self
    }

    /// First heap byte for a pool of `pool_size` bytes.
    ///
    /// The undo log fills `[HEADER_SIZE, heap_start)`; the heap keeps at
    /// least `MIN_HEAP_SPAN` bytes.
    pub fn heap_start_for(&self, pool_size: u64) -> Result<u64, String> {
        let requested = self
            .undo_log_size
            .unwrap_or(pool_size / UNDO_LOG_DIVISOR)
            .max(MIN_UNDO_LOG_SIZE);
        let heap_start = HEADER_SIZE
            .checked_add(requested)
            .and_then(|end| end.checked_add(LOG_REGION_ALIGN - 1))
            .map(|end| end & !(LOG_REGION_ALIGN - 1))
            .ok_or_else(|| format!("undo log size {} is too large", requested))?;
        if pool_size.saturating_sub(heap_start) < MIN_HEAP_SPAN {
            return Err(format!(
                "undo log size {} leaves less than {} heap bytes in a {} byte pool",
                requested, MIN_HEAP_SPAN, pool_size
            ));
        }
        Ok(heap_start)
    }

    /// Reject permission bits outside `0o777` and modes without owner read/write.
    pub fn validate(&self) -> Result<(), String> {
        if self.mode & !0o777 != 0 {
            return Err(format!("mode {:o} has bits outside 0o777", self.mode));
        }
        if self.mode & 0o600 != 0o600 {
            return Err(format!("mode {:o} must grant owner read/write", self.mode));
        }
        Ok(())
    }
}
