//! Heap error types
//!
//! Every durable-side failure carries a stable code, a severity, and
//! structured detail (offending size, path or offset) so a binding layer
//! can render a precise diagnostic.
//!
//! FATAL codes mean the pool must be reopened or recreated:
//! - PMHEAP_CORRUPT_POOL
//! - PMHEAP_FATAL_IO

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Severity levels for heap errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, the pool stays usable
    Error,
    /// The pool is unusable until reopened or recreated
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Heap error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapErrorCode {
    /// Requested size below a hard minimum
    SizeTooSmall,
    /// A pool already exists at the path
    PathExists,
    /// No pool exists at the path
    NotFound,
    /// Header or layout validation failed
    CorruptPool,
    /// Outstanding mutation, foreign lock, or failed consistency check
    PoolInUse,
    /// The handle was closed
    PoolClosed,
    /// Stored heap kind differs from the requested one
    WrongKind,
    /// Handle not present in the allocation directory
    UnknownHandle,
    /// Range outside the object or the pool
    OutOfBounds,
    /// No free block large enough, or the undo log is full
    OutOfSpace,
    /// Operation not permitted in the transaction's current state
    TxState,
    /// This thread already has an active transaction on the heap
    TxActive,
    /// Durability barrier failed during commit; the transaction was rolled back
    CommitFailed,
    /// Unrecoverable device failure
    FatalIo,
    /// Pool options failed validation
    InvalidOptions,
    /// Other I/O failure
    Io,
}

impl HeapErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            HeapErrorCode::SizeTooSmall => "PMHEAP_SIZE_TOO_SMALL",
            HeapErrorCode::PathExists => "PMHEAP_PATH_EXISTS",
            HeapErrorCode::NotFound => "PMHEAP_NOT_FOUND",
            HeapErrorCode::CorruptPool => "PMHEAP_CORRUPT_POOL",
            HeapErrorCode::PoolInUse => "PMHEAP_POOL_IN_USE",
            HeapErrorCode::PoolClosed => "PMHEAP_POOL_CLOSED",
            HeapErrorCode::WrongKind => "PMHEAP_WRONG_KIND",
            HeapErrorCode::UnknownHandle => "PMHEAP_UNKNOWN_HANDLE",
            HeapErrorCode::OutOfBounds => "PMHEAP_OUT_OF_BOUNDS",
            HeapErrorCode::OutOfSpace => "PMHEAP_OUT_OF_SPACE",
            HeapErrorCode::TxState => "PMHEAP_TX_STATE",
            HeapErrorCode::TxActive => "PMHEAP_TX_ACTIVE",
            HeapErrorCode::CommitFailed => "PMHEAP_COMMIT_FAILED",
            HeapErrorCode::FatalIo => "PMHEAP_FATAL_IO",
            HeapErrorCode::InvalidOptions => "PMHEAP_INVALID_OPTIONS",
            HeapErrorCode::Io => "PMHEAP_IO",
        }
    }

    /// Returns the severity level for this code
    pub fn severity(&self) -> Severity {
        match self {
            HeapErrorCode::CorruptPool | HeapErrorCode::FatalIo => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for HeapErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Heap error with full context
#[derive(Debug)]
pub struct HeapError {
    code: HeapErrorCode,
    message: String,
    details: Option<String>,
    path: Option<PathBuf>,
    size: Option<u64>,
    offset: Option<u64>,
    source: Option<io::Error>,
}

impl HeapError {
    fn new(code: HeapErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            path: None,
            size: None,
            offset: None,
            source: None,
        }
    }

    fn with_path(mut self, path: &Path) -> Self {
        self.details = Some(format!("path: {}", path.display()));
        self.path = Some(path.to_path_buf());
        self
    }

    fn with_source(mut self, source: io::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Requested size is below `minimum`
    pub fn size_too_small(requested: u64, minimum: u64) -> Self {
        let mut err = Self::new(
            HeapErrorCode::SizeTooSmall,
            format!("size must be at least {} bytes", minimum),
        );
        err.details = Some(format!("requested: {}", requested));
        err.size = Some(requested);
        err
    }

    pub fn path_exists(path: &Path) -> Self {
        Self::new(HeapErrorCode::PathExists, "a pool already exists").with_path(path)
    }

    pub fn not_found(path: &Path) -> Self {
        Self::new(HeapErrorCode::NotFound, "no pool exists").with_path(path)
    }

    pub fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::new(HeapErrorCode::CorruptPool, reason).with_path(path)
    }

    /// Corruption found at a specific pool offset
    pub fn corrupt_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        let mut err = Self::new(HeapErrorCode::CorruptPool, reason);
        err.details = Some(format!("byte_offset: {}", offset));
        err.offset = Some(offset);
        err
    }

    pub fn pool_in_use(path: &Path, reason: impl Into<String>) -> Self {
        Self::new(HeapErrorCode::PoolInUse, reason).with_path(path)
    }

    pub fn pool_closed() -> Self {
        Self::new(HeapErrorCode::PoolClosed, "pool handle is closed")
    }

    pub fn wrong_kind(path: &Path, expected: &str, found: &str) -> Self {
        Self::new(
            HeapErrorCode::WrongKind,
            format!("expected a {} heap, found {}", expected, found),
        )
        .with_path(path)
    }

    /// Handle at `offset` is not a live directory entry
    pub fn unknown_handle(offset: u64) -> Self {
        let mut err = Self::new(HeapErrorCode::UnknownHandle, "handle is not a live allocation");
        err.details = Some(format!("offset: {}", offset));
        err.offset = Some(offset);
        err
    }

    pub fn out_of_bounds(offset: u64, len: u64, limit: u64) -> Self {
        let mut err = Self::new(
            HeapErrorCode::OutOfBounds,
            format!("range ({}, {}) exceeds limit {}", offset, offset + len, limit),
        );
        err.offset = Some(offset);
        err.size = Some(len);
        err
    }

    pub fn out_of_space(requested: u64, reason: impl Into<String>) -> Self {
        let mut err = Self::new(HeapErrorCode::OutOfSpace, reason);
        err.details = Some(format!("requested: {}", requested));
        err.size = Some(requested);
        err
    }

    pub fn tx_state(message: impl Into<String>) -> Self {
        Self::new(HeapErrorCode::TxState, message)
    }

    pub fn tx_active() -> Self {
        Self::new(
            HeapErrorCode::TxActive,
            "this thread already has an active transaction on the heap",
        )
    }

    pub fn commit_failed(source: io::Error) -> Self {
        Self::new(
            HeapErrorCode::CommitFailed,
            "durability barrier failed; transaction rolled back",
        )
        .with_source(source)
    }

    pub fn fatal_io(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(HeapErrorCode::FatalIo, message).with_source(source)
    }

    /// Heap was poisoned by an earlier fatal device error
    pub fn poisoned() -> Self {
        Self::new(
            HeapErrorCode::FatalIo,
            "heap is unusable after a fatal device error; reopen the pool",
        )
    }

    pub fn invalid_options(reason: impl Into<String>) -> Self {
        Self::new(HeapErrorCode::InvalidOptions, reason)
    }

    /// Device error with no path context
    pub fn device(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(HeapErrorCode::Io, message).with_source(source)
    }

    pub fn io(message: impl Into<String>, path: &Path, source: io::Error) -> Self {
        Self::new(HeapErrorCode::Io, message)
            .with_path(path)
            .with_source(source)
    }

    /// Returns the error code
    pub fn code(&self) -> HeapErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Offending pool path, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Offending size, if any
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Offending offset or handle, if any
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Returns whether the pool must be reopened or recreated
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, " caused by: {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for HeapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for heap operations
pub type HeapResult<T> = Result<T, HeapError>;
