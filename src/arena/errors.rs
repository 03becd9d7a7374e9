//! # Volatile Arena Errors
//!
//! Every description fits in `ERROR_MESSAGE_SIZE` bytes including the
//! terminating NUL, so a caller that pre-allocates that much never sees a
//! truncated message.

use std::io;
use thiserror::Error;

use crate::constants::ERROR_MESSAGE_SIZE;

/// Result type for arena operations
pub type ArenaResult<T> = Result<T, ArenaError>;

const IO_PREFIX: &str = "arena I/O error: ";

/// Volatile arena errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("arena size {requested} below minimum {minimum}")]
    SizeTooSmall { requested: u64, minimum: u64 },

    #[error("out of memory: {requested} bytes requested, {available} free")]
    OutOfMemory { requested: u64, available: u64 },

    #[error("unknown volatile block at offset {0}")]
    UnknownHandle(u64),

    #[error("range {offset}+{len} exceeds block of {limit} bytes")]
    OutOfBounds { offset: u64, len: u64, limit: u64 },

    /// Bounded when constructed through `ArenaError::io`.
    #[error("arena I/O error: {0}")]
    Io(String),
}

impl ArenaError {
    pub fn io(context: &str, err: &io::Error) -> Self {
        let full = format!("{}: {}", context, err);
        ArenaError::Io(truncate_on_char(&full, ERROR_MESSAGE_SIZE - 1 - IO_PREFIX.len()).to_string())
    }

    /// Copy the description into `buf` as a NUL-terminated string.
    ///
    /// Returns the number of message bytes written, excluding the NUL. A
    /// buffer of `ERROR_MESSAGE_SIZE` bytes always holds the whole message;
    /// a shorter one gets the longest prefix ending on a character boundary.
    pub fn message_into(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let message = self.to_string();
        let fitted = truncate_on_char(&message, buf.len() - 1);
        let n = fitted.len();
        buf[..n].copy_from_slice(fitted.as_bytes());
        buf[n] = 0;
        n
    }
}

fn truncate_on_char(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
