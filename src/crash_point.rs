//! Crash and fault injection for durability testing
//!
//! Two environment variables select a single named point:
//!
//! - `PMHEAP_CRASH_POINT`: `maybe_crash(name)` terminates the process via
//!   `std::process::abort()`. No cleanup, no unwinding, no catching.
//! - `PMHEAP_FAULT_POINT`: `maybe_fail(name)` returns an injected
//!   `io::Error`, simulating a device failure at that point.
//!
//! Both lookups are cached on first use, so tests drive them from a
//! subprocess (see `tests/crash/harness.rs`).
//!
//! # Usage
//!
//! ```ignore
//! use pmheap::crash_point::{maybe_crash, points};
//!
//! maybe_crash(points::TX_BEFORE_COMMIT_FLAG);
//! ```

use std::io;
use std::sync::OnceLock;

/// Environment variable naming the crash point
pub const CRASH_POINT_ENV: &str = "PMHEAP_CRASH_POINT";

/// Environment variable naming the fault point
pub const FAULT_POINT_ENV: &str = "PMHEAP_FAULT_POINT";

static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();
static FAULT_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn get_crash_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var(CRASH_POINT_ENV).ok())
        .as_deref()
}

#[inline]
fn get_fault_point() -> Option<&'static str> {
    FAULT_POINT
        .get_or_init(|| std::env::var(FAULT_POINT_ENV).ok())
        .as_deref()
}

/// Returns true if `PMHEAP_CRASH_POINT` equals the given name.
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    get_crash_point().map(|p| p == name).unwrap_or(false)
}

/// Returns true if `PMHEAP_FAULT_POINT` equals the given name.
#[inline]
pub fn fault_point_enabled(name: &str) -> bool {
    get_fault_point().map(|p| p == name).unwrap_or(false)
}

/// Abort the process if the named crash point is enabled.
///
/// No-op when `PMHEAP_CRASH_POINT` is unset or names another point.
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// Return an injected device error if the named fault point is enabled.
#[inline]
pub fn maybe_fail(name: &str) -> io::Result<()> {
    if fault_point_enabled(name) {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("injected fault at {}", name),
        ));
    }
    Ok(())
}

/// All defined injection point names
pub mod points {
    // Transaction points
    pub const TX_AFTER_UNDO_APPEND: &str = "tx_after_undo_append";
    pub const TX_BEFORE_COMMIT_FLAG: &str = "tx_before_commit_flag";
    pub const TX_AFTER_COMMIT_FLAG: &str = "tx_after_commit_flag";
    pub const TX_COMMIT_BARRIER: &str = "tx_commit_barrier";

    // Allocator points
    pub const ALLOC_AFTER_SPLIT: &str = "alloc_after_split";

    // Recovery points
    pub const RECOVERY_AFTER_REPLAY: &str = "recovery_after_replay";

    /// Get all injection point names
    pub fn all() -> &'static [&'static str] {
        &[
            TX_AFTER_UNDO_APPEND,
            TX_BEFORE_COMMIT_FLAG,
            TX_AFTER_COMMIT_FLAG,
            TX_COMMIT_BARRIER,
            ALLOC_AFTER_SPLIT,
            RECOVERY_AFTER_REPLAY,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_disabled_by_default() {
        assert!(!crash_point_enabled("test_point"));
        assert!(!fault_point_enabled("test_point"));
        assert!(maybe_fail("test_point").is_ok());
    }

    #[test]
    fn test_all_points_defined() {
        let all = points::all();
        assert_eq!(all.len(), 6);
        assert!(all.contains(&"tx_before_commit_flag"));
        assert!(all.contains(&"tx_commit_barrier"));
        assert!(all.contains(&"recovery_after_replay"));
    }

    #[test]
    fn test_point_names_are_lowercase_with_underscores() {
        for point in points::all() {
            assert!(
                point.chars().all(|c| c.is_lowercase() || c == '_'),
                "Injection point '{}' should be lowercase with underscores",
                point
            );
        }
    }
}
