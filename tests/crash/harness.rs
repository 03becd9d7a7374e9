//! Crash test harness for subprocess management
//!
//! The parent test re-executes the current test binary, filtered to the
//! same test, with a crash or fault point set. The child sees the data
//! directory in `PMHEAP_CRASH_CHILD_DIR` and runs the workload instead of
//! the parent logic. After the child exits the parent reopens the pool and
//! validates the recovered state.

use pmheap::crash_point::{CRASH_POINT_ENV, FAULT_POINT_ENV};
use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

/// Data directory handed to a child process
pub const CHILD_DIR_ENV: &str = "PMHEAP_CRASH_CHILD_DIR";

/// What to inject into the child
#[derive(Debug, Clone, Copy)]
pub enum Injection<'a> {
    /// Abort the child at the named point
    Crash(&'a str),
    /// Fail the device barrier at the named point
    Fault(&'a str),
}

/// Result of a child execution
#[derive(Debug)]
pub struct CrashTestResult {
    /// Whether the child was killed by `abort()`
    pub crashed: bool,
    /// Whether the filter selected exactly the intended test
    pub ran_test: bool,
    pub exit_status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
}

impl CrashTestResult {
    /// The child ran its workload to completion without failing.
    pub fn passed(&self) -> bool {
        self.ran_test && self.exit_status.map(|s| s.success()).unwrap_or(false)
    }
}

/// Data directory if this process is a child.
pub fn child_data_dir() -> Option<PathBuf> {
    env::var_os(CHILD_DIR_ENV).map(PathBuf::from)
}

/// Test name as libtest knows it: the module path minus the crate name.
fn test_filter(module: &str, test: &str) -> String {
    match module.split_once("::") {
        Some((_, rest)) => format!("{}::{}", rest, test),
        None => test.to_string(),
    }
}

/// Run `module::test` in a child process with `injection` enabled.
pub fn run_child(
    module: &str,
    test: &str,
    injection: Injection<'_>,
    data_dir: &Path,
) -> CrashTestResult {
    let exe = env::current_exe().expect("Failed to locate test binary");
    let mut command = Command::new(exe);
    command
        .args([
            test_filter(module, test).as_str(),
            "--exact",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(CHILD_DIR_ENV, data_dir)
        .env_remove(CRASH_POINT_ENV)
        .env_remove(FAULT_POINT_ENV);
    match injection {
        Injection::Crash(point) => command.env(CRASH_POINT_ENV, point),
        Injection::Fault(point) => command.env(FAULT_POINT_ENV, point),
    };

    match command.output() {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            CrashTestResult {
                crashed: killed_by_abort(&output.status),
                ran_test: stdout.contains("running 1 test"),
                exit_status: Some(output.status),
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }
        }
        Err(e) => CrashTestResult {
            crashed: false,
            ran_test: false,
            exit_status: None,
            stdout: String::new(),
            stderr: format!("Failed to execute: {}", e),
        },
    }
}

#[cfg(unix)]
fn killed_by_abort(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(6)
}

#[cfg(not(unix))]
fn killed_by_abort(status: &ExitStatus) -> bool {
    !status.success()
}

/// Assert the child aborted at its crash point.
pub fn assert_crashed(result: &CrashTestResult, point: &str) {
    if !result.crashed || !result.stderr.contains(point) {
        report_failure(point, "crash", "abort at crash point", result);
        panic!("child did not crash at {}", point);
    }
}

/// Assert the child finished its workload successfully.
pub fn assert_passed(result: &CrashTestResult, point: &str) {
    if !result.passed() {
        report_failure(point, "fault", "child test passes", result);
        panic!("child failed under fault {}", point);
    }
}

/// Report crash test failure
pub fn report_failure(point: &str, mode: &str, expected: &str, result: &CrashTestResult) {
    eprintln!("=== CRASH TEST FAILURE ===");
    eprintln!("Point: {} ({})", point, mode);
    eprintln!("Expected: {}", expected);
    eprintln!("Exit status: {:?}", result.exit_status);
    eprintln!("Child stdout:\n{}", result.stdout);
    eprintln!("Child stderr:\n{}", result.stderr);
    eprintln!("==========================");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_strips_crate_name() {
        assert_eq!(
            test_filter("crash_tests::crash::scenarios::transaction", "test_x"),
            "crash::scenarios::transaction::test_x"
        );
        assert_eq!(test_filter("crash_tests", "test_x"), "test_x");
    }
}
