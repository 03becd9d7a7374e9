//! Crash testing framework for pmheap
//!
//! - Crash injection at named points in a child process
//! - Fault injection on the commit barrier
//! - Post-crash validation by reopening the pool

pub mod harness;
pub mod scenarios;
pub mod utils;

pub use harness::*;
pub use utils::*;
