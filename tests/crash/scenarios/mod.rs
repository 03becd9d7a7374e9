//! Crash scenarios, one file per subsystem

mod allocation;
mod recovery;
mod transaction;
