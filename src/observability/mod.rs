//! Observability for the heap engine
//!
//! - Structured logging (JSON lines) for lifecycle events
//! - Per-heap counters for hot-path operations
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on heap state
//! 3. No background threads
//!
//! # Usage
//!
//! ```ignore
//! use pmheap::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::PoolOpen, &[("path", "/mnt/pmem/pool")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

fn severity_for(event: Event) -> Severity {
    if event.is_fatal() {
        Severity::Fatal
    } else if event.is_failure() {
        Severity::Error
    } else {
        Severity::Info
    }
}

/// Log a lifecycle event
pub fn log_event(event: Event) {
    Logger::log(severity_for(event), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(severity_for(event), event.as_str(), fields);
}
