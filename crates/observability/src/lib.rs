//! Tracing/logging setup shared by adminhub binaries.

/// Initialize process-wide tracing from the environment.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::{LogFormat, init_with};
