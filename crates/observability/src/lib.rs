//! Tracing and logging setup shared by the hub binaries and tests.

pub mod tracing;

pub use tracing::{LogFormat, TracingConfig};

/// Initialize process-wide tracing with JSON output and `RUST_LOG` filtering.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(&TracingConfig::default());
}
