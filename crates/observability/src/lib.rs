//! Tracing and logging setup shared by the binaries.

/// Initialize process-wide logging: JSON lines, filtered by `RUST_LOG`
/// (default `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

pub use tracing::LogFormat;

/// Tracing configuration (filters, formatters).
pub mod tracing;
