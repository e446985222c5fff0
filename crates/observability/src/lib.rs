//! Tracing/logging setup shared by the runwarden binaries.

/// Initialize process-wide logging with the format chosen by `RUNWARDEN_LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use self::tracing::LogFormat;
