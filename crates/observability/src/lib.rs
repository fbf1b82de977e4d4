//! Process-wide tracing setup.

use bazaar_core::Environment;

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::LogFormat;

/// Initialize process-wide tracing with the format suited to `environment`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(environment: Environment) {
    tracing::init(LogFormat::for_environment(environment));
}
