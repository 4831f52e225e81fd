//! Tracing/logging setup shared by every binary and test.

/// Log subscriber configuration.
pub mod logging;

/// Initialize process-wide structured logging.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    logging::init();
}

/// Initialize logging for tests: human-readable output captured per test.
///
/// Safe to call from every test.
pub fn init_for_tests() {
    logging::init_for_tests();
}
