//! Tracing subscriber setup for test binaries and tools using the harness.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

fn env_filter(fallback: &str) -> EnvFilter {
    // RUST_LOG wins over the fallback directive
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install a fmt subscriber writing through the libtest capture writer.
///
/// Safe to call from every test: only the first call installs a subscriber,
/// later calls return `false`.
pub fn init_test_logging() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(DEFAULT_FILTER))
        .with_test_writer()
        .with_target(false)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}

/// Install a fmt subscriber on stderr with the given fallback filter.
pub fn init_logging(filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(filter))
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
