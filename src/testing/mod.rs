//! Helpers shared by the unit tests.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a fmt subscriber once per test binary. Filter with `RUST_LOG`,
/// e.g. `RUST_LOG=hazcurrent=debug`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hazcurrent=warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_test_writer()
        .try_init();
}
