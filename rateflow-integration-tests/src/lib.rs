//! Shared helpers for the end-to-end tests

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a tracing subscriber once per test binary. Honors `RUST_LOG`;
/// without it the kernel's events stay silent, which is the default no-op
/// logging contract.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
