//! Test-only tooling: a `tracing-subscriber` installer for test binaries.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a process-wide `tracing` subscriber once, reading
/// `RUST_LOG`/`COLL_LOG` for its filter. Safe to call from every test;
/// subsequent calls are no-ops.
pub fn init_test_tracing() {
    INIT.call_once(|| {
        let filter = std::env::var("COLL_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "warn".to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .with_test_writer()
            .try_init();
    });
}
