//! Tracing setup.

use tracing_subscriber::EnvFilter;

/// Development helper: install a fmt subscriber when `RUST_LOG` is set.
///
/// Tests call `framebroker::logging::init_tracing()` to see the broker's
/// structured logs while debugging. No-op when `RUST_LOG` is unset or when a
/// global subscriber is already installed.
pub fn init_tracing() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Subscriber for the binary: `RUST_LOG` if set, `info` otherwise.
pub fn init_binary_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
