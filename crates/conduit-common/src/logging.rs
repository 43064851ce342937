//! Ambient logging setup, shared by every binary in the workspace.
//!
//! Format and verbosity are controlled entirely through environment
//! variables so the same binary behaves correctly under a local `cargo run`
//! and under a container orchestrator: `RUST_LOG` drives the filter,
//! `LOG_FORMAT=json` switches to structured output for log aggregation.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber. Safe to call once per process;
/// call sites should guard with `std::sync::Once` or call only from `main`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    if format.eq_ignore_ascii_case("json") {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Test-friendly initializer: installs a subscriber only if one isn't
/// already set, swallowing the "already set" error from repeated calls
/// across tests in the same process.
pub fn init_test_logging() {
    let filter = EnvFilter::new("debug");
    let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
}
