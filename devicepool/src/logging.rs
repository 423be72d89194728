// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Tracing setup, modeled on the teacher's `tui/src/core/log/tracing_init.rs`: a small
//! function that builds the subscriber and installs it, rather than leaving every binary
//! embedding this crate to wire up `tracing_subscriber` from scratch.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Env var consulted for the filter directive, falling back to `info` when unset or
/// invalid — matches the teacher's preference for `RUST_LOG`-style overrides over a
/// hardcoded level.
const ENV_VAR: &str = "DEVICEPOOL_LOG";

/// Installs a stdout `tracing` subscriber for the whole process. Safe to call more than
/// once from tests; later calls are no-ops (`set_global_default` failing is swallowed,
/// since this almost always means a previous install already won the race).
pub fn install_default() {
    let filter = EnvFilter::try_from_env(ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Test-only installer: routes to the `tracing_subscriber::fmt::TestWriter` so output
/// interleaves correctly with `cargo test`'s captured output, and is idempotent across
/// the whole test binary via `try_init`.
#[cfg(test)]
pub fn install_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
