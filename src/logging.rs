//! Structured logging initialization shared by every process entrypoint.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize tracing once per process. Level defaults to `info` in
/// production-like environments and `debug` elsewhere; `REELFORGE_LOG`
/// overrides with a full env-filter directive.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let directive = std::env::var("REELFORGE_LOG").unwrap_or_else(|_| default_level());

        // try_init: tests and embedding processes may already have a
        // global subscriber installed.
        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_filter(EnvFilter::new(directive)),
            )
            .try_init();
    });
}

fn default_level() -> String {
    match std::env::var("APP_ENV").as_deref() {
        Ok("production") => "info".to_string(),
        _ => "debug".to_string(),
    }
}
