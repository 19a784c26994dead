// Logging setup - tracing subscriber with an env-overridable filter
use tracing_subscriber::{fmt, EnvFilter};

/// `RUST_LOG` wins over the configured default filter.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .init();
}
