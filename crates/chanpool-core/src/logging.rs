//! Global `tracing` subscriber setup.

use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter,
};

use crate::config::LoggingConfig;

const CRATES: [&str; 3] = ["chanpool_core", "chanpool_cli", "tests"];

/// Filter used when `RUST_LOG` is unset or is a bare level.
///
/// Other crates are held at `warn`; ours log at `level`.
#[must_use]
pub fn default_directives(level: &str) -> String {
    std::iter::once("warn".to_string())
        .chain(CRATES.iter().map(|krate| format!("{krate}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let from_env = std::env::var("RUST_LOG").ok();
    match from_env.as_deref() {
        Some(level @ ("trace" | "debug" | "info" | "warn" | "error")) => {
            EnvFilter::new(default_directives(level))
        }
        Some(_) => EnvFilter::try_from_env("RUST_LOG")
            .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level))),
        None => EnvFilter::new(default_directives(&config.level)),
    }
}

/// Installs the global subscriber: `json` output or multi-line `pretty` output.
///
/// # Errors
///
/// Returns [`TryInitError`] if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(build_filter(config));

    if config.format.as_str() == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer().json();
        registry.with(fmt_layer).try_init()
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).try_init()
    }
}
