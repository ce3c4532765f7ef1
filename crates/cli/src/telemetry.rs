// Logging setup for the CLI
//
// Configure via environment variables:
// - RUST_LOG: full filter directive (takes precedence)
// - LOG_LEVEL: level applied to the workspace crates (default: "warn")

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter used when RUST_LOG is not set
pub fn default_filter(level: &str) -> String {
    format!("parallel={level},parallel_cli={level}")
}

/// Install a stderr fmt subscriber. Results go to stdout, logs never do.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "warn".to_string());
        EnvFilter::new(default_filter(&level))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
