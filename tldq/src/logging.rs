use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,tldq=debug,libhead_storm=info";

/// Structured logging to stderr; stdout is reserved for NDJSON output.
///
/// `--log-level` wins over `RUST_LOG`, which wins over the built-in default.
pub fn init_logging(level: Option<&str>) {
    let env_filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}
