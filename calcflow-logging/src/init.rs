use anyhow::Result;
use calcflow_config::{LogFormat, LogTarget, LoggingConfig};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Build the level filter.
///
/// A forced level (from the command line) wins, then `RUST_LOG`, then the
/// configured level.
pub fn build_env_filter(forced: Option<&str>, configured: &str) -> EnvFilter {
    match forced {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to '{}'", level, configured);
            EnvFilter::new(configured)
        }),
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(configured))
            .unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Initialize logging for the coordinator process
pub fn init_logging(config: &LoggingConfig, forced_level: Option<&str>) -> Result<()> {
    let env_filter = build_env_filter(forced_level, &config.level.to_string());

    let writer = match config.target {
        LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    // Use try_init to avoid panic if global subscriber already set
    let initialized = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    if initialized.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize logging for the sidecar process.
///
/// Output goes to stderr, which the supervisor inherits; stdout is the
/// result channel and must only ever carry protocol frames.
pub fn init_sidecar_logging(forced_level: Option<&str>) -> Result<()> {
    let env_filter = build_env_filter(forced_level, "info");

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    tracing::debug!("Sidecar tracing initialized");
    Ok(())
}
