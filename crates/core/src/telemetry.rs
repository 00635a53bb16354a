use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

#[derive(Debug, thiserror::Error)]
#[error("logging initialization failed: {0}")]
pub struct TelemetryError(String);

/// Installs the global subscriber. `RUST_LOG` wins over the configured level
/// when present. Calling this twice returns an error instead of panicking.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);
    let result = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|error| TelemetryError(error.to_string()))
}
