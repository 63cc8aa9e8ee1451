use anyhow::Result;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// Supports two formats:
/// - "json": Structured JSON output for production
/// - "pretty": Human-readable format for development
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn setup_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            let json_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_thread_ids(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init()?;
        }
        "pretty" => {
            let pretty_layer = fmt::layer()
                .pretty()
                .with_target(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(pretty_layer)
                .try_init()?;
        }
        _ => {
            return Err(anyhow::anyhow!(
                "Unsupported log format: {}. Use 'json' or 'pretty'",
                config.format
            ));
        }
    }

    Ok(())
}
