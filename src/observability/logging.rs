//! Tracing subscriber setup
//!
//! `RUST_LOG` wins when set; otherwise the level from [`LoggingConfig`]
//! applies to this crate and everything else stays at `warn`.

use crate::config::{LogFormat, LoggingConfig};
use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,berglas={}", config.level.as_str())))
}

/// Install the global subscriber, writing to stderr
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_writer(std::io::stderr)
        .with_target(false);

    match config.format {
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to install JSON tracing subscriber"),
        LogFormat::Text => builder
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to install tracing subscriber"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_env_filter_uses_configured_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let filter = env_filter(&LoggingConfig {
            level: LogLevel::Debug,
            format: LogFormat::Text,
        });
        assert!(filter.to_string().contains("berglas=debug"));
    }
}
