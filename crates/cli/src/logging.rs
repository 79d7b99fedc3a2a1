//! Logging initialisation for the CLI
//!
//! Logs go to stderr so stdout carries only the command's result.

use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for a CLI run
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// Enable JSON structured logging (vs plain text)
    pub json_format: bool,
    /// Include file and line number information
    pub include_location: bool,
    /// Environment filter (supports complex filters like "schemig_core=debug,sqlx=warn")
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, json_format: bool) -> Self {
        Self {
            level: level.into(),
            json_format,
            ..Self::default()
        }
    }

    /// Set environment filter
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Filter directive used when `RUST_LOG` is not set. sqlx statement
    /// logging is kept at warn unless asked for explicitly.
    pub fn filter_directive(&self) -> String {
        match &self.env_filter {
            Some(filter) => filter.clone(),
            None => format!("{},sqlx=warn", self.level),
        }
    }
}

/// Initialize logging; `RUST_LOG` takes precedence over the configured level
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directive()))?;

    let layer = Layer::new()
        .with_writer(io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.with_target(false))
            .try_init()?;
    }

    tracing::debug!(
        "Logging initialized (level: {}, format: {})",
        config.level,
        if config.json_format { "JSON" } else { "text" }
    );
    Ok(())
}
