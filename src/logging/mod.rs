use serde::{Deserialize, Serialize};
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};
use anyhow::{anyhow, Result};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to enable structured logging (JSON format)
    pub structured: bool,
    /// Whether to include file/line info in logs
    pub include_location: bool,
    /// Environment filter override (e.g., "docvault=debug,reqwest=warn")
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
            include_location: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    pub fn parsed_level(&self) -> Result<Level> {
        self.level
            .parse::<Level>()
            .map_err(|_| anyhow!("Invalid log level: {}", self.level))
    }
}

static INIT: Once = Once::new();

/// Install the global tracing subscriber. Later calls are no-ops.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = setup_tracing(&config);
    });
    result
}

fn setup_tracing(config: &LoggingConfig) -> Result<()> {
    let level = config.parsed_level()?;
    let env_filter = match &config.env_filter {
        Some(filter) => EnvFilter::try_new(filter)?,
        None => EnvFilter::from_default_env().add_directive(format!("docvault={}", level).parse()?),
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let registry = Registry::default().with(env_filter);
    if config.structured {
        registry.with(console_layer.json().with_ansi(false)).try_init()?;
    } else {
        registry.with(console_layer).try_init()?;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %level,
        structured = config.structured,
        "Logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_level() {
        let config = LoggingConfig { level: "loud".into(), ..Default::default() };
        assert!(config.parsed_level().is_err());
        assert_eq!(LoggingConfig::default().parsed_level().unwrap(), Level::INFO);
    }

    #[test]
    fn init_is_idempotent() {
        init_logging(LoggingConfig { level: "debug".into(), ..Default::default() }).unwrap();
        init_logging(LoggingConfig::default()).unwrap();
    }
}
