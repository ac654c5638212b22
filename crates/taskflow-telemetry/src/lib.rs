use std::str::FromStr;

use taskflow_settings::LoggingSettings;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the tracing subscriber.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG at startup.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "taskflow_realtime" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Fails on level names `tracing` does not know.
    pub fn from_settings(settings: &LoggingSettings) -> Result<Self, TelemetryError> {
        let log_level = parse_level(&settings.level)?;
        let module_levels = settings
            .modules
            .iter()
            .map(|(module, level)| Ok((module.clone(), parse_level(level)?)))
            .collect::<Result<Vec<_>, TelemetryError>>()?;
        Ok(Self {
            log_level,
            module_levels,
            json: settings.json,
        })
    }

    /// `EnvFilter` directive string for this config.
    pub fn filter_directives(&self) -> String {
        directives(self.log_level, &self.module_levels)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("unknown log level: {0}")]
    UnknownLevel(String),
    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Install the global subscriber. Call once at startup; RUST_LOG, when set,
/// replaces the configured filter.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))
}

fn parse_level(name: &str) -> Result<Level, TelemetryError> {
    Level::from_str(name.trim()).map_err(|_| TelemetryError::UnknownLevel(name.to_string()))
}

fn directives(base: Level, modules: &[(String, Level)]) -> String {
    let mut filter = base.to_string().to_lowercase();
    for (module, level) in modules {
        filter.push(',');
        filter.push_str(module);
        filter.push('=');
        filter.push_str(&level.to_string().to_lowercase());
    }
    filter
}
