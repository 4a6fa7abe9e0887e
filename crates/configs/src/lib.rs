//! answerboard/crates/configs/src/lib.rs
//!
//! Layered runtime configuration: built-in defaults, an optional
//! `Engine.toml` next to the binary, then `ANSWERBOARD_`-prefixed
//! environment variables (e.g. `ANSWERBOARD_DATABASE__URL`).

use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigsError {
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseSettings {
    /// Connection URL for the relational store. Absent means the in-memory
    /// store; kept secret because deployments embed credentials in it.
    #[serde(default)]
    pub url: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Backoff before the single commit retry on transient store failures.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_retry_backoff_ms() -> u64 {
    25
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { retry_backoff_ms: default_retry_backoff_ms() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Structured JSON output instead of the human-readable formatter.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

impl LoggingSettings {
    /// Unrecognized level strings fall back to INFO rather than failing
    /// startup.
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "info" => tracing::Level::INFO,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigsError> {
        dotenvy::dotenv().ok();
        let cfg = Config::builder()
            .add_source(File::with_name("Engine").required(false))
            .add_source(Environment::with_prefix("ANSWERBOARD").separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sources_yield_defaults() {
        let cfg = Config::builder().build().unwrap();
        let settings: Settings = cfg.try_deserialize().unwrap();
        assert!(settings.database.url.is_none());
        assert_eq!(settings.engine.retry_backoff_ms, 25);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
    }

    #[test]
    fn level_strings_map_onto_tracing_levels() {
        let mut logging = LoggingSettings::default();
        assert_eq!(logging.tracing_level(), tracing::Level::INFO);
        logging.level = "DEBUG".into();
        assert_eq!(logging.tracing_level(), tracing::Level::DEBUG);
        logging.level = "verbose".into();
        assert_eq!(logging.tracing_level(), tracing::Level::INFO);
    }
}
