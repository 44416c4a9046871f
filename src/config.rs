//! Configuration management

use anyhow::Result;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::window::WindowConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub window: WindowSettings,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long to keep retrying the initial connection
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_database_url() -> String {
    "logstats.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowSettings {
    /// RFC 3339 instant windows are aligned to; must be a UTC midnight
    #[serde(default = "default_epoch")]
    pub epoch: String,
    #[serde(default = "default_allowed_lateness_secs")]
    pub allowed_lateness_secs: i64,
    #[serde(default = "default_max_open_buckets")]
    pub max_open_buckets: usize,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            epoch: default_epoch(),
            allowed_lateness_secs: default_allowed_lateness_secs(),
            max_open_buckets: default_max_open_buckets(),
        }
    }
}

fn default_epoch() -> String {
    "2024-11-07T00:00:00Z".to_string()
}

fn default_allowed_lateness_secs() -> i64 {
    86_400
}

fn default_max_open_buckets() -> usize {
    100_000
}

/// What to do with buckets still open when a continuous source is interrupted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Emit partial statistics for every open bucket
    #[default]
    Flush,
    /// Discard open buckets
    Drop,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            shutdown_policy: ShutdownPolicy::default(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval_ms() -> u64 {
    250
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    200
}

impl Config {
    /// Load from an optional TOML file, overridden by `LOGSTATS__SECTION__KEY` variables
    pub fn load(config_path: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("LOGSTATS").separator("__"));

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Zero("server.port"));
        }
        if self.server.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        if self.database.url.is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Zero("database.max_connections"));
        }

        self.window()?;

        if self.ingest.batch_size == 0 {
            return Err(ConfigError::Zero("ingest.batch_size"));
        }
        if self.ingest.flush_interval_ms == 0 {
            return Err(ConfigError::Zero("ingest.flush_interval_ms"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Windowing parameters, checked for a midnight epoch and non-negative lateness
    pub fn window(&self) -> Result<WindowConfig, ConfigError> {
        let settings = &self.window;
        let epoch = DateTime::parse_from_rfc3339(&settings.epoch)
            .map_err(|source| ConfigError::InvalidEpoch {
                value: settings.epoch.clone(),
                source,
            })?
            .with_timezone(&Utc);

        if epoch.num_seconds_from_midnight() != 0 || epoch.nanosecond() != 0 {
            return Err(ConfigError::EpochNotMidnight(epoch));
        }
        if settings.allowed_lateness_secs < 0 {
            return Err(ConfigError::NegativeLateness(settings.allowed_lateness_secs));
        }
        let allowed_lateness = Duration::try_seconds(settings.allowed_lateness_secs)
            .ok_or(ConfigError::LatenessOutOfRange(settings.allowed_lateness_secs))?;
        if settings.max_open_buckets == 0 {
            return Err(ConfigError::Zero("window.max_open_buckets"));
        }

        Ok(WindowConfig {
            epoch,
            allowed_lateness,
            max_open_buckets: settings.max_open_buckets,
        })
    }
}
