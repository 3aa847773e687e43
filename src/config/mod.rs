use crate::utils::error::{PoolError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub health: HealthCheckSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Age after which a connection is no longer handed out (milliseconds)
    #[serde(default = "default_expire_after_ms")]
    pub expire_after_ms: u64,
    /// Maximum live connections per destination
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Budget for establishing a new connection (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Ask the factory for multiplexed connections
    #[serde(default)]
    pub multiplexed: bool,
    #[serde(default)]
    pub overrides: Vec<DestinationOverride>,
}

/// Per-destination replacement for the pool defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationOverride {
    pub uri: String,
    #[serde(default)]
    pub pool_size: Option<usize>,
    #[serde(default)]
    pub expire_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSettings {
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,
    /// How long `stop()` waits for an in-flight sweep before aborting it
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String, // "json" or "pretty"
}

// Default values
fn default_expire_after_ms() -> u64 {
    60_000
}

fn default_pool_size() -> usize {
    8
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_health_enabled() -> bool {
    true
}

fn default_health_interval_ms() -> u64 {
    30_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            expire_after_ms: default_expire_after_ms(),
            pool_size: default_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            multiplexed: false,
            overrides: Vec::new(),
        }
    }
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            interval_ms: default_health_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl PoolSettings {
    pub fn expire_after(&self) -> Duration {
        Duration::from_millis(self.expire_after_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Effective `(pool_size, expire_after)` for a destination.
    pub fn for_uri(&self, uri: &str) -> (usize, Duration) {
        match self.overrides.iter().find(|o| o.uri == uri) {
            Some(o) => (
                o.pool_size.unwrap_or(self.pool_size),
                Duration::from_millis(o.expire_after_ms.unwrap_or(self.expire_after_ms)),
            ),
            None => (self.pool_size, self.expire_after()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(PoolError::Config(
                "pool.pool_size must be greater than 0".to_string(),
            ));
        }
        if self.expire_after_ms == 0 {
            return Err(PoolError::Config(
                "pool.expire_after_ms must be greater than 0".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(PoolError::Config(
                "pool.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        for o in &self.overrides {
            if o.uri.trim().is_empty() {
                return Err(PoolError::Config(
                    "pool override uri cannot be empty".to_string(),
                ));
            }
            if o.pool_size == Some(0) || o.expire_after_ms == Some(0) {
                return Err(PoolError::Config(format!(
                    "pool override for {} must use positive values",
                    o.uri
                )));
            }
        }

        Ok(())
    }
}

impl HealthCheckSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| PoolError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;

        if self.health.enabled && self.health.interval_ms == 0 {
            return Err(PoolError::Config(
                "health.interval_ms must be greater than 0 when enabled".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(PoolError::Config(format!(
                "Invalid log format: {}. Must be 'pretty' or 'json'",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example<P: AsRef<Path>>(path: P) -> Result<()> {
        let example = r#"[pool]
expire_after_ms = 60000
pool_size = 8
connect_timeout_ms = 5000
multiplexed = false

# Per-destination overrides:
# [[pool.overrides]]
# uri = "tcp://db.internal:5432"
# pool_size = 32
# expire_after_ms = 300000

[health]
enabled = true
interval_ms = 30000
shutdown_timeout_ms = 5000

[logging]
level = "info"  # Options: "trace", "debug", "info", "warn", "error"
format = "pretty"  # Options: "pretty", "json"
"#;

        std::fs::write(path.as_ref(), example)?;

        Ok(())
    }
}
