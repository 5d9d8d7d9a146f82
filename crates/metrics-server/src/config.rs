// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {var}")]
    Unparsable { var: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Collector settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address, `host:port`
    pub address: String,
    /// Period between snapshot dumps. Zero dumps after every write.
    pub store_interval: Duration,
    /// Snapshot file. `None` disables the dump decorator.
    pub file_storage_path: Option<PathBuf>,
    /// Load the snapshot file at startup
    pub restore: bool,
    /// Relational backend DSN. Takes precedence over the snapshot file.
    pub database_dsn: Option<String>,
    pub log_level: String,
    /// Idle time before an unused per-metric lock is evicted
    pub lock_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            store_interval: Duration::from_secs(300),
            file_storage_path: None,
            restore: true,
            database_dsn: None,
            log_level: "info".to_string(),
            lock_ttl: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |var: &str| lookup(var).filter(|val| !val.trim().is_empty());

        let config = Self {
            address: lookup("ADDRESS").unwrap_or(defaults.address),
            store_interval: parse_secs(&lookup, "STORE_INTERVAL")?
                .unwrap_or(defaults.store_interval),
            file_storage_path: non_empty("FILE_STORAGE_PATH").map(PathBuf::from),
            restore: lookup("RESTORE")
                .map(|val| val.trim().to_lowercase() != "false")
                .unwrap_or(defaults.restore),
            database_dsn: non_empty("DATABASE_DSN"),
            log_level: lookup("LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
            lock_ttl: parse_secs(&lookup, "LOCK_TTL")?.unwrap_or(defaults.lock_ttl),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.lock_ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "LOCK_TTL must be greater than 0".to_string(),
            ));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.address
            .trim()
            .parse()
            .map_err(|_| ConfigError::Unparsable {
                var: "ADDRESS",
                value: self.address.clone(),
            })
    }
}

fn parse_secs<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ConfigError::Unparsable { var, value }),
    }
}
