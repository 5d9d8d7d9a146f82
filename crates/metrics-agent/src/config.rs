// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryOptions;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Growth factor between consecutive retry delays.
pub const RETRY_MULTIPLIER: f64 = 2.0;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {var}")]
    Unparsable { var: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Agent settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Collector base URL
    pub address: String,
    /// Period between collection rounds
    pub poll_interval: Duration,
    /// Period between delivery rounds
    pub report_interval: Duration,
    /// Maximum metrics per request
    pub batch_size: usize,
    pub queue_capacity: usize,
    /// Maximum concurrent deliveries
    pub rate_limit: u32,
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Deadline for a single delivery attempt
    pub send_timeout: Duration,
    /// Deadline for the final drain
    pub shutdown_timeout: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "http://localhost:8080".to_string(),
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            batch_size: 20,
            queue_capacity: 1000,
            rate_limit: 2,
            retry_attempts: 4,
            retry_base_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_millis(5000),
            send_timeout: Duration::from_millis(5000),
            shutdown_timeout: Duration::from_secs(10),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Builds the configuration from any variable source, falling back to defaults for
    /// unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |var, default: Duration| {
            parse_var::<u64, _>(&lookup, var).map(|v| v.map_or(default, Duration::from_secs))
        };
        let millis = |var, default: Duration| {
            parse_var::<u64, _>(&lookup, var).map(|v| v.map_or(default, Duration::from_millis))
        };

        let config = Self {
            address: lookup("ADDRESS").unwrap_or(defaults.address),
            poll_interval: secs("POLL_INTERVAL", defaults.poll_interval)?,
            report_interval: secs("REPORT_INTERVAL", defaults.report_interval)?,
            batch_size: parse_var(&lookup, "BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            queue_capacity: parse_var(&lookup, "QUEUE_CAPACITY")?
                .unwrap_or(defaults.queue_capacity),
            rate_limit: parse_var(&lookup, "RATE_LIMIT")?.unwrap_or(defaults.rate_limit),
            retry_attempts: parse_var(&lookup, "RETRY_ATTEMPTS")?
                .unwrap_or(defaults.retry_attempts),
            retry_base_delay: millis("RETRY_BASE_DELAY_MS", defaults.retry_base_delay)?,
            retry_max_delay: millis("RETRY_MAX_DELAY_MS", defaults.retry_max_delay)?,
            send_timeout: millis("SEND_TIMEOUT_MS", defaults.send_timeout)?,
            shutdown_timeout: secs("SHUTDOWN_TIMEOUT", defaults.shutdown_timeout)?,
            log_level: lookup("LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("ADDRESS cannot be empty".to_string()));
        }
        if self.poll_interval.is_zero() || self.report_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll and report intervals must be greater than 0".to_string(),
            ));
        }
        if self.batch_size == 0 || self.queue_capacity == 0 || self.rate_limit == 0 {
            return Err(ConfigError::Invalid(
                "BATCH_SIZE, QUEUE_CAPACITY and RATE_LIMIT must be greater than 0".to_string(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "RETRY_ATTEMPTS must be greater than 0".to_string(),
            ));
        }
        if self.retry_max_delay < self.retry_base_delay {
            return Err(ConfigError::Invalid(format!(
                "RETRY_MAX_DELAY_MS ({:?}) is shorter than RETRY_BASE_DELAY_MS ({:?})",
                self.retry_max_delay, self.retry_base_delay
            )));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        Ok(())
    }

    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            attempts: self.retry_attempts,
            multiplier: RETRY_MULTIPLIER,
        }
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Unparsable { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.address, "http://localhost:8080");
        assert_eq!(config.batch_size, 20);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("ADDRESS", "http://collector:9000"),
            ("POLL_INTERVAL", "1"),
            ("REPORT_INTERVAL", "3"),
            ("RATE_LIMIT", "8"),
            ("RETRY_BASE_DELAY_MS", "250"),
            ("LOG_LEVEL", "DEBUG"),
        ]))
        .unwrap();
        assert_eq!(config.address, "http://collector:9000");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.report_interval, Duration::from_secs(3));
        assert_eq!(config.rate_limit, 8);
        assert_eq!(config.retry_base_delay, Duration::from_millis(250));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_unparsable_value() {
        assert_eq!(
            Config::from_lookup(lookup(&[("BATCH_SIZE", "lots")])).unwrap_err(),
            ConfigError::Unparsable {
                var: "BATCH_SIZE",
                value: "lots".to_string()
            }
        );
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        for config in [
            Config {
                rate_limit: 0,
                ..Default::default()
            },
            Config {
                poll_interval: Duration::ZERO,
                ..Default::default()
            },
            Config {
                retry_attempts: 0,
                ..Default::default()
            },
            Config {
                address: "  ".to_string(),
                ..Default::default()
            },
        ] {
            assert!(config.validate().is_err(), "{config:?} should be invalid");
        }
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = Config {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_options() {
        let options = Config::default().retry_options();
        assert_eq!(options.attempts, 4);
        assert_eq!(options.base_delay, Duration::from_secs(1));
        assert_eq!(options.max_delay, Duration::from_secs(5));
    }
}
