//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::FetchConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "FETCH_";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: '{value}'")]
    Env { key: String, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a TOML file, apply `FETCH_*` environment overrides and validate.
pub fn load_config(path: &Path) -> Result<FetchConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: FetchConfig = toml::from_str(&content)?;
    finish(config, std::env::vars())
}

/// Build a configuration from defaults plus `FETCH_*` environment overrides.
pub fn load_from_env() -> Result<FetchConfig, ConfigError> {
    finish(FetchConfig::default(), std::env::vars())
}

fn finish<I>(mut config: FetchConfig, vars: I) -> Result<FetchConfig, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    apply_env_overrides(&mut config, vars)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply environment-style key/value overrides onto a configuration.
///
/// Keys without the `FETCH_` prefix, and unknown keys, are ignored.
/// Malformed values are reported rather than skipped.
pub fn apply_env_overrides<I>(config: &mut FetchConfig, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };

        match name {
            "PROFILE" => config.profile = parse(&key, &value)?,
            "MAX_ATTEMPTS" => config.retry.max_attempts = parse(&key, &value)?,
            "BASE_DELAY_MS" => config.retry.base_delay_ms = parse(&key, &value)?,
            "MAX_DELAY_MS" => config.retry.max_delay_ms = parse(&key, &value)?,
            "BACKOFF_MULTIPLIER" => config.retry.backoff_multiplier = parse(&key, &value)?,
            "JITTER_ENABLED" => config.retry.jitter_enabled = parse(&key, &value)?,
            "JITTER_RANGE" => config.retry.jitter_range = parse(&key, &value)?,
            "RETRYABLE_STATUS_CODES" => {
                config.retry.retryable_status_codes = parse_list(&key, &value)?
            }
            "RETRYABLE_ERROR_CODES" => {
                config.retry.retryable_error_codes = parse_list(&key, &value)?
            }
            "FAILURE_THRESHOLD" => {
                config.circuit_breaker.failure_threshold = parse(&key, &value)?
            }
            "RECOVERY_TIMEOUT_MS" => {
                config.circuit_breaker.recovery_timeout_ms = parse(&key, &value)?
            }
            "MONITORING_WINDOW_MS" => {
                config.circuit_breaker.monitoring_window_ms = parse(&key, &value)?
            }
            "MINIMUM_REQUESTS" => config.circuit_breaker.minimum_requests = parse(&key, &value)?,
            "MAX_CONNECTIONS" => config.pool.max_connections = parse(&key, &value)?,
            "API_TIMEOUT_MS" => config.deadline.api_timeout_ms = Some(parse(&key, &value)?),
            "LOG_LEVEL" => config.observability.log_level = value.trim().to_string(),
            _ => {
                tracing::debug!(key = %key, "Ignoring unknown override");
            }
        }
    }
    Ok(())
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_list<T: FromStr>(key: &str, value: &str) -> Result<Vec<T>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse(key, item))
        .collect()
}
