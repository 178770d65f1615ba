//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (attempts > 0, delays ordered, ratios in range)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FetchConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::FetchConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a configuration, collecting every violation.
pub fn validate_config(config: &FetchConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        errors.push(ValidationError::new("retry.max_attempts", "must be at least 1"));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.base_delay_ms",
            format!(
                "base delay {}ms exceeds max delay {}ms",
                retry.base_delay_ms, retry.max_delay_ms
            ),
        ));
    }
    if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
        errors.push(ValidationError::new(
            "retry.backoff_multiplier",
            "must be a finite number >= 1",
        ));
    }
    if !(0.0..=1.0).contains(&retry.jitter_range) {
        errors.push(ValidationError::new(
            "retry.jitter_range",
            "must be between 0 and 1",
        ));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be at least 1",
        ));
    }
    if breaker.recovery_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.recovery_timeout_ms",
            "must be greater than 0",
        ));
    }
    if breaker.monitoring_window_ms == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.monitoring_window_ms",
            "must be greater than 0",
        ));
    }

    if config.pool.max_connections == 0 {
        errors.push(ValidationError::new("pool.max_connections", "must be at least 1"));
    }

    if config.dedup.cache_enabled && config.dedup.cache_ttl_ms == 0 {
        errors.push(ValidationError::new(
            "dedup.cache_ttl_ms",
            "must be greater than 0 when the cache is enabled",
        ));
    }

    let deadline = &config.deadline;
    if deadline.api_timeout_ms == Some(0) {
        errors.push(ValidationError::new(
            "deadline.api_timeout_ms",
            "must be greater than 0",
        ));
    }
    if !(deadline.slow_warning_ratio > 0.0 && deadline.slow_warning_ratio <= 1.0) {
        errors.push(ValidationError::new(
            "deadline.slow_warning_ratio",
            "must be in (0, 1]",
        ));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&FetchConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = FetchConfig::default();
        config.retry.max_attempts = 0;
        config.retry.base_delay_ms = 10_000;
        config.retry.max_delay_ms = 100;
        config.retry.jitter_range = 1.5;
        config.pool.max_connections = 0;
        config.deadline.slow_warning_ratio = 0.0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "retry.max_attempts",
                "retry.base_delay_ms",
                "retry.jitter_range",
                "pool.max_connections",
                "deadline.slow_warning_ratio",
            ]
        );
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = FetchConfig::default();
        config.observability.metrics_address = "not-an-address".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "observability.metrics_address");
    }
}
