//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the fetch
//! pipeline. All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the fetch pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FetchConfig {
    /// Deployment profile; tunes defaults that differ per environment.
    pub profile: Profile,

    /// Retry configuration.
    pub retry: RetryConfig,

    /// Per-endpoint circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Connection pool (admission control).
    pub pool: PoolConfig,

    /// Request deduplication and short-lived success cache.
    pub dedup: DedupConfig,

    /// Deadline guard settings.
    pub deadline: DeadlineConfig,

    /// Outbound HTTP client settings.
    pub transport: TransportConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl FetchConfig {
    /// Deadline budget for one logical fetch, resolving the profile default
    /// when no explicit value was configured.
    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(
            self.deadline
                .api_timeout_ms
                .unwrap_or_else(|| self.profile.default_api_timeout_ms()),
        )
    }
}

/// Deployment profile.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Development,
    #[default]
    Production,
    Test,
}

impl Profile {
    /// Deadline budget used when `deadline.api_timeout_ms` is unset.
    pub fn default_api_timeout_ms(self) -> u64 {
        match self {
            Profile::Development => 15_000,
            Profile::Production => 10_000,
            Profile::Test => 5_000,
        }
    }
}

impl std::str::FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Profile::Development),
            "production" | "prod" => Ok(Profile::Production),
            "test" => Ok(Profile::Test),
            other => Err(format!("unknown profile '{}'", other)),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per logical call (first try included).
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,

    /// Randomize delays to avoid synchronized retries.
    pub jitter_enabled: bool,

    /// Jitter amplitude as a fraction of the delay (0.1 = ±10%).
    pub jitter_range: f64,

    /// HTTP statuses treated as transient.
    pub retryable_status_codes: Vec<u16>,

    /// Network error codes treated as transient.
    pub retryable_error_codes: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_enabled: true,
            jitter_range: 0.1,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
            retryable_error_codes: vec![
                "ECONNRESET".to_string(),
                "ENOTFOUND".to_string(),
                "ECONNREFUSED".to_string(),
                "ETIMEDOUT".to_string(),
            ],
        }
    }
}

/// How requests are grouped into circuit breaker endpoints.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKey {
    /// One breaker per full target URL.
    #[default]
    Url,
    /// One breaker per scheme + host + port.
    Origin,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within one window before the circuit opens.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a probe is allowed, in milliseconds.
    pub recovery_timeout_ms: u64,

    /// Counters reset when this much time has passed since the window started.
    pub monitoring_window_ms: u64,

    /// Requests required in the window before the failure threshold applies.
    pub minimum_requests: u32,

    /// Endpoint grouping.
    pub key_by: EndpointKey,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            monitoring_window_ms: 300_000,
            minimum_requests: 10,
            key_by: EndpointKey::Url,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent outbound calls (backpressure).
    pub max_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_connections: 10 }
    }
}

/// Request deduplication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Coalesce concurrent identical requests.
    pub enabled: bool,

    /// Serve recent successes from memory.
    pub cache_enabled: bool,

    /// Lifetime of a cached success in milliseconds.
    pub cache_ttl_ms: u64,

    /// Upper bound on cached entries.
    pub max_cache_entries: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_enabled: true,
            cache_ttl_ms: 5_000,
            max_cache_entries: 1_000,
        }
    }
}

/// What happens to the wrapped work when a deadline fires.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryPolicy {
    /// Drop the work; pool slots and in-flight entries are released at once.
    #[default]
    Cancel,
    /// Detach the work and let it run to completion in the background.
    Abandon,
}

/// Deadline guard configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeadlineConfig {
    /// Budget for one logical fetch (all attempts and backoff) in milliseconds.
    /// Falls back to the profile default when unset.
    pub api_timeout_ms: Option<u64>,

    /// Successful operations slower than this fraction of the budget are logged.
    pub slow_warning_ratio: f64,

    /// Expiry behaviour.
    pub on_expiry: ExpiryPolicy,

    /// Number of operation records kept for inspection.
    pub history_capacity: usize,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            api_timeout_ms: None,
            slow_warning_ratio: 0.8,
            on_expiry: ExpiryPolicy::Cancel,
            history_capacity: 1_000,
        }
    }
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// User-Agent header sent with every request.
    pub user_agent: String,

    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Idle pooled connections kept per host by the HTTP client.
    pub pool_max_idle_per_host: usize,

    /// Honour HTTP(S)_PROXY and related environment variables.
    pub use_system_proxy: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("resilient-fetch/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout_ms: 5_000,
            pool_max_idle_per_host: 8,
            use_system_proxy: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = FetchConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.retry.retryable_status_codes, vec![408, 429, 500, 502, 503, 504]);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.minimum_requests, 10);
        assert_eq!(config.api_timeout(), Duration::from_millis(10_000));
    }

    #[test]
    fn test_profile_tunes_api_timeout() {
        let mut config = FetchConfig {
            profile: Profile::Test,
            ..Default::default()
        };
        assert_eq!(config.api_timeout(), Duration::from_millis(5_000));

        config.deadline.api_timeout_ms = Some(1234);
        assert_eq!(config.api_timeout(), Duration::from_millis(1234));
    }

    #[test]
    fn test_partial_toml() {
        let config: FetchConfig = toml::from_str(
            r#"
            profile = "development"

            [retry]
            max_attempts = 5

            [circuit_breaker]
            key_by = "origin"
            "#,
        )
        .unwrap();
        assert_eq!(config.profile, Profile::Development);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.circuit_breaker.key_by, EndpointKey::Origin);
        assert_eq!(config.pool.max_connections, 10);
    }
}
