//! Retry logic.
//!
//! # Responsibilities
//! - Classify failures as retryable or fatal
//! - Execute retries with exponential backoff + jitter
//! - Consult and feed the per-endpoint circuit breaker around every attempt
//! - Aggregate retry metrics across logical calls
//!
//! # Design Decisions
//! - Every failed attempt counts against the breaker, fatal ones included
//! - A circuit-open rejection is not an attempt and is never retried
//! - Breakers are created lazily per endpoint and live until `reset`

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{CircuitBreakerConfig, RetryConfig};
use crate::error::FetchError;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot};

/// Message fragments that mark a failure as transient.
const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "service unavailable",
    "too many requests",
];

/// Check if an error is worth another attempt.
pub fn is_retryable(error: &FetchError, config: &RetryConfig) -> bool {
    match error {
        FetchError::Http { status, .. } => config.retryable_status_codes.contains(status),
        FetchError::Network { code, message } => {
            let code_listed = code
                .as_deref()
                .is_some_and(|c| config.retryable_error_codes.iter().any(|listed| listed == c));
            code_listed || matches_transient(message)
        }
        FetchError::CircuitOpen { .. }
        | FetchError::DeadlineExceeded { .. }
        | FetchError::ShuttingDown { .. }
        | FetchError::Decode { .. }
        | FetchError::InvalidRequest(_)
        | FetchError::Internal(_) => false,
    }
}

fn matches_transient(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| message.contains(p))
}

/// One attempt within a logical call.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    /// Backoff slept before this attempt.
    pub delay: Duration,
    pub error: Option<FetchError>,
    pub timestamp: SystemTime,
    pub success: bool,
}

/// Aggregate retry metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryMetrics {
    /// Logical calls that went through the retry manager.
    pub total_operations: u64,
    /// Network attempts across all calls.
    pub total_attempts: u64,
    /// Calls that succeeded after at least one retry.
    pub successful_retries: u64,
    /// Calls that failed after exhausting every attempt.
    pub failed_retries: u64,
    /// Calls rejected because the endpoint's circuit was open.
    pub circuit_breaker_trips: u64,
    pub average_retry_count: f64,
    pub average_delay_ms: f64,
}

#[derive(Debug, Default)]
struct MetricsState {
    metrics: RetryMetrics,
    total_retries: u64,
    total_delay_ms: u64,
    delay_count: u64,
}

enum Outcome {
    Succeeded,
    Fatal,
    Exhausted,
    Rejected,
}

/// Retries operations against endpoints guarded by circuit breakers.
pub struct RetryManager {
    config: RetryConfig,
    breaker_config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    metrics: Mutex<MetricsState>,
}

impl RetryManager {
    pub fn new(config: RetryConfig, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breaker_config,
            breakers: DashMap::new(),
            metrics: Mutex::new(MetricsState::default()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Breaker for an endpoint, created on first use.
    pub fn breaker(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(endpoint) {
            return existing.clone();
        }
        self.breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(endpoint, &self.breaker_config)))
            .clone()
    }

    /// Run `operation` until it succeeds, fails fatally, runs out of
    /// attempts, or the endpoint's circuit refuses it.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        endpoint: &str,
        label: &str,
        mut operation: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let breaker = self.breaker(endpoint);
        let max_attempts = self.config.max_attempts.max(1);
        let mut history: Vec<RetryAttempt> = Vec::with_capacity(max_attempts as usize);
        let mut delay = Duration::ZERO;
        let mut attempt = 0;

        loop {
            attempt += 1;

            if !breaker.can_execute() {
                warn!(operation = label, endpoint, attempt, "Circuit open, rejecting request");
                metrics::record_circuit_rejection(endpoint);
                self.finish(&history, Outcome::Rejected);
                return Err(FetchError::CircuitOpen {
                    endpoint: endpoint.to_string(),
                });
            }

            match operation().await {
                Ok(value) => {
                    breaker.record_success();
                    history.push(RetryAttempt {
                        attempt_number: attempt,
                        delay,
                        error: None,
                        timestamp: SystemTime::now(),
                        success: true,
                    });
                    metrics::record_retry_attempt("success");
                    if attempt > 1 {
                        info!(operation = label, endpoint, attempts = attempt, "Succeeded after retry");
                    }
                    self.finish(&history, Outcome::Succeeded);
                    return Ok(value);
                }
                Err(error) => {
                    breaker.record_failure();
                    history.push(RetryAttempt {
                        attempt_number: attempt,
                        delay,
                        error: Some(error.clone()),
                        timestamp: SystemTime::now(),
                        success: false,
                    });
                    metrics::record_retry_attempt("failure");

                    if !is_retryable(&error, &self.config) {
                        debug!(operation = label, endpoint, attempt, error = %error, "Non-retryable error");
                        self.finish(&history, Outcome::Fatal);
                        return Err(error);
                    }

                    if attempt >= max_attempts {
                        warn!(
                            operation = label,
                            endpoint,
                            attempts = attempt,
                            error = %error,
                            "Max retry attempts reached"
                        );
                        self.finish(&history, Outcome::Exhausted);
                        return Err(error);
                    }

                    delay = calculate_backoff(attempt, &self.config);
                    info!(
                        operation = label,
                        endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn finish(&self, history: &[RetryAttempt], outcome: Outcome) {
        let attempts = history.len() as u64;
        let mut state = self.metrics.lock();

        state.metrics.total_operations += 1;
        state.metrics.total_attempts += attempts;
        state.total_retries += attempts.saturating_sub(1);
        for attempt in history.iter().filter(|a| a.attempt_number > 1) {
            state.total_delay_ms += attempt.delay.as_millis() as u64;
            state.delay_count += 1;
        }

        match outcome {
            Outcome::Succeeded if attempts > 1 => state.metrics.successful_retries += 1,
            Outcome::Exhausted => state.metrics.failed_retries += 1,
            Outcome::Rejected => state.metrics.circuit_breaker_trips += 1,
            Outcome::Succeeded | Outcome::Fatal => {}
        }

        state.metrics.average_retry_count =
            state.total_retries as f64 / state.metrics.total_operations as f64;
        state.metrics.average_delay_ms = if state.delay_count == 0 {
            0.0
        } else {
            state.total_delay_ms as f64 / state.delay_count as f64
        };
    }

    pub fn metrics(&self) -> RetryMetrics {
        self.metrics.lock().metrics.clone()
    }

    /// Snapshots of every known breaker, sorted by endpoint.
    pub fn breaker_snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        snapshots
    }

    /// Forget all breakers and zero the metrics.
    pub fn reset(&self) {
        self.breakers.clear();
        *self.metrics.lock() = MetricsState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manager(max_attempts: u32) -> RetryManager {
        RetryManager::new(
            RetryConfig {
                max_attempts,
                base_delay_ms: 100,
                max_delay_ms: 1_000,
                jitter_enabled: false,
                ..Default::default()
            },
            CircuitBreakerConfig {
                failure_threshold: 5,
                minimum_requests: 5,
                ..Default::default()
            },
        )
    }

    fn http(status: u16) -> FetchError {
        FetchError::Http {
            status,
            url: "http://api/".into(),
            body: String::new(),
        }
    }

    #[test]
    fn test_classification() {
        let config = RetryConfig::default();
        assert!(is_retryable(&http(503), &config));
        assert!(is_retryable(&http(429), &config));
        assert!(!is_retryable(&http(404), &config));
        assert!(!is_retryable(&http(400), &config));

        let reset = FetchError::Network {
            code: Some("ECONNRESET".into()),
            message: "boom".into(),
        };
        assert!(is_retryable(&reset, &config));

        let by_message = FetchError::Network {
            code: None,
            message: "operation Timed Out while reading".into(),
        };
        assert!(is_retryable(&by_message, &config));

        let unknown = FetchError::Network {
            code: Some("EPROTO".into()),
            message: "protocol error".into(),
        };
        assert!(!is_retryable(&unknown, &config));
        assert!(!is_retryable(
            &FetchError::CircuitOpen { endpoint: "x".into() },
            &config
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let manager = manager(3);
        let calls = AtomicU32::new(0);

        let result = manager
            .execute_with_retry("http://api/", "test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(http(503))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let metrics = manager.metrics();
        assert_eq!(metrics.total_attempts, 3);
        assert_eq!(metrics.successful_retries, 1);
        assert_eq!(metrics.average_retry_count, 2.0);
        assert_eq!(metrics.average_delay_ms, 150.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let manager = manager(3);
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<(), _> = manager
            .execute_with_retry("http://api/", "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(http(502)) }
            })
            .await;

        assert_eq!(result, Err(http(502)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff between the three attempts.
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert_eq!(manager.metrics().failed_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_after_one_attempt() {
        let manager = manager(5);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = manager
            .execute_with_retry("http://api/", "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(http(404)) }
            })
            .await;

        assert_eq!(result, Err(http(404)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Fatal failures still count against the breaker.
        assert_eq!(manager.breaker("http://api/").snapshot().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_rejects_without_calling() {
        let manager = manager(3);
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let _: Result<(), _> = manager
                .execute_with_retry("http://api/", "test", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(http(503)) }
                })
                .await;
        }
        // Trips on the fifth failure; the sixth attempt is refused.
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(manager.breaker("http://api/").state(), CircuitState::Open);

        let result: Result<(), _> = manager
            .execute_with_retry("http://api/", "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(manager.metrics().circuit_breaker_trips, 2);

        // Other endpoints are unaffected.
        let other = manager
            .execute_with_retry("http://other/", "test", || async { Ok(1) })
            .await;
        assert_eq!(other, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_breakers_and_metrics() {
        let manager = manager(1);
        let _: Result<(), _> = manager
            .execute_with_retry("http://api/", "test", || async { Err(http(500)) })
            .await;
        assert_eq!(manager.breaker_snapshots().len(), 1);

        manager.reset();
        assert!(manager.breaker_snapshots().is_empty());
        assert_eq!(manager.metrics().total_operations, 0);
    }
}
