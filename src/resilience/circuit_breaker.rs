//! Circuit breaker for endpoint protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: endpoint assumed down, requests fail fast
//! - Half-Open: testing if endpoint recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: requests >= minimum_requests and failures >= threshold within window
//! Open → Half-Open: first check after recovery timeout
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails
//! ```
//!
//! # Design Decisions
//! - Per-endpoint circuit breaker (not global), created lazily by the retry manager
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open; a probe that never reports stops blocking
//!   after another recovery timeout
//! - Counters live in a monitoring window so stale failures age out

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub endpoint: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub request_count: u32,
    /// Milliseconds since the last recorded failure.
    pub last_failure_ms_ago: Option<u64>,
    /// Milliseconds until an open circuit admits a probe.
    pub retry_in_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    request_count: u32,
    last_failure_time: Option<Instant>,
    /// Only set while Open.
    next_attempt_time: Option<Instant>,
    window_start: Instant,
    /// When the current half-open probe was let through.
    probe_started: Option<Instant>,
}

/// Circuit breaker guarding one endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: String,
    failure_threshold: u32,
    minimum_requests: u32,
    recovery_timeout: Duration,
    monitoring_window: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            failure_threshold: config.failure_threshold,
            minimum_requests: config.minimum_requests,
            recovery_timeout: Duration::from_millis(config.recovery_timeout_ms),
            monitoring_window: Duration::from_millis(config.monitoring_window_ms),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                request_count: 0,
                last_failure_time: None,
                next_attempt_time: None,
                window_start: Instant::now(),
                probe_started: None,
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Check if a request may be sent.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// and admits the caller as the probe.
    pub fn can_execute(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let ready = inner.next_attempt_time.map_or(true, |at| now >= at);
                if ready {
                    inner.state = CircuitState::HalfOpen;
                    inner.next_attempt_time = None;
                    inner.probe_started = Some(now);
                    debug!(endpoint = %self.endpoint, "Recovery timeout elapsed, circuit half-open");
                    metrics::record_circuit_state(&self.endpoint, CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                let probe_free = inner
                    .probe_started
                    .map_or(true, |started| now.duration_since(started) >= self.recovery_timeout);
                if probe_free {
                    inner.probe_started = Some(now);
                    debug!(endpoint = %self.endpoint, "Circuit half-open, allowing probe request");
                }
                probe_free
            }
        }
    }

    /// Record a successful request.
    pub fn record_success(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.roll_window(&mut inner, now);

        inner.request_count += 1;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.probe_started = None;
            info!(endpoint = %self.endpoint, "Circuit breaker closed");
            metrics::record_circuit_state(&self.endpoint, CircuitState::Closed);
        }
    }

    /// Record a failed request.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.roll_window(&mut inner, now);

        inner.request_count += 1;
        inner.failure_count += 1;
        inner.last_failure_time = Some(now);

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => {
                inner.request_count >= self.minimum_requests
                    && inner.failure_count >= self.failure_threshold
            }
            CircuitState::Open => false,
        };

        if should_open {
            inner.state = CircuitState::Open;
            inner.next_attempt_time = Some(now + self.recovery_timeout);
            inner.probe_started = None;
            warn!(
                endpoint = %self.endpoint,
                failures = inner.failure_count,
                requests = inner.request_count,
                recovery_ms = self.recovery_timeout.as_millis() as u64,
                "Circuit breaker opened"
            );
            metrics::record_circuit_state(&self.endpoint, CircuitState::Open);
        }
    }

    /// Get current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            endpoint: self.endpoint.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            request_count: inner.request_count,
            last_failure_ms_ago: inner
                .last_failure_time
                .map(|t| now.duration_since(t).as_millis() as u64),
            retry_in_ms: match inner.state {
                CircuitState::Open => inner
                    .next_attempt_time
                    .map(|at| at.saturating_duration_since(now).as_millis() as u64),
                _ => None,
            },
        }
    }

    fn roll_window(&self, inner: &mut BreakerState, now: Instant) {
        if now.duration_since(inner.window_start) > self.monitoring_window {
            inner.failure_count = 0;
            inner.request_count = 0;
            inner.window_start = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, minimum: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            minimum_requests: minimum,
            recovery_timeout_ms: 1_000,
            monitoring_window_ms: 10_000,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_with_minimum_requests() {
        let cb = CircuitBreaker::new("http://api/", &config(3, 5));

        // Three failures but only three requests: below the minimum.
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        // Fifth request, fourth failure: both conditions met.
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_recovery_timeout() {
        let cb = CircuitBreaker::new("http://api/", &config(1, 1));
        cb.record_failure();
        assert!(!cb.can_execute());

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!cb.can_execute());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("http://api/", &config(1, 1));
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_execute());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.retry_in_ms, Some(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_in_half_open() {
        let cb = CircuitBreaker::new("http://api/", &config(1, 1));
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(cb.can_execute());
        assert!(!cb.can_execute(), "second probe must wait");

        // The probe never reported; after another recovery timeout a new one may go.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_resets_counters() {
        let cb = CircuitBreaker::new("http://api/", &config(3, 3));
        cb.record_failure();
        cb.record_failure();

        tokio::time::advance(Duration::from_millis(10_001)).await;
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.request_count, 1);
    }
}
