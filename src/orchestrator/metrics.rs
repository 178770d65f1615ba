//! Aggregate metric snapshots.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::dedup::DedupMetrics;
use crate::error::FetchError;
use crate::observability::metrics;
use crate::pool::PoolMetrics;
use crate::resilience::{CircuitBreakerSnapshot, DeadlineMetrics, OperationRecord, RetryMetrics};

/// Outcomes of logical fetches.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub fallbacks_used: u64,
    pub circuit_open_failures: u64,
    pub deadline_exceeded: u64,
    pub average_response_time_ms: f64,
}

/// Summary across every component.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineMetrics {
    pub fetch: FetchMetrics,
    pub pool: PoolMetrics,
    pub dedup: DedupMetrics,
    pub retry: RetryMetrics,
    pub deadline: DeadlineMetrics,
    /// Active slots as a percentage of `max_connections`.
    pub connection_pool_utilization: f64,
    /// Cache hits as a percentage of deduplicated requests.
    pub cache_hit_rate: f64,
}

impl PipelineMetrics {
    pub(crate) fn new(
        fetch: FetchMetrics,
        pool: PoolMetrics,
        dedup: DedupMetrics,
        retry: RetryMetrics,
        deadline: DeadlineMetrics,
    ) -> Self {
        let connection_pool_utilization = percentage(
            pool.active_connections as f64,
            pool.max_connections as f64,
        );
        let cache_hit_rate = percentage(dedup.cache_hits as f64, dedup.total_requests as f64);
        Self {
            fetch,
            pool,
            dedup,
            retry,
            deadline,
            connection_pool_utilization,
            cache_hit_rate,
        }
    }
}

/// Summary plus per-endpoint breaker state and recent deadline records.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedMetrics {
    pub summary: PipelineMetrics,
    pub circuit_breakers: Vec<CircuitBreakerSnapshot>,
    pub recent_operations: Vec<OperationRecord>,
}

fn percentage(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        0.0
    } else {
        part / whole * 100.0
    }
}

#[derive(Debug, Default)]
struct RecorderState {
    metrics: FetchMetrics,
    total_time_ms: f64,
}

/// Accumulates [`FetchMetrics`].
#[derive(Debug, Default)]
pub(crate) struct FetchRecorder {
    state: Mutex<RecorderState>,
}

impl FetchRecorder {
    pub(crate) fn record<T>(&self, result: &Result<T, FetchError>, elapsed: Duration) {
        let mut state = self.state.lock();
        let counters = &mut state.metrics;

        counters.total_requests += 1;
        match result {
            Ok(_) => counters.successful_requests += 1,
            Err(error) => {
                counters.failed_requests += 1;
                if error.is_circuit_open() {
                    counters.circuit_open_failures += 1;
                }
                if error.is_deadline_exceeded() {
                    counters.deadline_exceeded += 1;
                }
            }
        }

        let total = counters.total_requests as f64;
        state.total_time_ms += elapsed.as_secs_f64() * 1_000.0;
        state.metrics.average_response_time_ms = state.total_time_ms / total;

        let outcome = match result {
            Ok(_) => "success",
            Err(error) => error.kind(),
        };
        metrics::record_fetch(outcome, elapsed);
    }

    pub(crate) fn record_fallback(&self) {
        self.state.lock().metrics.fallbacks_used += 1;
    }

    pub(crate) fn snapshot(&self) -> FetchMetrics {
        self.state.lock().metrics.clone()
    }

    pub(crate) fn reset(&self) {
        *self.state.lock() = RecorderState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_classifies_failures() {
        let recorder = FetchRecorder::default();
        recorder.record(&Ok::<_, FetchError>(()), Duration::from_millis(10));
        recorder.record::<()>(
            &Err(FetchError::CircuitOpen { endpoint: "e".into() }),
            Duration::from_millis(0),
        );
        recorder.record::<()>(
            &Err(FetchError::DeadlineExceeded {
                label: "l".into(),
                timeout_ms: 20,
            }),
            Duration::from_millis(20),
        );

        let metrics = recorder.snapshot();
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.failed_requests, 2);
        assert_eq!(metrics.circuit_open_failures, 1);
        assert_eq!(metrics.deadline_exceeded, 1);
        assert!((metrics.average_response_time_ms - 10.0).abs() < 1e-9);

        recorder.reset();
        assert_eq!(recorder.snapshot().total_requests, 0);
    }

    #[test]
    fn test_percentages_guard_zero() {
        assert_eq!(percentage(1.0, 0.0), 0.0);
        assert_eq!(percentage(1.0, 4.0), 25.0);
    }
}
