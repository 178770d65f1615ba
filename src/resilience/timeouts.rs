//! Deadline enforcement.
//!
//! # Responsibilities
//! - Bound an entire operation (all retries and backoff) by one budget
//! - Record one history entry per guarded operation
//! - Warn when a successful operation used most of its budget
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the countdown starts when the guarded
//!   future is first polled
//! - `with_deadline` drops the operation on expiry, which releases whatever
//!   it holds (pool slot, dedup entry, half-open probe)
//! - `with_deadline_detached` spawns the operation so it keeps running after
//!   the caller has been told it timed out
//! - Timeout errors are distinct from other errors

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::DeadlineConfig;
use crate::error::FetchError;
use crate::observability::metrics;

/// Outcome of one guarded operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
    pub label: String,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub timed_out: bool,
}

/// Aggregate deadline metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeadlineMetrics {
    pub total_operations: u64,
    pub successful: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Successful operations that used more than the warning share of their budget.
    pub slow: u64,
    pub average_duration_ms: f64,
}

#[derive(Debug, Default)]
struct GuardState {
    history: VecDeque<OperationRecord>,
    metrics: DeadlineMetrics,
    total_duration_ms: u64,
}

/// Wraps operations with a hard wall-clock budget.
#[derive(Debug)]
pub struct DeadlineGuard {
    slow_warning_ratio: f64,
    history_capacity: usize,
    state: Mutex<GuardState>,
}

impl DeadlineGuard {
    pub fn new(config: &DeadlineConfig) -> Self {
        Self {
            slow_warning_ratio: config.slow_warning_ratio,
            history_capacity: config.history_capacity,
            state: Mutex::new(GuardState::default()),
        }
    }

    /// Run `operation`, failing with `DeadlineExceeded` if it has not
    /// settled within `timeout`. The operation is dropped on expiry.
    pub async fn with_deadline<T, Fut>(
        &self,
        operation: Fut,
        timeout: Duration,
        label: &str,
    ) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, operation).await;
        self.settle(outcome, started, timeout, label)
    }

    /// Like [`with_deadline`](Self::with_deadline), but the operation runs on
    /// its own task and is left running when the deadline fires.
    pub async fn with_deadline_detached<T, Fut>(
        &self,
        operation: Fut,
        timeout: Duration,
        label: &str,
    ) -> Result<T, FetchError>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let started = Instant::now();
        let handle = tokio::spawn(operation);
        let outcome = tokio::time::timeout(timeout, handle)
            .await
            .map(|joined| joined.unwrap_or_else(|e| Err(FetchError::Internal(e.to_string()))));
        self.settle(outcome, started, timeout, label)
    }

    fn settle<T>(
        &self,
        outcome: Result<Result<T, FetchError>, tokio::time::error::Elapsed>,
        started: Instant,
        timeout: Duration,
        label: &str,
    ) -> Result<T, FetchError> {
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation = label,
                    timeout_ms = timeout.as_millis() as u64,
                    "Operation exceeded deadline"
                );
                Err(FetchError::DeadlineExceeded {
                    label: label.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        };

        let slow = result.is_ok() && elapsed.as_secs_f64() > timeout.as_secs_f64() * self.slow_warning_ratio;
        if slow {
            tracing::warn!(
                operation = label,
                duration_ms = elapsed.as_millis() as u64,
                timeout_ms = timeout.as_millis() as u64,
                "Operation close to deadline"
            );
        }

        self.record(
            OperationRecord {
                label: label.to_string(),
                duration_ms: elapsed.as_millis() as u64,
                success: result.is_ok(),
                error: result.as_ref().err().map(ToString::to_string),
                timed_out: matches!(&result, Err(e) if e.is_deadline_exceeded()),
            },
            slow,
        );
        metrics::record_deadline(
            matches!(&result, Err(e) if e.is_deadline_exceeded()),
            elapsed,
        );

        result
    }

    fn record(&self, record: OperationRecord, slow: bool) {
        let mut state = self.state.lock();

        state.metrics.total_operations += 1;
        if record.success {
            state.metrics.successful += 1;
        } else {
            state.metrics.failed += 1;
        }
        if record.timed_out {
            state.metrics.timed_out += 1;
        }
        if slow {
            state.metrics.slow += 1;
        }
        state.total_duration_ms += record.duration_ms;
        state.metrics.average_duration_ms =
            state.total_duration_ms as f64 / state.metrics.total_operations as f64;

        if self.history_capacity == 0 {
            return;
        }
        if state.history.len() == self.history_capacity {
            state.history.pop_front();
        }
        state.history.push_back(record);
    }

    pub fn metrics(&self) -> DeadlineMetrics {
        self.state.lock().metrics.clone()
    }

    /// Up to `limit` most recent records, oldest first.
    pub fn recent_operations(&self, limit: usize) -> Vec<OperationRecord> {
        let state = self.state.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn reset(&self) {
        *self.state.lock() = GuardState::default();
    }
}
