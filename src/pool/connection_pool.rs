//! Admission-controlled connection pool.
//!
//! # Responsibilities
//! - Bound concurrent outbound calls to `max_connections`
//! - Queue callers by priority when saturated
//! - Release slots when calls settle, whatever the outcome
//! - Reject queued and new callers once shut down
//!
//! # Design Decisions
//! - One coarse mutex over the counters and the queue; every critical
//!   section is a few integer updates
//! - A waiter that is dropped while queued removes itself; one dropped
//!   after being granted a slot hands the slot on

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::FetchError;
use crate::observability::metrics;
use crate::pool::queue::AdmissionQueue;
use crate::pool::Priority;
use crate::transport::{FetchRequest, FetchResponse, Transport};

const COMPONENT: &str = "connection pool";

/// Point-in-time pool metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolMetrics {
    pub active_connections: usize,
    pub max_connections: usize,
    pub queued: usize,
    pub peak_active: usize,
    pub total_admitted: u64,
    pub total_queued: u64,
    pub rejected: u64,
}

#[derive(Debug)]
struct PoolState {
    active: usize,
    queue: AdmissionQueue,
    shutting_down: bool,
    peak_active: usize,
    total_admitted: u64,
    total_queued: u64,
    rejected: u64,
}

struct PoolInner {
    max_connections: usize,
    state: Mutex<PoolState>,
    transport: Arc<dyn Transport>,
}

impl PoolInner {
    /// Return a slot: hand it to the next live waiter or free it.
    fn release(&self) {
        let mut state = self.state.lock();
        while let Some(waiter) = state.queue.pop_next() {
            if waiter.tx.send(()).is_ok() {
                state.total_admitted += 1;
                metrics::record_pool(state.active, state.queue.len());
                return;
            }
        }
        state.active = state.active.saturating_sub(1);
        metrics::record_pool(state.active, state.queue.len());
    }
}

/// Bounds concurrent network calls and orders waiters by priority.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(max_connections: usize, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                max_connections: max_connections.max(1),
                state: Mutex::new(PoolState {
                    active: 0,
                    queue: AdmissionQueue::new(),
                    shutting_down: false,
                    peak_active: 0,
                    total_admitted: 0,
                    total_queued: 0,
                    rejected: 0,
                }),
                transport,
            }),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }

    /// Wait for a slot. The slot is held until the guard is dropped.
    pub async fn acquire(&self, priority: Priority) -> Result<SlotGuard, FetchError> {
        let mut pending = {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                state.rejected += 1;
                return Err(FetchError::ShuttingDown { component: COMPONENT });
            }

            if state.active < self.inner.max_connections && state.queue.is_empty() {
                state.active += 1;
                state.total_admitted += 1;
                state.peak_active = state.peak_active.max(state.active);
                metrics::record_pool(state.active, state.queue.len());
                return Ok(SlotGuard {
                    inner: self.inner.clone(),
                });
            }

            let (tx, rx) = oneshot::channel();
            let id = state.queue.push(priority, tx);
            state.total_queued += 1;
            tracing::debug!(
                %priority,
                active = state.active,
                queued = state.queue.len(),
                "Pool saturated, request queued"
            );
            metrics::record_pool(state.active, state.queue.len());
            PendingAdmission {
                inner: self.inner.clone(),
                id,
                rx,
                settled: false,
            }
        };

        match (&mut pending.rx).await {
            Ok(()) => {
                pending.settled = true;
                Ok(SlotGuard {
                    inner: self.inner.clone(),
                })
            }
            Err(_) => {
                pending.settled = true;
                Err(FetchError::ShuttingDown { component: COMPONENT })
            }
        }
    }

    /// Run one network call inside a slot.
    pub async fn request(
        &self,
        request: &FetchRequest,
        priority: Priority,
    ) -> Result<FetchResponse, FetchError> {
        let _slot = self.acquire(priority).await?;
        self.inner.transport.execute(request).await
    }

    pub fn metrics(&self) -> PoolMetrics {
        let state = self.inner.state.lock();
        PoolMetrics {
            active_connections: state.active,
            max_connections: self.inner.max_connections,
            queued: state.queue.len(),
            peak_active: state.peak_active,
            total_admitted: state.total_admitted,
            total_queued: state.total_queued,
            rejected: state.rejected,
        }
    }

    /// Reject every queued waiter and refuse new admissions.
    /// Calls already in flight finish normally.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return;
        }
        state.shutting_down = true;

        // Dropping the senders wakes each waiter with an error.
        let drained = state.queue.drain();
        state.rejected += drained.len() as u64;
        tracing::info!(
            rejected = drained.len(),
            active = state.active,
            "Connection pool shut down"
        );
        metrics::record_pool(state.active, 0);
    }
}

/// A queued admission. Cleans up if the waiting future is dropped.
struct PendingAdmission {
    inner: Arc<PoolInner>,
    id: u64,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for PendingAdmission {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let granted = {
            let mut state = self.inner.state.lock();
            if state.queue.remove(self.id) {
                metrics::record_pool(state.active, state.queue.len());
                false
            } else {
                // Popped already. The grant, if any, was sent under the lock.
                self.rx.try_recv().is_ok()
            }
        };

        if granted {
            self.inner.release();
        }
    }
}

/// Holds one pool slot; releases it on drop.
pub struct SlotGuard {
    inner: Arc<PoolInner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.release();
    }
}
