//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Logical fetch:
//!     → timeouts.rs (one deadline over the whole retry sequence)
//!     → retries.rs (ask the endpoint's breaker, run attempt, classify failure)
//!     → backoff.rs (exponential delay with jitter between attempts)
//!     → circuit_breaker.rs (track failures, open circuit if threshold exceeded)
//! ```
//!
//! # Design Decisions
//! - Every call has a deadline
//! - Circuit breakers are per endpoint and owned by the retry manager
//! - Circuit breaker prevents cascading failures

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use retries::{is_retryable, RetryManager, RetryMetrics};
pub use timeouts::{DeadlineGuard, DeadlineMetrics, OperationRecord};
