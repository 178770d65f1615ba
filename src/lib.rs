//! Resilient outbound fetch pipeline.
//!
//! Admission-controlled connection pool, request coalescing, retries with
//! backoff and jitter, per-endpoint circuit breaking and deadlines, composed
//! behind one `fetch` call.

pub mod config;
pub mod dedup;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod orchestrator;
pub mod pool;
pub mod resilience;
pub mod transport;

pub use config::FetchConfig;
pub use error::FetchError;
pub use orchestrator::{BatchRequest, DetailedMetrics, Orchestrator, PipelineMetrics};
pub use pool::Priority;
pub use transport::{FetchOptions, FetchRequest, FetchResponse, HttpTransport, Transport};
